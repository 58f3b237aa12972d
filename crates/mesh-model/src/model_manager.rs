use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use mesh_scheduler::Scheduler;
use mesh_session::Session;
use thiserror::Error;

use crate::handler_registry::{DispatchError, HandlerRegistry};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model name is empty")]
    EmptyName,
    #[error("model {0}: OnInit failed: {1}")]
    OnInit(String, String),
    #[error("model {0}: OnStart failed: {1}")]
    OnStart(String, String),
    #[error("duplicate model name {0}")]
    Duplicate(String),
    #[error("model {0} not found")]
    NotFound(String),
}

/// `{name, mailbox}` — a named logic unit whose lifecycle is
/// `OnInit → OnStart → (messages, timers) → OnStop`.
pub trait Model: Send + Sync {
    fn name(&self) -> &str;
    fn on_init(&self) -> Result<(), String> {
        Ok(())
    }
    fn on_start(&self) -> Result<(), String> {
        Ok(())
    }
    fn on_stop(&self) -> Result<(), String> {
        Ok(())
    }
    fn on_disconnection(&self, session: Arc<dyn Session>);
}

struct ModelSlot {
    model: Arc<dyn Model>,
    mailbox: Scheduler,
}

/// Registers named [`Model`]s, each with its own serialized mailbox, and
/// dispatches decoded messages to the handler their message id resolves to.
pub struct ModelManager {
    registry: Arc<HandlerRegistry>,
    models: RwLock<HashMap<String, ModelSlot>>,
    order: RwLock<Vec<String>>,
}

impl ModelManager {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry, models: RwLock::new(HashMap::new()), order: RwLock::new(Vec::new()) }
    }

    /// `Register(model)` — `OnInit → OnStart`, then store under `model.Name()`;
    /// duplicate names fail.
    pub fn register(&self, model: Arc<dyn Model>) -> Result<(), ModelError> {
        let name = model.name().to_string();
        if name.is_empty() {
            return Err(ModelError::EmptyName);
        }
        model.on_init().map_err(|e| ModelError::OnInit(name.clone(), e))?;
        model.on_start().map_err(|e| ModelError::OnStart(name.clone(), e))?;

        let mut models = self.models.write().unwrap();
        if models.contains_key(&name) {
            return Err(ModelError::Duplicate(name));
        }
        models.insert(name.clone(), ModelSlot { model, mailbox: Scheduler::new() });
        self.order.write().unwrap().push(name);
        Ok(())
    }

    /// `Unregister(name)` — stop and remove.
    pub async fn unregister(&self, name: &str) -> Result<(), ModelError> {
        let slot = self.models.write().unwrap().remove(name);
        let slot = slot.ok_or_else(|| ModelError::NotFound(name.to_string()))?;
        let _ = slot.model.on_stop();
        slot.mailbox.stop().await;
        self.order.write().unwrap().retain(|n| n != name);
        Ok(())
    }

    /// Tear every model down in reverse registration order.
    pub async fn stop(&self) {
        let order: Vec<String> = self.order.write().unwrap().drain(..).rev().collect();
        for name in order {
            if let Some(slot) = self.models.write().unwrap().remove(&name) {
                let _ = slot.model.on_stop();
                slot.mailbox.stop().await;
            }
        }
    }

    /// `OnDisconnection(session)` — enqueued onto every registered model's
    /// mailbox, in insertion order.
    pub fn on_disconnection(&self, session: Arc<dyn Session>) {
        let order = self.order.read().unwrap().clone();
        let models = self.models.read().unwrap();
        for name in order {
            if let Some(slot) = models.get(&name) {
                let model = slot.model.clone();
                let s = session.clone();
                slot.mailbox.push_task(move || model.on_disconnection(s));
            }
        }
    }

    /// `DispatchLocalAsync(session, id, bytes)`.
    pub fn dispatch_local_async(
        &self,
        session: Arc<dyn Session>,
        message_id: i32,
        bytes: Bytes,
    ) -> Result<(), DispatchError> {
        let (model_name, dispatch) =
            self.registry.lookup(message_id).ok_or(DispatchError::HandlerNotFound(message_id))?;
        let models = self.models.read().unwrap();
        let slot = models.get(&model_name).ok_or_else(|| DispatchError::ModelNotFound(model_name.clone()))?;
        let mailbox = slot.mailbox.clone();
        mailbox.push_task(move || {
            if let Err(err) = dispatch(session, &bytes) {
                tracing::warn!(error = %err, message_id, "model manager: dispatch failed");
            }
        });
        Ok(())
    }
}
