use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use mesh_session::Session;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler for message {0} not found")]
    HandlerNotFound(i32),
    #[error("model {0} not found")]
    ModelNotFound(String),
    #[error("decode failed for message {0}: {1}")]
    Decode(i32, String),
    #[error("duplicate handler registration for message {0}")]
    DuplicateHandler(i32),
}

type DispatchFn = Arc<dyn Fn(Arc<dyn Session>, &[u8]) -> Result<(), DispatchError> + Send + Sync>;

struct HandlerEntry {
    model_name: String,
    dispatch: DispatchFn,
}

/// `messageID → {modelName, handler, decode}`, the typed replacement for the
/// source's reflection-based prototype/handler registry. Existence of an
/// entry also serves as `IsLocalHandler(id)`.
///
/// Registration is generic over the concrete message type `T`; the decode
/// and handle closures are fused into one type-erased dispatch closure at
/// registration time, so no `Any` downcasting is needed at dispatch time.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<i32, HandlerEntry>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-global registry, matching the source's package-level
    /// `Handlers sync.Map`. Tests that need isolation should use
    /// [`HandlerRegistry::new`] instead.
    pub fn global() -> &'static HandlerRegistry {
        static INSTANCE: OnceLock<HandlerRegistry> = OnceLock::new();
        INSTANCE.get_or_init(HandlerRegistry::default)
    }

    /// `RegisterHandler` — bind a message id to a model and a typed handler.
    pub fn register<T, D, H>(
        &self,
        message_id: i32,
        model_name: impl Into<String>,
        decode: D,
        handle: H,
    ) -> Result<(), DispatchError>
    where
        T: Send + 'static,
        D: Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
        H: Fn(Arc<dyn Session>, T) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&message_id) {
            return Err(DispatchError::DuplicateHandler(message_id));
        }
        let dispatch: DispatchFn = Arc::new(move |session, bytes| {
            let msg = decode(bytes).map_err(|e| DispatchError::Decode(message_id, e))?;
            handle(session, msg);
            Ok(())
        });
        handlers.insert(message_id, HandlerEntry { model_name: model_name.into(), dispatch });
        Ok(())
    }

    #[must_use]
    pub fn is_local_handler(&self, message_id: i32) -> bool {
        self.handlers.read().unwrap().contains_key(&message_id)
    }

    /// `HandlersRoutes` — every message id this process can handle locally.
    #[must_use]
    pub fn routes(&self) -> Vec<i32> {
        self.handlers.read().unwrap().keys().copied().collect()
    }

    pub(crate) fn lookup(&self, message_id: i32) -> Option<(String, DispatchFn)> {
        self.handlers
            .read()
            .unwrap()
            .get(&message_id)
            .map(|entry| (entry.model_name.clone(), entry.dispatch.clone()))
    }
}
