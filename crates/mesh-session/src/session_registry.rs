use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::network_entities::Session;

/// In-memory `id ↔ session`, `uid ↔ id` table. No I/O is ever performed
/// under either lock.
#[derive(Default)]
pub struct SessionRegistry {
    by_id: RwLock<HashMap<i64, Arc<dyn Session>>>,
    by_uid: RwLock<HashMap<i64, i64>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, session: Arc<dyn Session>) {
        let id = session.id();
        let uid = session.uid();
        self.by_id.write().unwrap().insert(id, session);
        self.by_uid.write().unwrap().insert(uid, id);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.by_id.read().unwrap().len()
    }

    #[must_use]
    pub fn get_by_id(&self, id: i64) -> Option<Arc<dyn Session>> {
        self.by_id.read().unwrap().get(&id).cloned()
    }

    #[must_use]
    pub fn get_by_uid(&self, uid: i64) -> Option<Arc<dyn Session>> {
        let id = *self.by_uid.read().unwrap().get(&uid)?;
        self.get_by_id(id)
    }

    pub fn remove_by_id(&self, id: i64) {
        let mut by_id = self.by_id.write().unwrap();
        if let Some(session) = by_id.remove(&id) {
            self.by_uid.write().unwrap().remove(&session.uid());
        }
    }

    pub fn remove_by_uid(&self, uid: i64) {
        let mut by_uid = self.by_uid.write().unwrap();
        if let Some(id) = by_uid.remove(&uid) {
            self.by_id.write().unwrap().remove(&id);
        }
    }

    /// `Range` — snapshot the current sessions and apply `f` to each.
    /// Errors from individual calls are collected rather than aborting the walk.
    pub fn for_each<E>(&self, mut f: impl FnMut(&Arc<dyn Session>) -> Result<(), E>) -> Vec<E> {
        let snapshot: Vec<Arc<dyn Session>> = self.by_id.read().unwrap().values().cloned().collect();
        let mut errors = Vec::new();
        for session in &snapshot {
            if let Err(e) = f(session) {
                errors.push(e);
            }
        }
        errors
    }
}
