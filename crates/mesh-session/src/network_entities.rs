use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session: connection closed")]
    Closed,
    #[error("session: io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The logical end-to-end endpoint identified by `(id, uid)` and its
/// per-service-class `servers` bindings.
///
/// Implemented by [`crate::Connection`] (a gate's physical socket session)
/// and, on backends, by an acceptor proxy that has no socket at all —
/// both share this one contract so routing code never needs to know which
/// kind it holds.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> i64;
    fn uid(&self) -> i64;
    fn bind_id(&self, id: i64);
    fn bind_uid(&self, uid: i64);

    /// The bound node id for service class `name`, if any.
    fn get_server(&self, name: &str) -> Option<String>;
    fn bind_server(&self, name: &str, id: &str);
    /// A snapshot copy of every binding.
    fn servers(&self) -> HashMap<String, String>;

    async fn send_data(&self, data: Bytes) -> Result<(), SessionError>;
    async fn close(&self) -> Result<(), SessionError>;
}

/// The shared `(id, uid, servers)` state every [`Session`] implementation
/// is built on, the composition analogue of embedding a base struct.
pub struct NetworkEntities {
    id: AtomicI64,
    uid: AtomicI64,
    servers: RwLock<HashMap<String, String>>,
}

impl NetworkEntities {
    #[must_use]
    pub fn new(id: i64, uid: i64) -> Self {
        Self { id: AtomicI64::new(id), uid: AtomicI64::new(uid), servers: RwLock::new(HashMap::new()) }
    }

    pub fn id(&self) -> i64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn uid(&self) -> i64 {
        self.uid.load(Ordering::Acquire)
    }

    pub fn bind_id(&self, id: i64) {
        self.id.store(id, Ordering::Release);
    }

    pub fn bind_uid(&self, uid: i64) {
        self.uid.store(uid, Ordering::Release);
    }

    pub fn get_server(&self, name: &str) -> Option<String> {
        self.servers.read().unwrap().get(name).cloned()
    }

    pub fn bind_server(&self, name: &str, id: &str) {
        self.servers.write().unwrap().insert(name.to_owned(), id.to_owned());
    }

    pub fn servers(&self) -> HashMap<String, String> {
        self.servers.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servers_snapshot_is_a_copy_not_a_view() {
        let entities = NetworkEntities::new(1, -1);
        entities.bind_server("GATE", "9");
        let mut snapshot = entities.servers();
        snapshot.insert("GAME".to_owned(), "10".to_owned());
        assert_eq!(entities.servers().len(), 1);
        assert_eq!(entities.get_server("GATE").as_deref(), Some("9"));
    }

    #[test]
    fn uid_defaults_preserved_across_rebinding() {
        let entities = NetworkEntities::new(5, -1);
        assert_eq!(entities.uid(), -1);
        entities.bind_uid(42);
        assert_eq!(entities.uid(), 42);
        assert_eq!(entities.id(), 5);
    }
}
