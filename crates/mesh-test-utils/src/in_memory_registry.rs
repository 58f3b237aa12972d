use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mesh_discovery::{DiscoveryError, LeaseHandle, ServiceRegistry, WatchEvent, WatchStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// A fake [`ServiceRegistry`] backed by an in-process map, for the
/// integration tests that drive Scenario A–F without a live etcd. TTLs are
/// accepted but never expire anything — tests exercise discovery via
/// explicit put/delete, not lease timeout.
pub struct InMemoryRegistry {
    entries: Mutex<HashMap<String, Bytes>>,
    events: broadcast::Sender<WatchEvent>,
    next_lease_id: Mutex<i64>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self { entries: Mutex::new(HashMap::new()), events, next_lease_id: Mutex::new(1) }
    }

    /// Directly publish a put, bypassing `put_leased` — useful for seeding a
    /// test's initial peer set.
    pub fn seed(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        self.entries.lock().unwrap().insert(key.clone(), value.clone());
        let _ = self.events.send(WatchEvent::Put { key, value });
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
        let _ = self.events.send(WatchEvent::Delete { key: key.to_owned() });
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, DiscoveryError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put_leased(&self, key: String, value: Bytes, _ttl: Duration) -> Result<LeaseHandle, DiscoveryError> {
        self.seed(key.clone(), value);
        let mut next = self.next_lease_id.lock().unwrap();
        let lease_id = *next;
        *next += 1;
        Ok(LeaseHandle { key, lease_id })
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, DiscoveryError> {
        let prefix = prefix.to_owned();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |event| match event {
            Ok(event) => {
                let key = match &event {
                    WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
                };
                key.starts_with(&prefix).then_some(Ok(event))
            }
            Err(_lagged) => None,
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_returns_only_matching_prefix() {
        let registry = InMemoryRegistry::new();
        registry.seed("/nodes/Gate/1", Bytes::from_static(b"a"));
        registry.seed("/nodes/Game/2", Bytes::from_static(b"b"));

        let gate_only = registry.list("/nodes/Gate/").await.unwrap();
        assert_eq!(gate_only.len(), 1);
        assert_eq!(gate_only[0].0, "/nodes/Gate/1");
    }

    #[tokio::test]
    async fn watch_sees_subsequent_puts_and_deletes() {
        let registry = InMemoryRegistry::new();
        let mut stream = registry.watch("/nodes/Gate/").await.unwrap();

        registry.seed("/nodes/Gate/1", Bytes::from_static(b"a"));
        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, WatchEvent::Put { key, .. } if key == "/nodes/Gate/1"));

        registry.delete("/nodes/Gate/1");
        let event = stream.next().await.unwrap().unwrap();
        assert!(matches!(event, WatchEvent::Delete { key } if key == "/nodes/Gate/1"));
    }
}
