//! `ServiceRegistry` — the discovery-plane abstraction over etcd's
//! prefix-list / leased-put / prefix-watch primitives.

mod error;
mod etcd_registry;

pub use error::DiscoveryError;
pub use etcd_registry::EtcdRegistry;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_stream::Stream;

/// A put or delete observed on a watched prefix.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Put { key: String, value: Bytes },
    Delete { key: String },
}

pub type WatchStream = std::pin::Pin<Box<dyn Stream<Item = Result<WatchEvent, DiscoveryError>> + Send>>;

/// A lease-backed key. Dropping it does not revoke the lease — callers that
/// want to stop advertising a service call [`ServiceRegistry::put_leased`]'s
/// keep-alive task's cancellation explicitly, mirroring the Go source's
/// `KeepAlive` channel, which runs until the client closes.
pub struct LeaseHandle {
    pub key: String,
    pub lease_id: i64,
}

/// Discovery backend contract: list the current snapshot under a prefix,
/// advertise a leased (TTL'd, auto-renewed) key, and watch a prefix for
/// subsequent put/delete events.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, DiscoveryError>;
    async fn put_leased(&self, key: String, value: Bytes, ttl: Duration) -> Result<LeaseHandle, DiscoveryError>;
    async fn watch(&self, prefix: &str) -> Result<WatchStream, DiscoveryError>;
}
