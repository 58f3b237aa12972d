use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{Client, GetOptions, PutOptions, WatchOptions};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use crate::{DiscoveryError, LeaseHandle, ServiceRegistry, WatchEvent, WatchStream};

/// The production [`ServiceRegistry`], backed by a real etcd cluster.
///
/// Grounded on `EtcdServiceDiscovery` (`cluster/etcd_service_discovery.go`):
/// `Grant` + `Put(WithLease)` to advertise, a background `KeepAlive` pump to
/// renew, `Get(WithPrefix)` to snapshot, `Watch(WithPrefix)` to stream
/// subsequent changes.
pub struct EtcdRegistry {
    client: Mutex<Client>,
}

impl EtcdRegistry {
    pub async fn connect(endpoint: &str) -> Result<Self, DiscoveryError> {
        let client = Client::connect([endpoint], None).await.map_err(|e| DiscoveryError::Connect(e.to_string()))?;
        Ok(Self { client: Mutex::new(client) })
    }
}

#[async_trait]
impl ServiceRegistry for EtcdRegistry {
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, DiscoveryError> {
        let mut client = self.client.lock().await;
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| DiscoveryError::List(e.to_string()))?;
        Ok(response
            .kvs()
            .iter()
            .map(|kv| (String::from_utf8_lossy(kv.key()).into_owned(), Bytes::copy_from_slice(kv.value())))
            .collect())
    }

    async fn put_leased(&self, key: String, value: Bytes, ttl: Duration) -> Result<LeaseHandle, DiscoveryError> {
        let mut client = self.client.lock().await;
        let lease = client
            .lease_grant(ttl.as_secs().max(1) as i64, None)
            .await
            .map_err(|e| DiscoveryError::Grant(e.to_string()))?;
        let lease_id = lease.id();

        client
            .put(key.clone(), value.to_vec(), Some(PutOptions::new().with_lease(lease_id)))
            .await
            .map_err(|e| DiscoveryError::Put(e.to_string()))?;

        let (mut keeper, mut keep_alive_stream) =
            client.lease_keep_alive(lease_id).await.map_err(|e| DiscoveryError::KeepAlive(e.to_string()))?;

        // Go source: a goroutine that re-sends a keep-alive and drains the
        // response channel until it closes. We mirror it as a background
        // task so callers don't need to poll.
        tokio::spawn(async move {
            loop {
                if keeper.keep_alive().await.is_err() {
                    return;
                }
                match keep_alive_stream.message().await {
                    Ok(Some(_)) => {}
                    _ => return,
                }
                tokio::time::sleep(Duration::from_secs(ttl.as_secs().max(1) / 2)).await;
            }
        });

        Ok(LeaseHandle { key, lease_id })
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, DiscoveryError> {
        let mut client = self.client.lock().await;
        let (_watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| DiscoveryError::Watch(e.to_string()))?;

        let mapped = stream.filter_map(|result| match result {
            Ok(response) => {
                let events: Vec<Result<WatchEvent, DiscoveryError>> = response
                    .events()
                    .iter()
                    .filter_map(|event| {
                        let kv = event.kv()?;
                        let key = String::from_utf8_lossy(kv.key()).into_owned();
                        Some(Ok(match event.event_type() {
                            etcd_client::EventType::Delete => WatchEvent::Delete { key },
                            etcd_client::EventType::Put => {
                                WatchEvent::Put { key, value: Bytes::copy_from_slice(kv.value()) }
                            }
                        }))
                    })
                    .collect();
                Some(tokio_stream::iter(events))
            }
            Err(e) => Some(tokio_stream::iter(vec![Err(DiscoveryError::Watch(e.to_string()))])),
        });

        Ok(Box::pin(mapped.flatten()))
    }
}
