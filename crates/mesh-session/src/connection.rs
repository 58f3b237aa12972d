use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use mesh_packet::{Codec, Packet, PacketPool, PacketType};
use mesh_scheduler::{Scheduler, TimerId};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::network_entities::{NetworkEntities, Session, SessionError};

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

enum WriteCmd {
    Data(Bytes),
    Close,
}

/// Wraps an accepted socket's write half, serializing every outbound frame
/// through a single writer task so concurrent `send_data` callers can never
/// interleave partial frames on the wire.
pub struct Connection {
    entities: NetworkEntities,
    closed: Arc<AtomicBool>,
    last_activity: Arc<AtomicI64>,
    write_tx: mpsc::UnboundedSender<WriteCmd>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    #[must_use]
    pub fn new(write_half: OwnedWriteHalf, id: i64, uid: i64) -> Arc<Self> {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let last_activity = Arc::new(AtomicI64::new(0));

        let conn = Arc::new(Self {
            entities: NetworkEntities::new(id, uid),
            closed: closed.clone(),
            last_activity: last_activity.clone(),
            write_tx,
            writer: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::write_loop(write_half, write_rx, closed.clone(), last_activity.clone()));
        *conn.writer.lock().unwrap() = Some(handle);
        conn
    }

    async fn write_loop(
        mut write_half: OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<WriteCmd>,
        closed: Arc<AtomicBool>,
        last_activity: Arc<AtomicI64>,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriteCmd::Close => break,
                WriteCmd::Data(buf) => {
                    if let Err(err) = write_half.write_all(&buf).await {
                        tracing::warn!(error = %err, "connection: write failed, closing");
                        break;
                    }
                    last_activity.store(now_unix(), Ordering::Release);
                }
            }
        }
        closed.store(true, Ordering::Release);
        let _ = write_half.shutdown().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn heartbeat_at(&self) -> i64 {
        self.last_activity.load(Ordering::Acquire)
    }

    pub fn set_heartbeat_at(&self, at: i64) {
        self.last_activity.store(at, Ordering::Release);
    }

    pub fn refresh_heartbeat(&self) {
        self.set_heartbeat_at(now_unix());
    }

    /// `SendData` — enqueue already-encoded bytes for the writer to drain.
    pub fn send_data(&self, data: Bytes) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.write_tx.send(WriteCmd::Data(data)).map_err(|_| SessionError::Closed)
    }

    /// `SendPack` — encode a packet, then `send_data`.
    pub fn send_pack(&self, packet: &Packet) -> Result<(), SessionError> {
        self.send_data(Codec::encode_one(packet))
    }

    /// `Close` is idempotent: only the first caller actually signals the writer.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.write_tx.send(WriteCmd::Close);
        true
    }

    /// Server-side liveness check (`NetPollConnection.checkHeartbeat`):
    /// close the connection once `2 * check_interval` has elapsed with no
    /// successful read or write.
    pub fn spawn_heartbeat_watchdog(self: &Arc<Self>, scheduler: &Scheduler, check_interval: Duration) -> Option<TimerId> {
        let weak = Arc::downgrade(self);
        let timeout_secs = (check_interval.as_secs() as i64) * 2;
        scheduler.push_every(check_interval, move || {
            let Some(conn) = weak.upgrade() else { return };
            let now = now_unix();
            let at = conn.heartbeat_at();
            if at == 0 {
                conn.set_heartbeat_at(now);
                return;
            }
            if at + timeout_secs > now {
                return;
            }
            tracing::debug!(id = conn.entities.id(), "connection: heartbeat timeout, closing");
            conn.close();
        })
    }

    /// Client-style periodic heartbeat send: emit a `Heartbeat` packet if
    /// nothing has gone out on the wire for `interval`.
    pub fn spawn_heartbeat_sender(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        interval: Duration,
        pool: PacketPool,
    ) -> Option<TimerId> {
        let weak = Arc::downgrade(self);
        let interval_secs = interval.as_secs() as i64;
        scheduler.push_every(interval, move || {
            let Some(conn) = weak.upgrade() else { return };
            if now_unix() < conn.heartbeat_at() + interval_secs {
                return;
            }
            let packet = pool.new_packet(PacketType::Heartbeat, 0, Bytes::new());
            let _ = conn.send_pack(&packet);
        })
    }
}

#[async_trait]
impl Session for Connection {
    fn id(&self) -> i64 {
        self.entities.id()
    }

    fn uid(&self) -> i64 {
        self.entities.uid()
    }

    fn bind_id(&self, id: i64) {
        self.entities.bind_id(id);
    }

    fn bind_uid(&self, uid: i64) {
        self.entities.bind_uid(uid);
    }

    fn get_server(&self, name: &str) -> Option<String> {
        self.entities.get_server(name)
    }

    fn bind_server(&self, name: &str, id: &str) {
        self.entities.bind_server(name, id);
    }

    fn servers(&self) -> HashMap<String, String> {
        self.entities.servers()
    }

    async fn send_data(&self, data: Bytes) -> Result<(), SessionError> {
        Connection::send_data(self, data)
    }

    async fn close(&self) -> Result<(), SessionError> {
        Connection::close(self);
        Ok(())
    }
}
