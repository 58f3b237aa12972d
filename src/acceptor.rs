use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mesh_packet::{Codec, PacketType};
use mesh_session::{NetworkEntities, Session, SessionError};

use crate::context::ClusterContext;

/// A `Session` proxy with no socket — created on a backend the first time
/// it sees a `BindConnection` for a previously unseen session id. Outbound
/// traffic is routed to the gate named in its `servers` map rather than
/// written to a local socket (`spec.md` §3 "Acceptor").
pub struct Acceptor {
    entities: NetworkEntities,
    ctx: Arc<ClusterContext>,
}

impl Acceptor {
    #[must_use]
    pub fn new(id: i64, uid: i64, ctx: Arc<ClusterContext>) -> Arc<Self> {
        Arc::new(Self { entities: NetworkEntities::new(id, uid), ctx })
    }
}

#[async_trait]
impl Session for Acceptor {
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

    /// Wraps `data` in a `ClientData` packet carrying this acceptor's own
    /// session id and forwards it to the gate that owns the physical socket
    /// (`acceptor.Send`'s `remoteCall`, specialized: a generic byte payload
    /// never resolves to a route, so the gate branch always fires).
    async fn send_data(&self, data: Bytes) -> Result<(), SessionError> {
        let packet = self.ctx.pool.new_internal(PacketType::ClientData, 0, self.id(), data);
        let encoded = Codec::encode_one(&packet);
        let gate = self
            .ctx
            .node_agent
            .get_gate_node(self)
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))?;
        gate.send_data(encoded).await
    }

    /// `acceptor.Close` — drop from the local session table. Notifying
    /// every registered model of the teardown (`ModelManager::on_disconnection`)
    /// is the caller's responsibility, since it needs an `Arc<dyn Session>`
    /// this method doesn't have access to (see `RequestDispatcher`).
    async fn close(&self) -> Result<(), SessionError> {
        self.ctx.sessions.remove_by_id(self.id());
        Ok(())
    }
}
