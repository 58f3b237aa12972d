use std::sync::Arc;

use bytes::Bytes;
use mesh_packet::{Codec, Packet, PacketType};
use mesh_session::Session;

use crate::acceptor::Acceptor;
use crate::context::ClusterContext;
use crate::control::{ConnectionAck, ConnectionAnnounce, NotifyData, SessionBindServer, SessionClose};
use crate::errors::ClusterError;

/// The shard key a read loop hashes a decoded packet on before handing it
/// to [`mesh_scheduler::WorkShardPool`]: the session it refers to for
/// `ClientData`/`InternalData`, otherwise the physical connection's own id.
#[must_use]
pub fn shard_key(packet: &Packet, connection_id: i64) -> i64 {
    if packet.typ().carries_sid() { packet.sid() } else { connection_id }
}

/// `s_request.go`'s `onMessage` — the dispatcher for any connection accepted
/// on this node's own listener: an end client, or a peer that dialed us
/// because its id is smaller than ours (`spec.md` §4.7).
pub async fn handle_accepted_packet(ctx: &Arc<ClusterContext>, conn: &Arc<dyn Session>, packet: Packet) -> Result<(), ClusterError> {
    match packet.typ() {
        PacketType::Heartbeat => {}
        PacketType::Data => {
            let id = packet.id();
            if ctx.handler_registry.is_local_handler(id) {
                ctx.model_manager.dispatch_local_async(conn.clone(), id, packet.data().clone())?;
            } else {
                let node_name = ctx.node_agent.get_groutes(id).unwrap_or_default();
                let internal = ctx.pool.new_internal(PacketType::InternalData, id, conn.id(), packet.data().clone());
                remote_call(ctx, conn.as_ref(), &internal, &node_name).await?;
            }
        }
        PacketType::Connection => {
            let announce: ConnectionAnnounce = serde_json::from_slice(packet.data())?;
            ctx.sessions.remove_by_id(conn.id());
            ctx.node_agent.store_node_conn(&announce.id, conn.clone());

            let local = ctx.node_agent.local();
            let ack = ConnectionAck { id: local.id.clone(), name: local.name.clone(), frontend: local.frontend };
            let payload = Bytes::from(serde_json::to_vec(&ack)?);
            let reply = ctx.pool.new_packet(PacketType::Connection, 0, payload);
            conn.send_data(Codec::encode_one(&reply)).await?;
        }
        PacketType::DisConnection => handle_session_close(ctx, packet.data()).await?,
        PacketType::BindConnection => handle_bind_connection(ctx, packet.data())?,
        PacketType::InternalData => handle_internal_data(ctx, packet.id(), packet.sid(), packet.data().clone())?,
        PacketType::ClientData => handle_client_data(ctx, packet.sid(), packet.data().clone()).await?,
        PacketType::NotifyData => handle_notify_data(ctx, packet.data()).await?,
    }
    Ok(())
}

/// `c_request.go`'s `onMessage` — the dispatcher for a link this node
/// dialed out to (a peer with a higher id, see [`crate::cluster_link`]).
/// A dialed link never carries `Heartbeat` or client `Data`, since the
/// peer that answered it is never itself a client.
pub async fn handle_dialed_packet(ctx: &Arc<ClusterContext>, conn: &Arc<dyn Session>, packet: Packet) -> Result<(), ClusterError> {
    match packet.typ() {
        PacketType::Connection => {
            let ack: ConnectionAck = serde_json::from_slice(packet.data())?;
            ctx.node_agent.store_node_conn(&ack.id, conn.clone());
        }
        PacketType::DisConnection => handle_session_close(ctx, packet.data()).await?,
        PacketType::BindConnection => handle_bind_connection(ctx, packet.data())?,
        PacketType::InternalData => handle_internal_data(ctx, packet.id(), packet.sid(), packet.data().clone())?,
        PacketType::ClientData => handle_client_data(ctx, packet.sid(), packet.data().clone()).await?,
        PacketType::Heartbeat | PacketType::Data | PacketType::NotifyData => {}
    }
    Ok(())
}

/// `remoteCall` — the routing decision behind the `Data`/`InternalData`
/// forwarding path: pick the right peer for `packet` and hand it the
/// already-encoded frame.
async fn remote_call(ctx: &ClusterContext, session: &dyn Session, packet: &Packet, node_name: &str) -> Result<(), ClusterError> {
    let encoded = Codec::encode_one(packet);
    if ctx.node_agent.has_groutes(packet.id()) {
        let agent = ctx.node_agent.get_node_by_name(session, node_name).await?;
        return agent.send_data(encoded).await.map_err(Into::into);
    }
    if ctx.node_agent.local().frontend {
        return session.send_data(encoded).await.map_err(Into::into);
    }
    let gate = ctx.node_agent.get_gate_node(session)?;
    gate.send_data(encoded).await.map_err(Into::into)
}

/// A peer told us `sid` tore down on its end (Scenario C): close the local
/// acceptor and let every registered model observe the disconnection.
async fn handle_session_close(ctx: &Arc<ClusterContext>, data: &[u8]) -> Result<(), ClusterError> {
    let close: SessionClose = serde_json::from_slice(data)?;
    let session = ctx.sessions.get_by_id(close.session_id).ok_or(ClusterError::SessionNotFound(close.session_id))?;
    ctx.sessions.remove_by_id(close.session_id);
    session.close().await?;
    ctx.model_manager.on_disconnection(session);
    Ok(())
}

/// If `sid` has no acceptor yet, create one and store it — this node is
/// seeing this session for the first time (`spec.md` §3's "Acceptor").
fn handle_bind_connection(ctx: &Arc<ClusterContext>, data: &[u8]) -> Result<(), ClusterError> {
    let bind: SessionBindServer = serde_json::from_slice(data)?;
    let session = ctx.sessions.get_by_id(bind.session_id).unwrap_or_else(|| {
        let acceptor: Arc<dyn Session> = Acceptor::new(bind.session_id, bind.uid, ctx.clone());
        ctx.sessions.store(acceptor.clone());
        acceptor
    });
    for (name, id) in &bind.servers {
        session.bind_server(name, id);
    }
    Ok(())
}

fn handle_internal_data(ctx: &Arc<ClusterContext>, id: i32, sid: i64, data: Bytes) -> Result<(), ClusterError> {
    if !ctx.handler_registry.is_local_handler(id) {
        return Err(mesh_model::DispatchError::HandlerNotFound(id).into());
    }
    let session = ctx.sessions.get_by_id(sid).ok_or(ClusterError::SessionNotFound(sid))?;
    ctx.model_manager.dispatch_local_async(session, id, data)?;
    Ok(())
}

async fn handle_client_data(ctx: &Arc<ClusterContext>, sid: i64, data: Bytes) -> Result<(), ClusterError> {
    let session = ctx.sessions.get_by_id(sid).ok_or(ClusterError::SessionNotFound(sid))?;
    session.send_data(data).await.map_err(Into::into)
}

/// `{sessions[], payload}` — empty list broadcasts to every session this
/// node currently holds; each recipient attempt is independent, and the
/// composite error preserves every sub-error (`spec.md` §7).
async fn handle_notify_data(ctx: &Arc<ClusterContext>, data: &[u8]) -> Result<(), ClusterError> {
    let notify: NotifyData = serde_json::from_slice(data)?;
    let payload = Bytes::from(notify.payload);

    let targets: Vec<Arc<dyn Session>> = if notify.session_ids.is_empty() {
        let mut all = Vec::new();
        let _: Vec<()> = ctx.sessions.for_each(|session| -> Result<(), ()> {
            all.push(session.clone());
            Ok(())
        });
        all
    } else {
        notify.session_ids.iter().filter_map(|id| ctx.sessions.get_by_id(*id)).collect()
    };

    let attempted = targets.len();
    let mut errors = Vec::new();
    for target in targets {
        if let Err(err) = target.send_data(payload.clone()).await {
            errors.push(ClusterError::from(err));
        }
    }
    ClusterError::join(attempted, errors)
}
