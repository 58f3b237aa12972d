//! Scenario B — two-node routing (`spec.md` §8).
//!
//! Gate `G` holds the client socket; backend `B` runs the login model. `G`'s
//! handler for message 100 resolves `B` via `getNodeByName`, forwards
//! `InternalData(103)`; `B`'s handler replies, and since 101 isn't in `B`'s
//! routes the reply retraces through the gate recorded in `session.Servers`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mesh_cluster::{
    handle_accepted_packet, handle_dialed_packet, ClusterConfig, ClusterContext, Codec, Connection, HandlerRegistry, Model, Node, NodeAgent,
    Packet, PacketType, Session,
};
use mesh_test_utils::{loopback_pair, InMemoryRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn config(node_name: &str, node_id: &str, frontend: bool) -> ClusterConfig {
    ClusterConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        node_name: node_name.to_owned(),
        node_id: node_id.to_owned(),
        frontend,
        routes: vec![],
        registry_endpoint: String::new(),
        registry_prefix: "/mesh-cluster/nodes".to_owned(),
        registry_lease_ttl: Duration::from_secs(5),
        heartbeat_send_interval: Duration::from_secs(3),
        heartbeat_check_interval: Duration::from_secs(5),
        work_shard_count: Some(2),
        timer_slot_num: 64,
        timer_tick: Duration::from_millis(50),
        shutdown_deadline: Duration::from_secs(5),
    }
}

struct NoopModel(&'static str);

impl Model for NoopModel {
    fn name(&self) -> &str {
        self.0
    }
    fn on_disconnection(&self, _session: Arc<dyn Session>) {}
}

async fn read_packet(read_half: &mut tokio::net::tcp::OwnedReadHalf, pool: &mesh_cluster::PacketPool) -> Packet {
    let mut buf = [0u8; 9 + 17 + 512];
    let n = read_half.read(&mut buf).await.unwrap();
    Codec::new(pool.clone()).decode_one(&buf[..n]).unwrap()
}

#[tokio::test]
async fn reply_retraces_through_the_recorded_gate() {
    let gate_local = Node::new("1", "GATE", "127.0.0.1:0", true, vec![]);
    let gate_ctx = ClusterContext::new(config("GATE", "1", true), Arc::new(NodeAgent::new(gate_local)), Arc::new(HandlerRegistry::new()), Arc::new(InMemoryRegistry::new()));

    let backend_local = Node::new("9", "GAME", "127.0.0.1:0", false, vec![]);
    let backend_handlers = Arc::new(HandlerRegistry::new());
    let backend_ctx = ClusterContext::new(config("GAME", "9", false), Arc::new(NodeAgent::new(backend_local)), backend_handlers.clone(), Arc::new(InMemoryRegistry::new()));

    // Cross-populate the node views so `pick`/`getGateNode` can resolve each other.
    let backend_advert = serde_json::to_vec(&vec![Node::new("9", "GAME", "127.0.0.1:0", false, vec![])]).unwrap();
    gate_ctx.node_agent.apply_put("GAME", &backend_advert).unwrap();
    let gate_advert = serde_json::to_vec(&vec![Node::new("1", "GATE", "127.0.0.1:0", true, vec![])]).unwrap();
    backend_ctx.node_agent.apply_put("GATE", &gate_advert).unwrap();

    // The peer link between G and B: G accepted it (B dialed in, per the
    // tie-break), so G drives it with `handle_accepted_packet` and B with
    // `handle_dialed_packet`.
    let (gate_side_stream, backend_side_stream) = loopback_pair().await;
    let (mut gate_peer_read, gate_peer_write) = gate_side_stream.into_split();
    let (mut backend_peer_read, backend_peer_write) = backend_side_stream.into_split();
    let gate_peer_conn: Arc<dyn Session> = Connection::new(gate_peer_write, 1, -1);
    let backend_peer_conn: Arc<dyn Session> = Connection::new(backend_peer_write, 1, -1);
    gate_ctx.node_agent.store_node_conn("9", gate_peer_conn.clone());
    backend_ctx.node_agent.store_node_conn("1", backend_peer_conn.clone());

    // B's login model: on InternalData(103), reply with a fixed payload.
    backend_handlers
        .register::<Bytes, _, _>(
            103,
            "Login",
            |bytes| Ok(Bytes::copy_from_slice(bytes)),
            |session, payload| {
                let reply = Bytes::from(format!("ack:{}", std::str::from_utf8(&payload).unwrap()));
                tokio::spawn(async move {
                    let _ = session.send_data(reply).await;
                });
            },
        )
        .unwrap();
    backend_ctx.model_manager.register(Arc::new(NoopModel("Login"))).unwrap();

    // The client's own socket, terminated at G.
    let (client_side_stream, mut raw_client_stream) = loopback_pair().await;
    let (_client_read, client_write) = client_side_stream.into_split();
    let client_session: Arc<dyn Session> = Connection::new(client_write, gate_ctx.alloc_session_id(), -1);
    gate_ctx.sessions.store(client_session.clone());
    let sid = client_session.id();

    // Client -> G: Data(100). G resolves B via `getNodeByName` and forwards
    // InternalData(103, sid) over the peer link.
    let agent = gate_ctx.node_agent.get_node_by_name(client_session.as_ref(), "GAME").await.unwrap();
    let internal = gate_ctx.pool.new_internal(PacketType::InternalData, 103, sid, Bytes::from_static(b"Name:x"));
    agent.send_data(Codec::encode_one(&internal)).await.unwrap();

    // B's side of the peer link first sees the BindConnection `pick` sent,
    // then the InternalData that follows it.
    let bind_packet = read_packet(&mut backend_peer_read, &backend_ctx.pool).await;
    assert_eq!(bind_packet.typ(), PacketType::BindConnection);
    handle_dialed_packet(&backend_ctx, &backend_peer_conn, bind_packet).await.unwrap();

    let internal_packet = read_packet(&mut backend_peer_read, &backend_ctx.pool).await;
    assert_eq!(internal_packet.typ(), PacketType::InternalData);
    assert_eq!(internal_packet.id(), 103);
    handle_dialed_packet(&backend_ctx, &backend_peer_conn, internal_packet).await.unwrap();

    // B's handler's reply comes back over the same peer link as ClientData,
    // since 101 has no route and B isn't the frontend.
    let client_data_packet = read_packet(&mut gate_peer_read, &gate_ctx.pool).await;
    assert_eq!(client_data_packet.typ(), PacketType::ClientData);
    assert_eq!(client_data_packet.sid(), sid);
    handle_accepted_packet(&gate_ctx, &gate_peer_conn, client_data_packet).await.unwrap();

    let mut buf = [0u8; 64];
    let n = raw_client_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ack:Name:x");

    backend_ctx.model_manager.stop().await;
}
