//! Scenario C — session close gossip (`spec.md` §8).
//!
//! After the client disconnects, `G` gossips `DisConnection(sid)` to every
//! non-gate node bound on the session; `B` closes the matching acceptor and
//! every registered model observes the disconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mesh_cluster::{
    handle_dialed_packet, ClusterConfig, ClusterContext, Codec, Connection, HandlerRegistry, Model, Node, NodeAgent, PacketType, Session,
};
use mesh_test_utils::{loopback_pair, InMemoryRegistry};
use tokio::io::AsyncReadExt;

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

struct TrackingModel {
    disconnects: Arc<AtomicUsize>,
}

impl Model for TrackingModel {
    fn name(&self) -> &str {
        "Game"
    }
    fn on_disconnection(&self, _session: Arc<dyn Session>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn backend_closes_acceptor_and_notifies_models_on_gate_disconnect() {
    let gate_local = Node::new("1", "GATE", "127.0.0.1:0", true, vec![]);
    let gate_ctx = ClusterContext::new(config("GATE", "1", true), Arc::new(NodeAgent::new(gate_local)), Arc::new(HandlerRegistry::new()), Arc::new(InMemoryRegistry::new()));

    let backend_local = Node::new("9", "GAME", "127.0.0.1:0", false, vec![]);
    let backend_ctx = ClusterContext::new(config("GAME", "9", false), Arc::new(NodeAgent::new(backend_local)), Arc::new(HandlerRegistry::new()), Arc::new(InMemoryRegistry::new()));

    let backend_advert = serde_json::to_vec(&vec![Node::new("9", "GAME", "127.0.0.1:0", false, vec![])]).unwrap();
    gate_ctx.node_agent.apply_put("GAME", &backend_advert).unwrap();

    let (gate_side_stream, backend_side_stream) = loopback_pair().await;
    let (_gate_peer_read, gate_peer_write) = gate_side_stream.into_split();
    let (mut backend_peer_read, backend_peer_write) = backend_side_stream.into_split();
    let gate_peer_conn: Arc<dyn Session> = Connection::new(gate_peer_write, 1, -1);
    let backend_peer_conn: Arc<dyn Session> = Connection::new(backend_peer_write, 1, -1);
    gate_ctx.node_agent.store_node_conn("9", gate_peer_conn.clone());
    backend_ctx.node_agent.store_node_conn("1", backend_peer_conn.clone());

    let disconnects = Arc::new(AtomicUsize::new(0));
    backend_ctx.model_manager.register(Arc::new(TrackingModel { disconnects: disconnects.clone() })).unwrap();

    // Bring up the binding the way Scenario B does, so B has an acceptor.
    let (client_side_stream, _raw_client_stream) = loopback_pair().await;
    let (_client_read, client_write) = client_side_stream.into_split();
    let client_session: Arc<dyn Session> = Connection::new(client_write, gate_ctx.alloc_session_id(), -1);
    gate_ctx.sessions.store(client_session.clone());
    let sid = client_session.id();

    gate_ctx.node_agent.get_node_by_name(client_session.as_ref(), "GAME").await.unwrap();
    let mut buf = [0u8; 9 + 17 + 512];
    let n = backend_peer_read.read(&mut buf).await.unwrap();
    let bind_packet = Codec::new(backend_ctx.pool.clone()).decode_one(&buf[..n]).unwrap();
    assert_eq!(bind_packet.typ(), PacketType::BindConnection);
    handle_dialed_packet(&backend_ctx, &backend_peer_conn, bind_packet).await.unwrap();
    assert!(backend_ctx.sessions.get_by_id(sid).is_some());

    // G's own disconnect handling: close the gate session, gossip to every
    // non-gate binding.
    gate_ctx.sessions.remove_by_id(sid);
    client_session.close().await.unwrap();
    gate_ctx.node_agent.notify_close_session(client_session.as_ref()).await.unwrap();

    let n = backend_peer_read.read(&mut buf).await.unwrap();
    let dis_packet = Codec::new(backend_ctx.pool.clone()).decode_one(&buf[..n]).unwrap();
    assert_eq!(dis_packet.typ(), PacketType::DisConnection);
    handle_dialed_packet(&backend_ctx, &backend_peer_conn, dis_packet).await.unwrap();

    assert!(backend_ctx.sessions.get_by_id(sid).is_none(), "acceptor must be dropped on close");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    backend_ctx.model_manager.stop().await;
}
