//! Scenario A — single-node login echo (`spec.md` §8).
//!
//! A gate with a locally registered handler for message id 100 replies to a
//! client's `Data(100)` with `Data(101)` carrying the session id.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mesh_cluster::{ClusterConfig, ClusterContext, Codec, Connection, HandlerRegistry, Model, NodeAgent, Packet, PacketType, Session};
use mesh_cluster::{Node, handle_accepted_packet};
use mesh_test_utils::{loopback_pair, InMemoryRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn config() -> ClusterConfig {
    ClusterConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        node_name: "GATE".to_owned(),
        node_id: "1".to_owned(),
        frontend: true,
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

struct LoginModel;

impl Model for LoginModel {
    fn name(&self) -> &str {
        "Login"
    }
    fn on_disconnection(&self, _session: Arc<dyn Session>) {}
}

#[tokio::test]
async fn gate_replies_with_session_scoped_echo() {
    let local = Node::new("1", "GATE", "127.0.0.1:0", true, vec![]);
    let node_agent = Arc::new(NodeAgent::new(local));
    let handler_registry = Arc::new(HandlerRegistry::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let ctx = ClusterContext::new(config(), node_agent, handler_registry.clone(), registry);

    let model_manager_ctx = ctx.clone();
    handler_registry
        .register::<String, _, _>(
            100,
            "Login",
            |bytes| std::str::from_utf8(bytes).map(str::to_owned).map_err(|e| e.to_string()),
            move |session, _name| {
                let payload = format!("client{}", session.id());
                let packet = model_manager_ctx.pool.new_packet(PacketType::Data, 101, Bytes::from(payload));
                let encoded = Codec::encode_one(&packet);
                tokio::spawn(async move {
                    let _ = session.send_data(encoded).await;
                });
            },
        )
        .unwrap();
    ctx.model_manager.register(Arc::new(LoginModel)).unwrap();

    let (server_stream, mut client_stream) = loopback_pair().await;
    let (mut read_half, write_half) = server_stream.into_split();
    let session: Arc<dyn Session> = Connection::new(write_half, ctx.alloc_session_id(), -1);
    ctx.sessions.store(session.clone());
    let sid = session.id();

    let request = Packet::detached(PacketType::Data, 100, Bytes::from_static(b"Name:x"));
    let wire = Codec::encode_one(&request);
    client_stream.write_all(&wire).await.unwrap();

    let mut buf = [0u8; 9 + 512];
    let n = read_half.read(&mut buf).await.unwrap();
    let decoded = Codec::new(ctx.pool.clone()).decode_one(&buf[..n]).unwrap();
    handle_accepted_packet(&ctx, &session, decoded).await.unwrap();

    let n = client_stream.read(&mut buf).await.unwrap();
    let reply = Codec::new(ctx.pool.clone()).decode_one(&buf[..n]).unwrap();
    assert_eq!(reply.typ(), PacketType::Data);
    assert_eq!(reply.id(), 101);
    assert_eq!(std::str::from_utf8(reply.data()).unwrap(), format!("client{sid}"));

    ctx.model_manager.stop().await;
}
