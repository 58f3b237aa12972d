use std::sync::Arc;

use bytes::Bytes;
use mesh_packet::{Codec, PacketType};
use mesh_session::{Connection, Session};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use crate::context::ClusterContext;
use crate::control::ConnectionAnnounce;
use crate::errors::ClusterError;
use crate::node::Node;

/// Dial a peer named in one of `NodeAgent::apply_put`'s returned lists:
/// open the TCP connection, register it in the conn-manager under the
/// peer's id, announce the local node (`node.connection`'s `Connection`
/// packet), arm the heartbeat sender, and spawn the reader loop that feeds
/// every subsequent frame to [`crate::dispatcher`].
pub async fn dial(peer: &Node, ctx: Arc<ClusterContext>) -> Result<Arc<Connection>, ClusterError> {
    let stream = TcpStream::connect(&peer.addr).await?;
    let (read_half, write_half) = stream.into_split();
    let conn = Connection::new(write_half, 1, -1);
    conn.refresh_heartbeat();

    ctx.node_agent.store_node_conn(&peer.id, conn.clone() as Arc<dyn Session>);

    let local = ctx.node_agent.local();
    let announce = ConnectionAnnounce { id: local.id.clone(), name: local.name.clone() };
    let payload = Bytes::from(serde_json::to_vec(&announce)?);
    let packet = ctx.pool.new_packet(PacketType::Connection, 0, payload);
    conn.send_pack(&packet)?;

    conn.spawn_heartbeat_sender(&ctx.scheduler, ctx.config.heartbeat_send_interval, ctx.pool.clone());

    tokio::spawn(read_loop(read_half, conn.clone(), ctx));

    Ok(conn)
}

async fn read_loop(read_half: OwnedReadHalf, conn: Arc<Connection>, ctx: Arc<ClusterContext>) {
    let mut framed = FramedRead::new(read_half, Codec::new(ctx.pool.clone()));
    while let Some(decoded) = framed.next().await {
        match decoded {
            Ok(packet) => {
                conn.refresh_heartbeat();
                let peer: Arc<dyn Session> = conn.clone();
                let key = crate::dispatcher::shard_key(&packet, conn.id());
                let (shard_ctx, shard_peer) = (ctx.clone(), peer.clone());
                let queued = ctx
                    .shards
                    .put(key, async move {
                        if let Err(err) = crate::dispatcher::handle_dialed_packet(&shard_ctx, &shard_peer, packet).await {
                            tracing::warn!(error = %err, "cluster_link: dispatch failed");
                        }
                    })
                    .await;
                if let Err(err) = queued {
                    tracing::error!(error = %err, "cluster_link: work shard rejected packet");
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "cluster_link: decode error, closing");
                break;
            }
        }
    }
    conn.close();
}
