use std::sync::Arc;

use bytes::Bytes;
use mesh_discovery::{ServiceRegistry, WatchEvent};
use mesh_model::{HandlerRegistry, Model, ModelManager};
use mesh_packet::Codec;
use mesh_scheduler::Scheduler;
use mesh_session::{Connection, Session, SessionRegistry};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use crate::cluster_link;
use crate::config::ClusterConfig;
use crate::context::ClusterContext;
use crate::dispatcher;
use crate::errors::ClusterError;
use crate::node::Node;
use crate::node_agent::NodeAgent;

/// The cluster runtime facade: binds [`ClusterContext`] to a listener and
/// to the discovery plane (`spec.md` §6 "Server boundary").
pub struct Server {
    ctx: Arc<ClusterContext>,
}

impl Server {
    #[must_use]
    pub fn new(config: ClusterConfig, registry: Arc<dyn ServiceRegistry>) -> Arc<Self> {
        let local = Node::new(config.node_id.clone(), config.node_name.clone(), config.bind_addr.clone(), config.frontend, config.routes.clone());
        let node_agent = Arc::new(NodeAgent::new(local));
        let handler_registry = Arc::new(HandlerRegistry::new());
        let ctx = ClusterContext::new(config, node_agent, handler_registry, registry);
        Arc::new(Self { ctx })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    #[must_use]
    pub fn model_manager(&self) -> &Arc<ModelManager> {
        &self.ctx.model_manager
    }

    #[must_use]
    pub fn conn_manager(&self) -> &Arc<SessionRegistry> {
        &self.ctx.sessions
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.ctx.scheduler
    }

    /// `Register(model)`.
    pub fn register(&self, model: Arc<dyn Model>) -> Result<(), ClusterError> {
        self.ctx.model_manager.register(model).map_err(Into::into)
    }

    /// `RegisterHandler(prototype, fn)`.
    pub fn register_handler<T, D, H>(&self, message_id: i32, model_name: impl Into<String>, decode: D, handle: H) -> Result<(), ClusterError>
    where
        T: Send + 'static,
        D: Fn(&[u8]) -> Result<T, String> + Send + Sync + 'static,
        H: Fn(Arc<dyn Session>, T) + Send + Sync + 'static,
    {
        self.ctx.handler_registry.register(message_id, model_name, decode, handle).map_err(Into::into)
    }

    /// `Listen(addr)` — bind, bootstrap and watch the discovery plane, and
    /// start accepting connections. Returns once the listener is bound;
    /// the accept loop and the discovery watcher run in the background
    /// until [`Server::shutdown`] is called or the registry is lost.
    pub async fn listen(self: &Arc<Self>) -> Result<(), ClusterError> {
        self.bootstrap_discovery().await?;

        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        tracing::info!(addr = %self.ctx.config.bind_addr, "server: listening");
        let ctx = self.ctx.clone();
        tokio::spawn(accept_loop(listener, ctx));
        Ok(())
    }

    /// On startup: list the prefix (bootstrap the view), publish this
    /// node's own record under a lease, then watch the prefix for
    /// subsequent put/delete events (`spec.md` §4.9).
    async fn bootstrap_discovery(self: &Arc<Self>) -> Result<(), ClusterError> {
        let prefix = self.ctx.config.registry_prefix.clone();

        for (key, value) in self.ctx.registry.list(&prefix).await? {
            if let Some((name, _id)) = parse_key(&prefix, &key) {
                if let Err(err) = self.ctx.node_agent.apply_put(&name, &value) {
                    tracing::warn!(error = %err, key, "server: malformed registry entry during bootstrap");
                }
            }
        }

        let local = self.ctx.node_agent.local().clone();
        let mut advertised = self.ctx.node_agent.list(&local.name);
        if !advertised.iter().any(|n| n.id == local.id) {
            advertised.push(local.clone());
        }
        let payload = Bytes::from(serde_json::to_vec(&advertised)?);
        let key = format!("{prefix}/{}/{}", local.name, local.id);
        self.ctx.registry.put_leased(key, payload.clone(), self.ctx.config.registry_lease_ttl).await?;
        self.ctx.node_agent.apply_put(&local.name, &payload)?;

        let mut events = self.ctx.registry.watch(&prefix).await?;
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = ctx.shutdown.cancelled() => return,
                    next = events.next() => {
                        let Some(event) = next else { break };
                        handle_watch_event(&ctx, &prefix, event).await;
                    }
                }
            }
            tracing::error!("server: registry watch ended, closing cluster");
            ctx.shutdown.cancel();
        });

        Ok(())
    }

    /// `Shutdown(ctx)` — block on `SIGINT`/`SIGQUIT`/`SIGTERM` or an
    /// already-triggered shutdown (e.g. registry loss), then drain with the
    /// configured deadline: stop the scheduler, stop every model, close
    /// every session.
    pub async fn shutdown(self: &Arc<Self>) {
        wait_for_signal_or_cancellation(&self.ctx.shutdown).await;
        self.ctx.shutdown.cancel();

        let drain = async {
            self.ctx.scheduler.stop().await;
            self.ctx.model_manager.stop().await;
            let mut all = Vec::new();
            let _: Vec<()> = self.ctx.sessions.for_each(|session| -> Result<(), ()> {
                all.push(session.clone());
                Ok(())
            });
            for session in all {
                let _ = session.close().await;
            }
        };

        if tokio::time::timeout(self.ctx.config.shutdown_deadline, drain).await.is_err() {
            tracing::warn!("server: shutdown deadline exceeded, forcing exit");
        }
    }
}

async fn handle_watch_event(ctx: &Arc<ClusterContext>, prefix: &str, event: Result<WatchEvent, mesh_discovery::DiscoveryError>) {
    match event {
        Ok(WatchEvent::Put { key, value }) => {
            let Some((name, _id)) = parse_key(prefix, &key) else { return };
            match ctx.node_agent.apply_put(&name, &value) {
                Ok(to_dial) => {
                    for peer in to_dial {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = cluster_link::dial(&peer, ctx).await {
                                tracing::warn!(error = %err, peer = %peer.id, "server: failed to dial peer");
                            }
                        });
                    }
                }
                Err(err) => tracing::warn!(error = %err, key, "server: malformed registry value"),
            }
        }
        Ok(WatchEvent::Delete { key }) => {
            if let Some((name, id)) = parse_key(prefix, &key) {
                ctx.node_agent.apply_delete(&name, &id);
            }
        }
        Err(err) => tracing::warn!(error = %err, "server: registry watch error"),
    }
}

/// `{prefix}/{name}/{id}` — strip the known prefix rather than assuming a
/// fixed number of `/`-separated segments, since `prefix` itself may
/// contain slashes (unlike the fixed, single-segment `preKey` the source
/// assumed).
fn parse_key(prefix: &str, key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix(prefix)?.trim_start_matches('/');
    let (name, id) = rest.split_once('/')?;
    Some((name.to_owned(), id.to_owned()))
}

async fn wait_for_signal_or_cancellation(token: &tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = term.recv() => {},
            _ = quit.recv() => {},
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        () = terminate => tracing::info!("server: received SIGQUIT/SIGTERM, shutting down"),
        () = token.cancelled() => tracing::info!("server: shutdown triggered internally"),
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ClusterContext>) {
    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(handle_accepted_connection(stream, ctx));
                    }
                    Err(err) => tracing::warn!(error = %err, "server: accept failed"),
                }
            }
        }
    }
}

/// One dispatcher per inbound connection (`spec.md` §4.7): frame, shard by
/// session, dispatch, and on stream end gossip the close and notify models.
async fn handle_accepted_connection(stream: TcpStream, ctx: Arc<ClusterContext>) {
    let (read_half, write_half) = stream.into_split();
    let id = ctx.alloc_session_id();
    let conn = Connection::new(write_half, id, -1);
    conn.refresh_heartbeat();
    ctx.sessions.store(conn.clone() as Arc<dyn Session>);
    conn.spawn_heartbeat_watchdog(&ctx.scheduler, ctx.config.heartbeat_check_interval);

    let mut framed = FramedRead::new(read_half, Codec::new(ctx.pool.clone()));
    while let Some(decoded) = framed.next().await {
        match decoded {
            Ok(packet) => {
                conn.refresh_heartbeat();
                let session: Arc<dyn Session> = conn.clone();
                let key = dispatcher::shard_key(&packet, conn.id());
                let (shard_ctx, shard_session) = (ctx.clone(), session.clone());
                let queued = ctx
                    .shards
                    .put(key, async move {
                        if let Err(err) = dispatcher::handle_accepted_packet(&shard_ctx, &shard_session, packet).await {
                            tracing::warn!(error = %err, "server: dispatch failed");
                        }
                    })
                    .await;
                if let Err(err) = queued {
                    tracing::error!(error = %err, "server: work shard rejected packet");
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "server: decode error, closing connection");
                break;
            }
        }
    }

    conn.close();
    ctx.sessions.remove_by_id(conn.id());
    let session: Arc<dyn Session> = conn;
    if let Err(err) = ctx.node_agent.notify_close_session(session.as_ref()).await {
        tracing::warn!(error = %err, "server: session close gossip failed");
    }
    ctx.model_manager.on_disconnection(session);
}
