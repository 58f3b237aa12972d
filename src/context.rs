use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use mesh_discovery::ServiceRegistry;
use mesh_model::{HandlerRegistry, ModelManager};
use mesh_packet::PacketPool;
use mesh_scheduler::{Scheduler, WorkShardPool};
use mesh_session::SessionRegistry;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::node_agent::NodeAgent;

/// Everything a `RequestDispatcher`, `Acceptor`, or `ClusterLink` needs a
/// handle to. Built fresh per [`crate::Server`] instance — `spec.md` §9
/// requires tests to be able to instantiate a whole runtime from scratch,
/// so this is a plain `Arc<ClusterContext>` passed around rather than a
/// process-wide singleton (the one genuine exception is
/// `HandlerRegistry::global()`, which models opt into explicitly).
pub struct ClusterContext {
    pub config: ClusterConfig,
    pub node_agent: Arc<NodeAgent>,
    pub model_manager: Arc<ModelManager>,
    pub handler_registry: Arc<HandlerRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub pool: PacketPool,
    pub scheduler: Scheduler,
    pub shards: Arc<WorkShardPool>,
    pub registry: Arc<dyn ServiceRegistry>,
    /// Cancelled on registry disconnect or an explicit `Server::shutdown`
    /// call — the single signal both the listener and the discovery
    /// watcher select against (`spec.md` §4.9: "on registry disconnect,
    /// close the cluster").
    pub shutdown: CancellationToken,
    next_session_id: AtomicI64,
}

impl ClusterContext {
    #[must_use]
    pub fn new(
        config: ClusterConfig,
        node_agent: Arc<NodeAgent>,
        handler_registry: Arc<HandlerRegistry>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Arc<Self> {
        let model_manager = Arc::new(ModelManager::new(handler_registry.clone()));
        let shards = Arc::new(config.work_shard_count.map_or_else(WorkShardPool::new_default, WorkShardPool::new));
        let scheduler = Scheduler::with_wheel(config.timer_slot_num, config.timer_tick);
        Arc::new(Self {
            config,
            node_agent,
            model_manager,
            handler_registry,
            sessions: Arc::new(SessionRegistry::new()),
            pool: PacketPool::new(),
            scheduler,
            shards,
            registry,
            shutdown: CancellationToken::new(),
            next_session_id: AtomicI64::new(1),
        })
    }

    /// `session.DefaultConnSession.SessionID()` — a fresh id for every
    /// newly accepted socket, before it is known to be a client or a peer.
    pub fn alloc_session_id(&self) -> i64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }
}
