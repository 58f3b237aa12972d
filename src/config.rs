use std::env;
use std::time::Duration;

/// Cluster-wide runtime configuration, loaded from the environment the way
/// `services/server/src/main.rs` loads `DATABASE_URL`/`BIND_ADDR`: required
/// keys `.expect()`, optional keys `.unwrap_or_else(...)`.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub bind_addr: String,
    pub node_name: String,
    pub node_id: String,
    pub frontend: bool,
    pub routes: Vec<i32>,
    pub registry_endpoint: String,
    pub registry_prefix: String,
    pub registry_lease_ttl: Duration,
    pub heartbeat_send_interval: Duration,
    pub heartbeat_check_interval: Duration,
    pub work_shard_count: Option<usize>,
    pub timer_slot_num: usize,
    pub timer_tick: Duration,
    pub shutdown_deadline: Duration,
}

impl ClusterConfig {
    /// Load from the environment. `NODE_NAME` and `NODE_ID` have no sane
    /// default and must be set; everything else falls back to the values
    /// `spec.md` §4.2/§4.5/§4.9 call out as defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:7000".to_owned()),
            node_name: env::var("NODE_NAME").expect("NODE_NAME must be set"),
            node_id: env::var("NODE_ID").expect("NODE_ID must be set"),
            frontend: env::var("NODE_FRONTEND").map(|v| v == "true" || v == "1").unwrap_or(false),
            routes: env::var("NODE_ROUTES")
                .ok()
                .map(|v| v.split(',').filter(|s| !s.is_empty()).filter_map(|s| s.parse().ok()).collect())
                .unwrap_or_default(),
            registry_endpoint: env::var("REGISTRY_ENDPOINT").unwrap_or_else(|_| "127.0.0.1:2379".to_owned()),
            registry_prefix: env::var("REGISTRY_PREFIX").unwrap_or_else(|_| "/mesh-cluster/nodes".to_owned()),
            registry_lease_ttl: Duration::from_secs(env_u64("REGISTRY_LEASE_TTL_SECS", 5)),
            heartbeat_send_interval: Duration::from_secs(env_u64("HEARTBEAT_SEND_INTERVAL_SECS", 3)),
            heartbeat_check_interval: Duration::from_secs(env_u64("HEARTBEAT_CHECK_INTERVAL_SECS", 5)),
            work_shard_count: env::var("WORK_SHARD_COUNT").ok().and_then(|v| v.parse().ok()),
            timer_slot_num: env_u64("TIMER_SLOT_NUM", mesh_scheduler::DEFAULT_SLOT_NUM as u64) as usize,
            timer_tick: Duration::from_millis(env_u64("TIMER_TICK_MS", mesh_scheduler::DEFAULT_TICK.as_millis() as u64)),
            shutdown_deadline: Duration::from_secs(env_u64("SHUTDOWN_DEADLINE_SECS", 5)),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
