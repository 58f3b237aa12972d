use thiserror::Error;

/// The composed error taxonomy for the cluster core. Leaf crates keep their
/// own `thiserror` enums (`mesh_packet::CodecError`, `mesh_session::SessionError`,
/// `mesh_model::DispatchError`, `mesh_discovery::DiscoveryError`); this type
/// wraps them at the root where routing decisions are made.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("codec: {0}")]
    Codec(#[from] mesh_packet::CodecError),
    #[error("session: {0}")]
    Session(#[from] mesh_session::SessionError),
    #[error("session {0} not found")]
    SessionNotFound(i64),
    #[error("node class {0} not found")]
    NodeClassNotFound(String),
    #[error("node class {0} has no instances")]
    NodeClassEmpty(String),
    #[error("node id {0} not found in conn manager")]
    NodeNotConnected(String),
    #[error("session {0} has no gate binding")]
    GateNotFound(i64),
    #[error("dispatch: {0}")]
    Dispatch(#[from] mesh_model::DispatchError),
    #[error("model: {0}")]
    Model(#[from] mesh_model::ModelError),
    #[error("discovery: {0}")]
    Discovery(#[from] mesh_discovery::DiscoveryError),
    #[error("malformed control payload: {0}")]
    MalformedControl(#[from] serde_json::Error),
    #[error("work shard queue full")]
    ShardFull,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} of {1} fan-out attempts failed: {2:?}")]
    Joined(usize, usize, Vec<ClusterError>),
}

impl ClusterError {
    /// Collapse a fan-out's per-recipient results the way `errors.Join` does:
    /// every attempt is independent, and the composite preserves every
    /// sub-error rather than short-circuiting on the first one.
    pub fn join(attempted: usize, errors: Vec<ClusterError>) -> Result<(), ClusterError> {
        if errors.is_empty() {
            Ok(())
        } else {
            let failed = errors.len();
            Err(ClusterError::Joined(failed, attempted, errors))
        }
    }
}
