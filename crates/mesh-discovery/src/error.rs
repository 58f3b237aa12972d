use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("service registry: connect failed: {0}")]
    Connect(String),
    #[error("service registry: grant lease failed: {0}")]
    Grant(String),
    #[error("service registry: put failed: {0}")]
    Put(String),
    #[error("service registry: keep-alive failed: {0}")]
    KeepAlive(String),
    #[error("service registry: list failed: {0}")]
    List(String),
    #[error("service registry: watch failed: {0}")]
    Watch(String),
    #[error("service registry: malformed key {0:?}")]
    MalformedKey(String),
}
