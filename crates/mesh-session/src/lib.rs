//! Session state, the write-serializing connection wrapper, and the
//! in-memory session registry.

mod connection;
mod network_entities;
mod session_registry;

pub use connection::Connection;
pub use network_entities::{NetworkEntities, Session, SessionError};
pub use session_registry::SessionRegistry;
