//! Shared integration test harness: a loopback TCP pair (no real network
//! namespace needed) and an in-memory fake of [`mesh_discovery::ServiceRegistry`].

mod in_memory_registry;
mod loopback;
mod packets;

pub use in_memory_registry::InMemoryRegistry;
pub use loopback::loopback_pair;
pub use packets::{client_data_frame, heartbeat_frame};
