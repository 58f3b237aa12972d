//! Typed handler registry and per-model mailbox dispatch — the reflection-free
//! replacement for the source's `sync.Map` + `proto.Clone` prototype registry.

mod handler_registry;
mod model_manager;

pub use handler_registry::{DispatchError, HandlerRegistry};
pub use model_manager::{Model, ModelError, ModelManager};
