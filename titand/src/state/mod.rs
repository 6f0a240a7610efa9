//! Actor-owned access to the durable store

mod manager;
mod messages;

pub use manager::StateHandle;
pub use messages::{StateCommand, StateError, StateResponse};
