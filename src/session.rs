//! Session controller and its collaborators

mod connection;
mod controller;
/// Session error types
pub mod error;
mod hooks;
mod status;

pub use connection::SessionConnection;
pub use controller::{ConnectionState, SessionBuilder, SessionController};
pub use error::{ArgumentError, BatchError, SessionError};
pub use hooks::{HookId, HookKind, LifecycleHook, lifecycle_hook};
pub use status::StatusPublisher;
