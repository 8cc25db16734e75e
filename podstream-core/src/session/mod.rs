//! The session manager and the pieces it owns.
//!
//! [`SessionManager`] is the handle callers hold. Behind it a single task
//! (`driver`) owns the socket, the state machine and the reconnect timer,
//! and feeds decoded output into the shared [`OutputBuffer`].

pub mod buffer;
pub mod config;
mod driver;
mod manager;

pub use buffer::{BufferPolicy, OutputBuffer, OutputChunk};
pub use config::SessionOptions;
pub use manager::SessionManager;
