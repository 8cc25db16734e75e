//! # podstream-attach
//!
//! Command-line viewport for pod sessions: tail a pod's logs or open an
//! interactive shell, with the session's reconnection handled by
//! `podstream-core`.

pub mod config;
pub mod viewport;
