//! failover-daemon library: CLI arguments and the event logger.
//!
//! Kept separate from `main.rs` so tests can reach them.

pub mod cli;
pub mod listener;

pub use cli::Args;
pub use listener::LogListener;
