//! Shared tracing setup for the netprobe binaries.

mod subscriber;

pub use subscriber::{init, init_with_level};
