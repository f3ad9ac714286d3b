//! Streamgrab shared library.
//!
//! Wire protocol, framing, error types, output path resolution and
//! progress estimation used by the native messaging host.
pub mod errors;
pub mod framing;
pub mod ipc_protocol;
pub mod progress;
pub mod target;
