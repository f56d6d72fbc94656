//! mcpmux core - multi-backend MCP session multiplexing
//!
//! One aggregated endpoint, many independently spawned backend MCP servers.
//! This crate holds the registry of live backend sessions, the subprocess
//! session lifecycle, and the name-prefix routing logic; the serving surface
//! lives in the `mcpmux` crate.

mod config;
mod dispatcher;
mod error;
mod registry;
mod session;

pub use config::*;
pub use dispatcher::{Dispatcher, split_identifier};
pub use error::MuxError;
pub use registry::BackendRegistry;
pub use session::{BackendConnection, BackendSession};
