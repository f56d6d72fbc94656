//! mcpmux - one MCP endpoint, many backends
//!
//! Serves a single stdio MCP endpoint whose tool surface is the union of
//! every connected backend server's tools, namespaced as `backend:tool`.
//! Backends are spawned subprocesses managed at runtime through the
//! endpoint's own `connect-server` / `disconnect-server` tools.

mod server;

pub use server::{MuxServer, SessionDefaults};

// Re-export core functionality
pub use mcpmux_core::*;
