pub mod mcp_server;

pub use mcp_server::{tool_err, tool_ok};
