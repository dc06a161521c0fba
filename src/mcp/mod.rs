//! The External Tool Protocol (ETP) client: MCP-wire-compatible
//! JSON-RPC over stdio or streamable HTTP.

pub mod client;
pub mod http_transport;
pub mod manager;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use manager::EtpManager;
pub use types::{CallToolResult, McpContent, McpTool};
