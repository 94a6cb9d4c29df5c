//! Model Context Protocol surface: JSON-RPC framing, the stdio server loop,
//! and the tool listing/result types.

pub mod protocol;
pub mod server;
pub mod types;

pub use server::{McpServer, ToolHandler};
pub use types::{ToolDefinition, ToolResult};
