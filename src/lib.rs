//! Let an automated agent drive tmux panes.
//!
//! The interesting parts are [`stabilize`] (run a command and decide when its
//! output is done), [`watch`] (wait for a line matching a pattern) and
//! [`security`] (prefix-based command risk triage). [`tools`] exposes them,
//! together with thin pass-through tools, over the MCP server in [`mcp`].

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod log;
pub mod mcp;
pub mod screen;
pub mod security;
pub mod shell_completion;
pub mod stabilize;
pub mod tmux;
pub mod tools;
pub mod watch;
