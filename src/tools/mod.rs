//! Agent-facing tools.
//!
//! Every tool receives the [`AgentContext`] explicitly: the backend, the
//! command classifier, the effective configuration and the optional audit log.
//! Tools return text. Lookup and backend failures come back flagged as errors;
//! input mistakes (bad regex, unknown control key or action) come back as plain
//! text so the agent can correct and retry.

pub mod command;
pub mod input;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backend::TerminalBackend;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::log::{AuditEvent, AuditLog};
use crate::mcp::protocol::RpcError;
use crate::mcp::{ToolDefinition, ToolHandler, ToolResult};
use crate::security::SecurityGuard;

/// State shared by every tool call. Built once at startup.
pub struct AgentContext {
    pub backend: Arc<dyn TerminalBackend>,
    pub guard: SecurityGuard,
    pub config: AgentConfig,
    pub audit: Option<AuditLog>,
}

impl AgentContext {
    pub fn new(backend: Arc<dyn TerminalBackend>, config: AgentConfig, audit: Option<AuditLog>) -> Self {
        Self {
            backend,
            guard: config.security.guard(),
            config,
            audit,
        }
    }

    pub fn backend(&self) -> &dyn TerminalBackend {
        self.backend.as_ref()
    }

    /// Append to the audit log if one is configured. Write failures are
    /// logged and otherwise ignored.
    pub fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(event) {
                warn!(error = %e, path = %audit.path().display(), "failed to write audit entry");
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, RpcError> {
    serde_json::from_value(arguments).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn into_tool_result(tool: &str, outcome: AgentResult<String>) -> ToolResult {
    match outcome {
        Ok(text) => ToolResult::text(text),
        Err(e) if e.is_user_input() => {
            debug!(%tool, error = %e, "tool input rejected");
            ToolResult::text(e.to_string())
        }
        Err(e) => {
            warn!(%tool, error = %format!("{e:#}"), "tool failed");
            ToolResult::error(format!("{e:#}"))
        }
    }
}

#[async_trait]
impl ToolHandler for AgentContext {
    fn tools(&self) -> Vec<ToolDefinition> {
        definitions(&self.config)
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, RpcError> {
        let outcome = match name {
            "run_command" => command::run_command(self, parse_args(arguments)?).await,
            "watch_output" => command::watch_output(self, parse_args(arguments)?).await,
            "read_screen" => session::read_screen(self, parse_args(arguments)?).await,
            "manage_session" => session::manage_session(self, parse_args(arguments)?).await,
            "send_text" => input::send_text(self, parse_args(arguments)?).await,
            "send_control" => input::send_control(self, parse_args(arguments)?).await,
            other => return Err(RpcError::InvalidParams(format!("unknown tool: {other}"))),
        };
        Ok(into_tool_result(name, outcome))
    }
}

/// Quote text for display, escaping quotes, backslashes and control
/// characters. Single quotes unless the text contains one and no double quote.
pub fn quote(text: &str) -> String {
    let delim = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delim);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

const SESSION_ID_DESCRIPTION: &str =
    "Target pane id (e.g. %3) or tmux target. Empty string uses the active pane.";

/// `tools/list` entries. Defaults reflect the effective configuration.
pub fn definitions(config: &AgentConfig) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "run_command",
            "Execute a shell command in a tmux pane and return its output. Waits until the \
             output stops changing or the timeout passes. Risky commands are returned with a \
             warning.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute." },
                    "timeout": {
                        "type": "integer",
                        "minimum": 0,
                        "default": config.run_command.default_timeout_secs,
                        "description": "Maximum seconds to wait for the command to finish."
                    },
                    "session_id": { "type": "string", "default": "", "description": SESSION_ID_DESCRIPTION }
                },
                "required": ["command"]
            }),
        ),
        ToolDefinition::new(
            "watch_output",
            "Wait until a line on screen matches a regular expression. Useful for waiting on \
             a server to start or a build to finish.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression searched for in each screen line." },
                    "timeout": {
                        "type": "integer",
                        "minimum": 0,
                        "default": config.watch_output.default_timeout_secs,
                        "description": "Maximum seconds to wait before giving up."
                    },
                    "session_id": { "type": "string", "default": "", "description": SESSION_ID_DESCRIPTION }
                },
                "required": ["pattern"]
            }),
        ),
        ToolDefinition::new(
            "read_screen",
            "Read the visible contents of a tmux pane, with cursor position.",
            json!({
                "type": "object",
                "properties": {
                    "lines": {
                        "type": "integer",
                        "default": -1,
                        "description": "Number of rows to read from the top. -1 reads every visible row."
                    },
                    "session_id": { "type": "string", "default": "", "description": SESSION_ID_DESCRIPTION }
                }
            }),
        ),
        ToolDefinition::new(
            "send_text",
            "Type text into a tmux pane without pressing Enter unless asked. For REPLs, TUIs \
             and interactive prompts.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to send." },
                    "press_enter": { "type": "boolean", "default": false, "description": "Press Enter after the text." },
                    "session_id": { "type": "string", "default": "", "description": SESSION_ID_DESCRIPTION }
                },
                "required": ["text"]
            }),
        ),
        ToolDefinition::new(
            "send_control",
            "Send a control key to a tmux pane: C (interrupt), Z (suspend), D (EOF), L (clear), \
             ESCAPE, A (line start), E (line end), U (kill line), K (kill to end), W (kill word), \
             R (reverse search).",
            json!({
                "type": "object",
                "properties": {
                    "character": {
                        "type": "string",
                        "enum": input::control_names(),
                        "description": "Control key name, case-insensitive."
                    },
                    "session_id": { "type": "string", "default": "", "description": SESSION_ID_DESCRIPTION }
                },
                "required": ["character"]
            }),
        ),
        ToolDefinition::new(
            "manage_session",
            "Manage tmux panes: list all panes, create a window, split a pane, close or focus one.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": session::ACTIONS,
                        "description": "One of list, create, split, close, focus."
                    },
                    "session_id": {
                        "type": "string",
                        "default": "",
                        "description": "Target pane. Required for close and focus, optional for split."
                    },
                    "direction": {
                        "type": "string",
                        "enum": ["horizontal", "vertical"],
                        "default": "horizontal",
                        "description": "Split direction. vertical places the new pane beside the current one."
                    }
                },
                "required": ["action"]
            }),
        ),
    ]
}
