//! `send_text` and `send_control`: raw input followed by a short screen preview.

use serde::Deserialize;
use tracing::debug;

use super::{AgentContext, quote};
use crate::error::{AgentError, AgentResult};
use crate::log::AuditEvent;
use crate::screen;

/// Control keys by name, alphabetical.
const CONTROL_KEYS: &[(&str, &str)] = &[
    ("A", "\x01"),      // line start
    ("C", "\x03"),      // interrupt
    ("D", "\x04"),      // EOF
    ("E", "\x05"),      // line end
    ("ESCAPE", "\x1b"),
    ("K", "\x0b"),      // kill to end of line
    ("L", "\x0c"),      // clear screen
    ("R", "\x12"),      // reverse search
    ("U", "\x15"),      // kill line
    ("W", "\x17"),      // kill word
    ("Z", "\x1a"),      // suspend
];

pub fn control_names() -> Vec<&'static str> {
    CONTROL_KEYS.iter().map(|(name, _)| *name).collect()
}

/// Look up a control key, case-insensitively. Returns the canonical name and
/// the byte to send.
pub fn control_sequence(token: &str) -> AgentResult<(&'static str, &'static str)> {
    let key = token.to_uppercase();
    CONTROL_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .copied()
        .ok_or_else(|| AgentError::InvalidControlToken {
            token: token.to_string(),
            valid: control_names().join(", "),
        })
}

fn control_label(key: &str) -> String {
    if key == "ESCAPE" {
        "Escape".to_string()
    } else {
        format!("Ctrl+{key}")
    }
}

#[derive(Debug, Deserialize)]
pub struct SendTextArgs {
    pub text: String,
    #[serde(default)]
    pub press_enter: bool,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendControlArgs {
    pub character: String,
    #[serde(default)]
    pub session_id: String,
}

pub async fn send_text(ctx: &AgentContext, args: SendTextArgs) -> AgentResult<String> {
    let session = ctx.backend().resolve_session(&args.session_id).await?;

    ctx.backend().send_text(&session, &args.text).await?;
    if args.press_enter {
        ctx.backend().send_text(&session, "\r").await?;
    }
    debug!(session = %session.id, len = args.text.len(), press_enter = args.press_enter, "text sent");
    ctx.record(AuditEvent::TextSent {
        session: session.id.clone(),
        length: args.text.chars().count(),
        press_enter: args.press_enter,
    });

    tokio::time::sleep(ctx.config.input.settle()).await;
    let preview = screen::preview(ctx.backend(), &session).await?;

    let action = if args.press_enter {
        "sent + Enter"
    } else {
        "sent (no Enter)"
    };
    Ok(format!(
        "Text {action}: {}\n\nScreen (last lines):\n{preview}",
        quote(&args.text)
    ))
}

pub async fn send_control(ctx: &AgentContext, args: SendControlArgs) -> AgentResult<String> {
    let (key, sequence) = control_sequence(&args.character)?;
    let session = ctx.backend().resolve_session(&args.session_id).await?;

    ctx.backend().send_text(&session, sequence).await?;
    debug!(session = %session.id, %key, "control key sent");
    ctx.record(AuditEvent::ControlSent {
        session: session.id.clone(),
        key: key.to_string(),
    });

    tokio::time::sleep(ctx.config.input.settle()).await;
    let preview = screen::preview(ctx.backend(), &session).await?;

    Ok(format!(
        "Sent: {}\n\nScreen (last lines):\n{preview}",
        control_label(key)
    ))
}
