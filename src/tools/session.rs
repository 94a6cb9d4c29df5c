//! `read_screen` and `manage_session`.

use serde::Deserialize;
use tracing::info;

use super::AgentContext;
use crate::backend::SplitDirection;
use crate::error::{AgentError, AgentResult};
use crate::log::AuditEvent;
use crate::screen::{self, trim_trailing_empty};

pub const ACTIONS: &[&str] = &["list", "create", "split", "close", "focus"];

/// Longest last-line excerpt shown per pane in a listing.
const LIST_LINE_WIDTH: usize = 80;

fn default_lines() -> i64 {
    -1
}

fn default_direction() -> String {
    "horizontal".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ReadScreenArgs {
    /// Rows to read from the top; negative reads everything visible.
    #[serde(default = "default_lines")]
    pub lines: i64,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ManageSessionArgs {
    pub action: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "default_direction")]
    pub direction: String,
}

pub async fn read_screen(ctx: &AgentContext, args: ReadScreenArgs) -> AgentResult<String> {
    let session = ctx.backend().resolve_session(&args.session_id).await?;
    let max_lines = usize::try_from(args.lines).ok();

    let snapshot = screen::capture(ctx.backend(), &session, max_lines).await?;
    let mut lines = snapshot.lines;
    trim_trailing_empty(&mut lines);

    Ok(format!(
        "Session: {}\nCursor: line {}, column {}\nLines: {}\n---\n{}",
        session.id,
        snapshot.cursor_y,
        snapshot.cursor_x,
        lines.len(),
        lines.join("\n")
    ))
}

pub async fn manage_session(ctx: &AgentContext, args: ManageSessionArgs) -> AgentResult<String> {
    let (text, session) = match args.action.as_str() {
        "list" => (list_sessions(ctx).await?, None),
        "create" => {
            let session = ctx.backend().create_window().await?;
            (
                format!("Created new window. Session ID: {}", session.id),
                Some(session.id),
            )
        }
        "split" => {
            let target = ctx.backend().resolve_session(&args.session_id).await?;
            let direction = SplitDirection::parse(&args.direction);
            let session = ctx.backend().split(&target, direction).await?;
            (
                format!(
                    "Split {}. New session ID: {}",
                    direction.adverb(),
                    session.id
                ),
                Some(session.id),
            )
        }
        "close" => {
            let target = resolve_required(ctx, "close", &args.session_id).await?;
            ctx.backend().close(&target).await?;
            (
                format!("Closed session: {}", args.session_id),
                Some(target.id),
            )
        }
        "focus" => {
            let target = resolve_required(ctx, "focus", &args.session_id).await?;
            ctx.backend().focus(&target).await?;
            (
                format!("Focused session: {}", args.session_id),
                Some(target.id),
            )
        }
        other => {
            return Err(AgentError::ValidationError(format!(
                "Unknown action: '{other}'. Valid actions: {}",
                ACTIONS.join(", ")
            )));
        }
    };

    info!(action = %args.action, session = ?session, "session managed");
    ctx.record(AuditEvent::SessionManaged {
        action: args.action,
        session,
    });
    Ok(text)
}

async fn resolve_required(
    ctx: &AgentContext,
    action: &str,
    session_id: &str,
) -> AgentResult<crate::backend::SessionHandle> {
    if session_id.is_empty() {
        return Err(AgentError::ValidationError(format!(
            "session_id is required for {action} action."
        )));
    }
    ctx.backend().resolve_session(session_id).await
}

async fn list_sessions(ctx: &AgentContext) -> AgentResult<String> {
    let sessions = ctx.backend().list_sessions().await?;
    if sessions.is_empty() {
        return Ok("No sessions found.".to_string());
    }

    let rows: Vec<String> = sessions
        .iter()
        .map(|s| {
            let excerpt: String = s.last_line.chars().take(LIST_LINE_WIDTH).collect();
            format!("  {}  |  {excerpt}", s.id)
        })
        .collect();
    Ok(format!("Sessions ({}):\n{}", rows.len(), rows.join("\n")))
}
