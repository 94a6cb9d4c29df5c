//! Point-in-time screen reads.
//!
//! A [`ScreenSnapshot`] is captured fresh on every read and never cached.
//! [`capture`] truncates from the top; callers that want the most recent
//! rows read more and slice from the end.

use crate::backend::{SessionHandle, TerminalBackend};
use crate::error::AgentResult;

/// Rows read for the short previews shown after input is sent.
pub const PREVIEW_CAPTURE_LINES: usize = 10;
/// Rows shown in those previews.
pub const PREVIEW_LINES: usize = 5;

/// Visible rows, cursor position and cumulative line count of one pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    /// Visible rows, top to bottom.
    pub lines: Vec<String>,
    pub cursor_x: usize,
    pub cursor_y: usize,
    /// Scrollback plus visible rows. Never less than `lines.len()`.
    pub total_line_count: usize,
}

impl ScreenSnapshot {
    pub fn new(lines: Vec<String>, cursor_x: usize, cursor_y: usize, total_line_count: usize) -> Self {
        let total_line_count = total_line_count.max(lines.len());
        Self {
            lines,
            cursor_x,
            cursor_y,
            total_line_count,
        }
    }

    /// Keep only the first `max_lines` visible rows.
    pub fn truncate_top(mut self, max_lines: usize) -> Self {
        self.lines.truncate(max_lines);
        self
    }
}

/// Read a session's screen. `max_lines` keeps the first N rows, not the last.
pub async fn capture(
    backend: &dyn TerminalBackend,
    session: &SessionHandle,
    max_lines: Option<usize>,
) -> AgentResult<ScreenSnapshot> {
    let snapshot = backend.screen(session).await?;
    Ok(match max_lines {
        Some(max) => snapshot.truncate_top(max),
        None => snapshot,
    })
}

/// Drop trailing rows that are blank after trimming, stopping at the first
/// non-blank one.
pub fn trim_trailing_empty(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

/// Last `n` entries of `lines`.
pub fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}

/// Short preview of what a pane shows right now: the first
/// [`PREVIEW_CAPTURE_LINES`] rows, trimmed, and the last [`PREVIEW_LINES`] of
/// those. `(empty)` when nothing is left.
pub async fn preview(backend: &dyn TerminalBackend, session: &SessionHandle) -> AgentResult<String> {
    let mut lines = capture(backend, session, Some(PREVIEW_CAPTURE_LINES)).await?.lines;
    trim_trailing_empty(&mut lines);
    Ok(render_preview(&lines))
}

pub fn render_preview(lines: &[String]) -> String {
    if lines.is_empty() {
        "(empty)".to_string()
    } else {
        tail(lines, PREVIEW_LINES).join("\n")
    }
}
