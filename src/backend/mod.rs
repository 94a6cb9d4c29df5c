//! Terminal backend seam.
//!
//! The waiter and watcher only need four things from a terminal: resolve a
//! session, inject text, read the screen, and wait for update notifications.
//! [`TerminalBackend`] exposes those plus the session-management calls used by
//! the pass-through tools. [`tmux::TmuxBackend`] is the production backend.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::AgentResult;
use crate::screen::ScreenSnapshot;

#[cfg(test)]
pub mod fake;
pub mod tmux;

/// A resolved session (a tmux pane).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: String,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One row of a session listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    /// Last non-blank visible line, trimmed.
    pub last_line: String,
}

/// Which way a pane is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    /// New pane below the current one.
    Horizontal,
    /// New pane beside the current one.
    Vertical,
}

impl SplitDirection {
    /// `"vertical"` (any case) is vertical, anything else horizontal.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("vertical") {
            SplitDirection::Vertical
        } else {
            SplitDirection::Horizontal
        }
    }

    pub fn adverb(self) -> &'static str {
        match self {
            SplitDirection::Horizontal => "horizontally",
            SplitDirection::Vertical => "vertically",
        }
    }
}

/// Scoped subscription to a session's screen-update notifications.
///
/// [`close`](UpdateStream::close) releases whatever the backend set up for
/// it. Dropping an unclosed stream releases it too, without waiting.
#[async_trait]
pub trait UpdateStream: Send {
    /// Wait up to `timeout` for the next update. `Ok(true)` if one arrived,
    /// `Ok(false)` if the wait elapsed.
    async fn next_update(&mut self, timeout: Duration) -> Result<bool>;

    /// Release the subscription and wait until the backend has let go.
    /// Failures are logged, not returned.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait TerminalBackend: Send + Sync {
    /// Resolve `id` to a session, or the focused one when `id` is empty.
    ///
    /// Fails with `SessionNotFound` for an unknown explicit id and
    /// `NoActiveSession` when nothing is focused.
    async fn resolve_session(&self, id: &str) -> AgentResult<SessionHandle>;

    /// Inject literal text. No newline is added.
    async fn send_text(&self, session: &SessionHandle, text: &str) -> Result<()>;

    /// Fresh read of the whole visible screen.
    async fn screen(&self, session: &SessionHandle) -> Result<ScreenSnapshot>;

    async fn subscribe_updates(&self, session: &SessionHandle) -> Result<Box<dyn UpdateStream>>;

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;

    /// Open a new window and return its session.
    async fn create_window(&self) -> Result<SessionHandle>;

    async fn split(&self, session: &SessionHandle, direction: SplitDirection) -> Result<SessionHandle>;

    async fn close(&self, session: &SessionHandle) -> Result<()>;

    async fn focus(&self, session: &SessionHandle) -> Result<()>;
}

/// Last non-blank line of `lines`, trimmed.
pub fn last_non_empty(lines: &[String]) -> String {
    lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}
