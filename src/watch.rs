//! Wait until a screen line matches a regular expression.
//!
//! The screen is checked before every wait, so content that was already there
//! when the watch began (an instant command, say) matches without any update
//! notification. Waits on the update stream are bounded; a wait that elapses
//! just means "look again".

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{SessionHandle, TerminalBackend, UpdateStream};
use crate::error::{AgentError, AgentResult};
use crate::screen::{self, PREVIEW_CAPTURE_LINES, PREVIEW_LINES, tail, trim_trailing_empty};
use crate::stabilize::deadline_after;

/// Longest single wait between screen checks.
pub const DEFAULT_POLL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Every visible line that matched, in on-screen order.
    Matched { lines: Vec<String> },
    /// Deadline passed. Up to five recent non-blank lines for context.
    TimedOut { recent: Vec<String> },
}

/// Compile a watch pattern, reporting failures as [`AgentError::InvalidPattern`].
pub fn compile_pattern(pattern: &str) -> AgentResult<Regex> {
    Regex::new(pattern).map_err(|e| AgentError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Lines containing a match anywhere in them.
pub fn matching_lines(lines: &[String], pattern: &Regex) -> Vec<String> {
    lines
        .iter()
        .filter(|line| pattern.is_match(line))
        .cloned()
        .collect()
}

pub async fn watch(
    backend: &dyn TerminalBackend,
    session: &SessionHandle,
    pattern: &Regex,
    timeout: Duration,
    poll_wait: Duration,
) -> AgentResult<WatchOutcome> {
    let deadline = deadline_after(timeout);

    let mut updates = backend.subscribe_updates(session).await?;
    let found = poll_for_match(backend, session, pattern, updates.as_mut(), deadline, poll_wait).await;
    updates.close().await;
    if let Some(lines) = found? {
        debug!(session = %session.id, matched = lines.len(), "watch pattern matched");
        return Ok(WatchOutcome::Matched { lines });
    }

    let mut lines = screen::capture(backend, session, Some(PREVIEW_CAPTURE_LINES))
        .await?
        .lines;
    trim_trailing_empty(&mut lines);
    let recent = tail(&lines, PREVIEW_LINES).to_vec();

    debug!(session = %session.id, pattern = %pattern, "watch timed out");
    Ok(WatchOutcome::TimedOut { recent })
}

/// Check, then wait, until a match or the deadline. `None` on timeout.
async fn poll_for_match(
    backend: &dyn TerminalBackend,
    session: &SessionHandle,
    pattern: &Regex,
    updates: &mut dyn UpdateStream,
    deadline: Instant,
    poll_wait: Duration,
) -> AgentResult<Option<Vec<String>>> {
    loop {
        let snapshot = screen::capture(backend, session, None).await?;
        let lines = matching_lines(&snapshot.lines, pattern);
        if !lines.is_empty() {
            return Ok(Some(lines));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        updates.next_update(poll_wait.min(remaining)).await?;
    }
}
