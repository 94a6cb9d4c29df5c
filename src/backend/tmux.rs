//! tmux implementation of [`TerminalBackend`].
//!
//! Screen reads combine `capture-pane` with pane metrics. Update
//! notifications come from `pipe-pane`: every byte the pane emits is appended
//! to a private capture file, and growth of that file counts as an update.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{SessionHandle, SessionSummary, SplitDirection, TerminalBackend, UpdateStream, last_non_empty};
use crate::error::{AgentError, AgentResult};
use crate::screen::ScreenSnapshot;
use crate::tmux::Tmux;

/// How often the pipe-pane capture file is checked for growth.
const PIPE_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct TmuxBackend {
    tmux: Tmux,
}

impl TmuxBackend {
    pub fn new(tmux: Tmux) -> Self {
        Self { tmux }
    }
}

#[async_trait]
impl TerminalBackend for TmuxBackend {
    async fn resolve_session(&self, id: &str) -> AgentResult<SessionHandle> {
        if id.is_empty() {
            return match self.tmux.pane_id(None).await? {
                Some(pane) => Ok(SessionHandle::new(pane)),
                None => Err(AgentError::NoActiveSession),
            };
        }

        match self.tmux.pane_id(Some(id)).await? {
            Some(pane) => Ok(SessionHandle::new(pane)),
            None => Err(AgentError::SessionNotFound(id.to_string())),
        }
    }

    async fn send_text(&self, session: &SessionHandle, text: &str) -> Result<()> {
        self.tmux.send_literal(&session.id, text).await
    }

    async fn screen(&self, session: &SessionHandle) -> Result<ScreenSnapshot> {
        let lines = self.tmux.capture_pane(&session.id).await?;
        let metrics = self.tmux.pane_metrics(&session.id).await?;
        Ok(ScreenSnapshot::new(
            lines,
            metrics.cursor_x,
            metrics.cursor_y,
            metrics.total_lines(),
        ))
    }

    async fn subscribe_updates(&self, session: &SessionHandle) -> Result<Box<dyn UpdateStream>> {
        let stream = PipeUpdates::start(self.tmux.clone(), &session.id).await?;
        Ok(Box::new(stream))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for pane in self.tmux.list_all_panes().await? {
            let lines = self.tmux.capture_pane(&pane).await?;
            sessions.push(SessionSummary {
                last_line: last_non_empty(&lines),
                id: pane,
            });
        }
        Ok(sessions)
    }

    async fn create_window(&self) -> Result<SessionHandle> {
        let pane = if self.tmux.has_sessions().await {
            self.tmux.new_window().await?
        } else {
            self.tmux.new_session(None, None).await?
        };
        Ok(SessionHandle::new(pane))
    }

    async fn split(&self, session: &SessionHandle, direction: SplitDirection) -> Result<SessionHandle> {
        let pane = self
            .tmux
            .split_window(&session.id, direction == SplitDirection::Vertical)
            .await?;
        Ok(SessionHandle::new(pane))
    }

    async fn close(&self, session: &SessionHandle) -> Result<()> {
        self.tmux.kill_pane(&session.id).await
    }

    async fn focus(&self, session: &SessionHandle) -> Result<()> {
        self.tmux.select_pane(&session.id).await
    }
}

/// Update stream backed by a pipe-pane capture file.
///
/// The pipe is stopped and the file removed when the stream is dropped.
pub struct PipeUpdates {
    tmux: Tmux,
    pane: String,
    path: PathBuf,
    position: u64,
    stopped: bool,
}

impl PipeUpdates {
    pub async fn start(tmux: Tmux, pane: &str) -> Result<Self> {
        let path = std::env::temp_dir().join(format!("tmux-agent-{}.log", Uuid::new_v4()));
        tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("failed to create capture file {}", path.display()))?;

        // Construct first so Drop cleans up the file if pipe-pane fails.
        let stream = Self {
            tmux,
            pane: pane.to_string(),
            path,
            position: 0,
            stopped: false,
        };
        stream.tmux.pipe_pane(&stream.pane, &stream.path).await?;
        debug!(pane = %stream.pane, file = %stream.path.display(), "update stream opened");
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn current_len(&self) -> Result<u64> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e)
                .with_context(|| format!("failed to stat capture file {}", self.path.display())),
        }
    }
}

#[async_trait]
impl UpdateStream for PipeUpdates {
    async fn next_update(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let len = self.current_len().await?;
            if len > self.position {
                self.position = len;
                return Ok(true);
            }
            // truncated underneath us
            self.position = len;

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep((deadline - now).min(PIPE_POLL_INTERVAL)).await;
        }
    }

    async fn close(mut self: Box<Self>) {
        if let Err(e) = self.tmux.stop_pipe_pane(&self.pane).await {
            warn!(pane = %self.pane, error = %e, "failed to stop pipe-pane");
        }
        self.stopped = true;
    }
}

impl Drop for PipeUpdates {
    fn drop(&mut self) {
        if !self.stopped {
            // Unclosed: an error path or a cancelled call.
            let tmux = self.tmux.clone();
            let pane = self.pane.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = tmux.stop_pipe_pane(&pane).await {
                            warn!(pane = %pane, error = %e, "failed to stop pipe-pane");
                        }
                    });
                }
                Err(_) => {
                    if let Err(e) = tmux.stop_pipe_pane_blocking(&pane) {
                        warn!(pane = %pane, error = %e, "failed to stop pipe-pane");
                    }
                }
            }
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %self.path.display(), error = %e, "failed to remove capture file");
            }
        }
        debug!(pane = %self.pane, "update stream closed");
    }
}
