//! In-memory backend for exercising the waiter, watcher and tools without tmux.
//!
//! Update notifications follow a scripted timeline relative to the moment a
//! subscription opens, so tests under `tokio::time::pause` are deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::time::{Instant, sleep_until};

use super::{SessionHandle, SessionSummary, SplitDirection, TerminalBackend, UpdateStream, last_non_empty};
use crate::error::{AgentError, AgentResult};
use crate::screen::ScreenSnapshot;

const DEFAULT_ROWS: usize = 50;

struct FakePane {
    id: String,
    /// Every line ever written; the last `rows` are visible.
    content: Vec<String>,
    rows: usize,
    sent: Vec<String>,
    /// Lines appended after the echoed command on the next submit.
    queued_output: VecDeque<Vec<String>>,
    /// Lines that appear on screen once their instant passes.
    scheduled: Vec<(Instant, Vec<String>)>,
    /// Update offsets handed to the next subscription.
    update_script: Vec<Duration>,
    screen_reads: usize,
    /// Next subscription's stream errors on its first wait.
    fail_updates: bool,
}

impl FakePane {
    fn new(id: &str, lines: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            content: lines.iter().map(|l| l.to_string()).collect(),
            rows: DEFAULT_ROWS,
            sent: Vec::new(),
            queued_output: VecDeque::new(),
            scheduled: Vec::new(),
            update_script: Vec::new(),
            screen_reads: 0,
            fail_updates: false,
        }
    }

    fn apply_scheduled(&mut self) {
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|(at, _)| *at <= now);
        self.scheduled = pending;
        for (_, lines) in due {
            self.content.extend(lines);
        }
    }

    fn snapshot(&self) -> ScreenSnapshot {
        let start = self.content.len().saturating_sub(self.rows);
        let lines = self.content[start..].to_vec();
        let cursor_y = lines.len().saturating_sub(1);
        let cursor_x = lines.last().map(|l| l.chars().count()).unwrap_or(0);
        ScreenSnapshot::new(lines, cursor_x, cursor_y, self.content.len())
    }
}

#[derive(Default)]
struct FakeState {
    panes: Vec<FakePane>,
    focused: Option<String>,
    next_id: usize,
}

impl FakeState {
    fn pane_mut(&mut self, id: &str) -> Result<&mut FakePane> {
        match self.panes.iter_mut().find(|p| p.id == id) {
            Some(pane) => Ok(pane),
            None => bail!("fake pane {id} does not exist"),
        }
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("%{}", 100 + self.next_id)
    }
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    open_streams: Arc<AtomicUsize>,
    closed_streams: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pane showing `lines`. The first pane added becomes focused.
    pub fn add_session(&self, id: &str, lines: &[&str]) -> SessionHandle {
        let mut state = self.state.lock().unwrap();
        state.panes.push(FakePane::new(id, lines));
        if state.focused.is_none() {
            state.focused = Some(id.to_string());
        }
        SessionHandle::new(id)
    }

    pub fn set_rows(&self, id: &str, rows: usize) {
        self.state.lock().unwrap().pane_mut(id).unwrap().rows = rows;
    }

    pub fn clear_focus(&self) {
        self.state.lock().unwrap().focused = None;
    }

    /// Output produced by the next submitted command.
    pub fn queue_output(&self, id: &str, lines: &[&str]) {
        let lines = lines.iter().map(|l| l.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .pane_mut(id)
            .unwrap()
            .queued_output
            .push_back(lines);
    }

    /// Lines that show up on screen `after` from now.
    pub fn schedule_lines(&self, id: &str, after: Duration, lines: &[&str]) {
        let lines = lines.iter().map(|l| l.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .pane_mut(id)
            .unwrap()
            .scheduled
            .push((Instant::now() + after, lines));
    }

    /// Update offsets, relative to subscription time, for the next subscriber.
    pub fn script_updates(&self, id: &str, offsets: Vec<Duration>) {
        self.state.lock().unwrap().pane_mut(id).unwrap().update_script = offsets;
    }

    /// Make the next subscription's stream fail on its first wait.
    pub fn set_update_error(&self, id: &str) {
        self.state.lock().unwrap().pane_mut(id).unwrap().fail_updates = true;
    }

    /// Updates every `every` until `until`, starting one interval in.
    pub fn script_periodic_updates(&self, id: &str, every: Duration, until: Duration) {
        let mut offsets = Vec::new();
        let mut at = every;
        while at <= until {
            offsets.push(at);
            at += every;
        }
        self.script_updates(id, offsets);
    }

    pub fn sent(&self, id: &str) -> Vec<String> {
        self.state.lock().unwrap().pane_mut(id).unwrap().sent.clone()
    }

    pub fn screen_reads(&self, id: &str) -> usize {
        self.state.lock().unwrap().pane_mut(id).unwrap().screen_reads
    }

    pub fn session_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.panes.iter().map(|p| p.id.clone()).collect()
    }

    pub fn focused(&self) -> Option<String> {
        self.state.lock().unwrap().focused.clone()
    }

    /// Subscriptions not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Subscriptions released through `close` rather than a bare drop.
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TerminalBackend for FakeBackend {
    async fn resolve_session(&self, id: &str) -> AgentResult<SessionHandle> {
        let state = self.state.lock().unwrap();
        if id.is_empty() {
            return state
                .focused
                .clone()
                .map(SessionHandle::new)
                .ok_or(AgentError::NoActiveSession);
        }
        if state.panes.iter().any(|p| p.id == id) {
            Ok(SessionHandle::new(id))
        } else {
            Err(AgentError::SessionNotFound(id.to_string()))
        }
    }

    async fn send_text(&self, session: &SessionHandle, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pane = state.pane_mut(&session.id)?;
        pane.sent.push(text.to_string());
        if let Some(command) = text.strip_suffix('\r') {
            pane.content.push(format!("$ {command}"));
            if let Some(output) = pane.queued_output.pop_front() {
                pane.content.extend(output);
            }
        }
        Ok(())
    }

    async fn screen(&self, session: &SessionHandle) -> Result<ScreenSnapshot> {
        let mut state = self.state.lock().unwrap();
        let pane = state.pane_mut(&session.id)?;
        pane.apply_scheduled();
        pane.screen_reads += 1;
        Ok(pane.snapshot())
    }

    async fn subscribe_updates(&self, session: &SessionHandle) -> Result<Box<dyn UpdateStream>> {
        let mut state = self.state.lock().unwrap();
        let pane = state.pane_mut(&session.id)?;
        let start = Instant::now();
        let times = pane.update_script.drain(..).map(|d| start + d).collect();
        let fail = std::mem::take(&mut pane.fail_updates);
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedUpdates {
            times,
            fail,
            open: Arc::clone(&self.open_streams),
            closed: Arc::clone(&self.closed_streams),
        }))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .panes
            .iter_mut()
            .map(|pane| {
                pane.apply_scheduled();
                SessionSummary {
                    id: pane.id.clone(),
                    last_line: last_non_empty(&pane.snapshot().lines),
                }
            })
            .collect())
    }

    async fn create_window(&self) -> Result<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id();
        state.panes.push(FakePane::new(&id, &[]));
        Ok(SessionHandle::new(id))
    }

    async fn split(&self, session: &SessionHandle, _direction: SplitDirection) -> Result<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        state.pane_mut(&session.id)?;
        let id = state.allocate_id();
        state.panes.push(FakePane::new(&id, &[]));
        Ok(SessionHandle::new(id))
    }

    async fn close(&self, session: &SessionHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pane_mut(&session.id)?;
        state.panes.retain(|p| p.id != session.id);
        if state.focused.as_deref() == Some(session.id.as_str()) {
            state.focused = None;
        }
        Ok(())
    }

    async fn focus(&self, session: &SessionHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pane_mut(&session.id)?;
        state.focused = Some(session.id.clone());
        Ok(())
    }
}

/// Update stream that replays a fixed timeline. Updates whose instant has
/// already passed are delivered immediately, one per call.
pub struct ScriptedUpdates {
    times: VecDeque<Instant>,
    fail: bool,
    open: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl UpdateStream for ScriptedUpdates {
    async fn next_update(&mut self, timeout: Duration) -> Result<bool> {
        if self.fail {
            bail!("update stream failed");
        }
        let limit = Instant::now() + timeout;
        match self.times.front().copied() {
            Some(at) if at <= limit => {
                self.times.pop_front();
                sleep_until(at).await;
                Ok(true)
            }
            _ => {
                sleep_until(limit).await;
                Ok(false)
            }
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScriptedUpdates {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
