//! Run a command and wait for its output to go quiet.
//!
//! The shell gives no completion signal, so completion is inferred from the
//! update-notification stream: after the command is submitted, the waiter
//! waits in bounded windows and declares the output stable once
//! `idle_threshold` consecutive windows pass without an update. Any update
//! resets the count. The overall deadline is checked before every window;
//! hitting it is reported, not raised, and whatever is on screen is still
//! returned.
//!
//! ```text
//! baseline snapshot → send "<cmd>\r" → subscribe
//!   loop: remaining <= 0        → timed out
//!         update within window  → idle = 0
//!         window elapsed        → idle += 1, stop at threshold
//! final snapshot → new lines = total growth, sliced from the bottom
//! ```

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{SessionHandle, TerminalBackend, UpdateStream};
use crate::error::AgentResult;
use crate::screen::{self, ScreenSnapshot, trim_trailing_empty};

/// Consecutive idle windows that mean "done".
pub const DEFAULT_IDLE_THRESHOLD: u32 = 2;
/// Length of one idle window.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(1);

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at roughly thirty years out.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Debounce parameters for the stabilization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilizeSettings {
    pub idle_threshold: u32,
    pub idle_wait: Duration,
}

impl Default for StabilizeSettings {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            idle_wait: DEFAULT_IDLE_WAIT,
        }
    }
}

/// What the loop decided after one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Waiting,
    Stable,
}

/// State of one execute-and-wait cycle.
#[derive(Debug, Clone)]
pub struct StabilizationRun {
    pub baseline_line_count: usize,
    pub deadline: Instant,
    pub idle_cycles: u32,
    settings: StabilizeSettings,
}

impl StabilizationRun {
    pub fn new(baseline_line_count: usize, timeout: Duration, settings: StabilizeSettings) -> Self {
        Self {
            baseline_line_count,
            deadline: deadline_after(timeout),
            idle_cycles: 0,
            settings,
        }
    }

    /// Time left before the deadline, `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Length of the next wait: one idle window, clipped to the deadline.
    pub fn next_wait(&self, remaining: Duration) -> Duration {
        self.settings.idle_wait.min(remaining)
    }

    /// Fresh output arrived.
    pub fn record_update(&mut self) -> RunState {
        self.idle_cycles = 0;
        RunState::Waiting
    }

    /// A window elapsed with no update.
    pub fn record_idle(&mut self) -> RunState {
        self.idle_cycles += 1;
        if self.idle_cycles >= self.settings.idle_threshold {
            RunState::Stable
        } else {
            RunState::Waiting
        }
    }
}

/// Output captured for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Newly produced lines, trailing blanks removed.
    pub lines: Vec<String>,
    pub timed_out: bool,
    pub baseline_line_count: usize,
    pub final_line_count: usize,
}

/// Send `command` followed by a carriage return and wait for its output to
/// stabilize, or for `timeout` to pass.
///
/// The session must already be resolved; nothing here retries.
// TODO: serialize run/watch loops per session. Two loops on one pane see
// each other's output growth and both extractions are corrupted.
pub async fn run_and_wait(
    backend: &dyn TerminalBackend,
    session: &SessionHandle,
    command: &str,
    timeout: Duration,
    settings: StabilizeSettings,
) -> AgentResult<CommandOutput> {
    let baseline = backend.screen(session).await?;
    let baseline_line_count = baseline.total_line_count;

    // CR, not LF: what the line discipline expects for "submit".
    backend.send_text(session, &format!("{command}\r")).await?;

    let mut run = StabilizationRun::new(baseline_line_count, timeout, settings);
    let mut updates = backend.subscribe_updates(session).await?;
    let waited = wait_for_quiet(updates.as_mut(), &mut run).await;
    updates.close().await;
    let timed_out = waited?;

    let final_snapshot = screen::capture(backend, session, None).await?;
    let final_line_count = final_snapshot.total_line_count;
    let lines = extract_new_lines(&final_snapshot, baseline_line_count);

    if timed_out {
        info!(session = %session.id, timeout_secs = timeout.as_secs(), "command timed out before output stabilized");
    } else {
        debug!(
            session = %session.id,
            new_lines = final_line_count.saturating_sub(baseline_line_count),
            "command output stabilized"
        );
    }

    Ok(CommandOutput {
        lines,
        timed_out,
        baseline_line_count,
        final_line_count,
    })
}

/// Debounce loop. `Ok(true)` means the deadline passed first.
async fn wait_for_quiet(updates: &mut dyn UpdateStream, run: &mut StabilizationRun) -> Result<bool> {
    loop {
        let Some(remaining) = run.remaining() else {
            return Ok(true);
        };
        let state = if updates.next_update(run.next_wait(remaining)).await? {
            run.record_update()
        } else {
            run.record_idle()
        };
        if state == RunState::Stable {
            return Ok(false);
        }
    }
}

/// Lines produced since the baseline.
///
/// If the total grew by `k` and `k` rows are visible, the output is the last
/// `k` visible rows. Otherwise (no growth, or more than a screen) it falls
/// back to the whole visible screen. Trailing blank rows are dropped.
pub fn extract_new_lines(final_snapshot: &ScreenSnapshot, baseline_line_count: usize) -> Vec<String> {
    let visible = &final_snapshot.lines;
    let new_line_count = final_snapshot
        .total_line_count
        .checked_sub(baseline_line_count)
        .unwrap_or(0);

    let mut lines = if new_line_count > 0 && new_line_count <= visible.len() {
        visible[visible.len() - new_line_count..].to_vec()
    } else {
        visible.clone()
    };
    trim_trailing_empty(&mut lines);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_elapsed(actual: Duration, expected: Duration) {
        let slack = Duration::from_millis(5);
        assert!(
            actual >= expected && actual <= expected + slack,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn snapshot(lines: &[&str], total: usize) -> ScreenSnapshot {
        ScreenSnapshot::new(strings(lines), 0, 0, total)
    }

    #[test]
    fn extracts_last_k_visible_lines() {
        let snap = snapshot(&["old 1", "old 2", "$ ls", "a.txt", "b.txt"], 105);
        assert_eq!(extract_new_lines(&snap, 102), strings(&["$ ls", "a.txt", "b.txt"]));
    }

    #[test]
    fn falls_back_to_whole_screen_without_growth() {
        let snap = snapshot(&["$ clear", "prompt$"], 50);
        assert_eq!(extract_new_lines(&snap, 50), strings(&["$ clear", "prompt$"]));
        // total shrank (history cleared)
        assert_eq!(extract_new_lines(&snap, 80), strings(&["$ clear", "prompt$"]));
    }

    #[test]
    fn falls_back_when_growth_exceeds_screen() {
        let snap = snapshot(&["x", "y"], 500);
        assert_eq!(extract_new_lines(&snap, 10), strings(&["x", "y"]));
    }

    #[test]
    fn extraction_trims_trailing_blank_rows() {
        let snap = snapshot(&["keep", "$ make", "done", "", "  "], 25);
        assert_eq!(extract_new_lines(&snap, 21), strings(&["$ make", "done"]));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_counter_resets_on_update() {
        let mut run = StabilizationRun::new(0, Duration::from_secs(30), StabilizeSettings::default());
        assert_eq!(run.record_idle(), RunState::Waiting);
        assert_eq!(run.record_update(), RunState::Waiting);
        assert_eq!(run.idle_cycles, 0);
        assert_eq!(run.record_idle(), RunState::Waiting);
        assert_eq!(run.record_idle(), RunState::Stable);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_saturates_instead_of_overflowing() {
        let run = StabilizationRun::new(0, Duration::from_secs(u64::MAX), StabilizeSettings::default());
        let remaining = run.remaining().unwrap();
        assert!(remaining >= Duration::from_secs(86_400 * 365));
        assert_eq!(run.next_wait(remaining), DEFAULT_IDLE_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_clipped_to_remaining_time() {
        let run = StabilizationRun::new(0, Duration::from_millis(300), StabilizeSettings::default());
        let remaining = run.remaining().unwrap();
        assert_eq!(run.next_wait(remaining), Duration::from_millis(300));

        let expired = StabilizationRun::new(0, Duration::ZERO, StabilizeSettings::default());
        assert!(expired.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_command_with_carriage_return() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);

        run_and_wait(&backend, &session, "ls -la", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap();

        assert_eq!(backend.sent("%1"), vec!["ls -la\r".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_two_idle_windows_after_output_quiets() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);
        backend.queue_output("%1", &["building...", "done"]);
        // updates at 0.5s, 1.0s, ..., 3.0s, then silence
        backend.script_periodic_updates("%1", Duration::from_millis(500), Duration::from_secs(3));

        let start = Instant::now();
        let out = run_and_wait(&backend, &session, "make", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(!out.timed_out);
        // quiet at T=3s, stable after two 1s windows
        assert_elapsed(elapsed, Duration::from_secs(5));
        assert_eq!(out.lines, strings(&["$ make", "building...", "done"]));
        assert_eq!(out.final_line_count - out.baseline_line_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_command_stabilizes_after_two_windows() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);

        let start = Instant::now();
        let out = run_and_wait(&backend, &session, "true", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap();

        assert!(!out.timed_out);
        assert_elapsed(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn endless_output_hits_deadline_and_keeps_partial_output() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);
        backend.queue_output("%1", &["tick 1", "tick 2"]);
        backend.script_periodic_updates("%1", Duration::from_millis(200), Duration::from_secs(600));

        let start = Instant::now();
        let out = run_and_wait(&backend, &session, "tail -f log", Duration::from_secs(5), StabilizeSettings::default())
            .await
            .unwrap();

        assert!(out.timed_out);
        assert!(start.elapsed() <= Duration::from_secs(5) + Duration::from_millis(5));
        assert_eq!(out.lines, strings(&["$ tail -f log", "tick 1", "tick 2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_times_out_immediately() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);

        let out = run_and_wait(&backend, &session, "ls", Duration::ZERO, StabilizeSettings::default())
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(backend.sent("%1"), vec!["ls\r".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_released_on_every_exit_path() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);

        run_and_wait(&backend, &session, "ls", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap();
        assert_eq!(backend.open_streams(), 0);

        backend.script_periodic_updates("%1", Duration::from_millis(100), Duration::from_secs(60));
        let out = run_and_wait(&backend, &session, "yes", Duration::from_secs(1), StabilizeSettings::default())
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(backend.closed_streams(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_closed_even_when_wait_fails() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);
        backend.set_update_error("%1");

        let err = run_and_wait(&backend, &session, "ls", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("update stream failed"));
        assert_eq!(backend.open_streams(), 0);
        assert_eq!(backend.closed_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scrolled_output_beyond_screen_returns_visible_rows() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);
        backend.set_rows("%1", 3);
        backend.queue_output("%1", &["1", "2", "3", "4", "5"]);

        let out = run_and_wait(&backend, &session, "seq 5", Duration::from_secs(30), StabilizeSettings::default())
            .await
            .unwrap();
        // 6 new lines, only 3 visible
        assert_eq!(out.lines, strings(&["3", "4", "5"]));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_idle_settings_are_honoured() {
        let backend = FakeBackend::new();
        let session = backend.add_session("%1", &["prompt$"]);
        let settings = StabilizeSettings {
            idle_threshold: 3,
            idle_wait: Duration::from_millis(250),
        };

        let start = Instant::now();
        run_and_wait(&backend, &session, "pwd", Duration::from_secs(30), settings)
            .await
            .unwrap();
        assert_elapsed(start.elapsed(), Duration::from_millis(750));
    }
}
