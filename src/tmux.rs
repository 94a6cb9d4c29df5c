//! tmux CLI wrapper.
//!
//! Thin async helpers over `tmux` subcommands: pane resolution, screen
//! capture, literal key injection, pipe-pane output mirroring, and pane
//! lifecycle. Every invocation goes through [`Tmux`] so an optional `-L`
//! socket name is applied consistently.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info};

/// Format string used to report a pane's scrollback and cursor state.
const METRICS_FORMAT: &str = "#{history_size} #{pane_height} #{cursor_x} #{cursor_y}";

/// Size given to sessions we create ourselves so the PTY isn't tiny.
const NEW_SESSION_COLS: &str = "220";
const NEW_SESSION_ROWS: &str = "50";

/// Parsed `tmux -V` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxVersion {
    pub raw: String,
    pub version: Option<(u32, u32)>,
}

impl TmuxVersion {
    /// 3.0+ has every format variable and flag this crate relies on.
    pub fn known_good(&self) -> bool {
        matches!(self.version, Some((major, _)) if major >= 3)
    }

    pub fn remediation_message(&self) -> String {
        format!(
            "tmux version check failed (detected '{}'). tmux-agent needs `capture-pane`, \
             `pipe-pane` and `display-message` format support. Install or upgrade tmux \
             (recommended >= 3.0).",
            self.raw
        )
    }
}

/// Scrollback and cursor metrics for one pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneMetrics {
    pub history_size: usize,
    pub height: usize,
    pub cursor_x: usize,
    pub cursor_y: usize,
}

impl PaneMetrics {
    /// Scrollback plus visible rows.
    pub fn total_lines(&self) -> usize {
        self.history_size + self.height
    }
}

/// Check that tmux is installed and reachable.
pub fn check_tmux() -> Result<TmuxVersion> {
    let output = std::process::Command::new("tmux")
        .arg("-V")
        .output()
        .context("tmux not found — install tmux (e.g., `apt install tmux` or `brew install tmux`)")?;

    if !output.status.success() {
        bail!(
            "tmux -V failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(version = %raw, "tmux found");
    Ok(TmuxVersion {
        version: parse_tmux_version(&raw),
        raw,
    })
}

fn parse_tmux_version(version_raw: &str) -> Option<(u32, u32)> {
    let raw = version_raw.trim();
    let ver = raw
        .strip_prefix("tmux ")
        .map(|v| v.strip_prefix("next-").unwrap_or(v))?;
    let mut chars = ver.chars().peekable();

    let mut major = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            major.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    if major.is_empty() {
        return None;
    }

    if chars.next()? != '.' {
        return None;
    }

    let minor: String = chars.take_while(|c| c.is_ascii_digit()).collect();
    if minor.is_empty() {
        return None;
    }

    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_metrics(raw: &str) -> Option<PaneMetrics> {
    let mut fields = raw.split_whitespace().map(|f| f.parse::<usize>());
    let history_size = fields.next()?.ok()?;
    let height = fields.next()?.ok()?;
    let cursor_x = fields.next()?.ok()?;
    let cursor_y = fields.next()?.ok()?;
    Some(PaneMetrics {
        history_size,
        height,
        cursor_x,
        cursor_y,
    })
}

fn no_server(stderr: &str) -> bool {
    stderr.contains("no server running") || stderr.contains("error connecting")
}

/// Handle on a tmux server, optionally selected by socket name.
#[derive(Debug, Clone, Default)]
pub struct Tmux {
    socket: Option<String>,
}

impl Tmux {
    pub fn new(socket: Option<String>) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("tmux");
        if let Some(socket) = &self.socket {
            cmd.args(["-L", socket]);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command()
            .args(args)
            .output()
            .await
            .context("failed to run tmux command")
    }

    /// Run a tmux subcommand and return its trimmed stdout, failing on a
    /// non-zero exit.
    async fn run_checked<I, S>(&self, what: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {what} failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Whether the server has at least one session.
    pub async fn has_sessions(&self) -> bool {
        self.run(["has-session"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Resolve a target to its pane id (`%N`). `None` asks tmux for the
    /// current pane.
    ///
    /// Returns `Ok(None)` when tmux cannot resolve the target.
    pub async fn pane_id(&self, target: Option<&str>) -> Result<Option<String>> {
        let mut args = vec!["display-message", "-p"];
        if let Some(target) = target {
            args.extend(["-t", target]);
        }
        args.push("#{pane_id}");

        let output = self.run(args).await?;
        if !output.status.success() {
            debug!(
                target = target.unwrap_or("(current)"),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tmux could not resolve pane"
            );
            return Ok(None);
        }

        let pane = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!pane.is_empty()).then_some(pane))
    }

    /// Capture the visible content of a pane, one entry per row.
    pub async fn capture_pane(&self, target: &str) -> Result<Vec<String>> {
        let output = self
            .run(["capture-pane", "-p", "-t", target])
            .await
            .with_context(|| format!("failed to capture pane for target '{target}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux capture-pane failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Scrollback size, pane height and cursor position.
    pub async fn pane_metrics(&self, target: &str) -> Result<PaneMetrics> {
        let raw = self
            .run_checked("display-message", ["display-message", "-p", "-t", target, METRICS_FORMAT])
            .await
            .with_context(|| format!("failed to query pane metrics for '{target}'"))?;

        match parse_metrics(&raw) {
            Some(metrics) => Ok(metrics),
            None => bail!("unexpected pane metrics from tmux for '{target}': {raw:?}"),
        }
    }

    /// Send text to a pane literally. No Enter is appended; a `\r` inside
    /// `text` is delivered as-is.
    pub async fn send_literal(&self, target: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        // `-l` so punctuation is not interpreted as tmux key names.
        self.run_checked("send-keys", ["send-keys", "-t", target, "-l", "--", text])
            .await
            .with_context(|| format!("failed to send keys to target '{target}'"))?;

        debug!(target = target, bytes = text.len(), "sent keys");
        Ok(())
    }

    /// Mirror all pane output into `log_path` via `pipe-pane`.
    pub async fn pipe_pane(&self, target: &str, log_path: &Path) -> Result<()> {
        let pipe_cmd = format!("cat >> '{}'", log_path.display());
        self.run_checked("pipe-pane", ["pipe-pane", "-t", target, pipe_cmd.as_str()])
            .await
            .with_context(|| format!("failed to set up pipe-pane for target '{target}'"))?;

        debug!(target = target, log = %log_path.display(), "pipe-pane configured");
        Ok(())
    }

    /// Stop any pipe-pane on `target`.
    pub async fn stop_pipe_pane(&self, target: &str) -> Result<()> {
        self.run_checked("pipe-pane", ["pipe-pane", "-t", target])
            .await
            .with_context(|| format!("failed to stop pipe-pane for target '{target}'"))?;
        Ok(())
    }

    /// Blocking [`Tmux::stop_pipe_pane`] for callers outside a runtime.
    pub fn stop_pipe_pane_blocking(&self, target: &str) -> Result<()> {
        let mut cmd = std::process::Command::new("tmux");
        if let Some(socket) = &self.socket {
            cmd.args(["-L", socket]);
        }
        let output = cmd
            .args(["pipe-pane", "-t", target])
            .output()
            .with_context(|| format!("failed to stop pipe-pane for target '{target}'"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux pipe-pane stop failed: {}", stderr.trim());
        }
        Ok(())
    }

    /// All pane ids across every session and window, in tmux order.
    ///
    /// An absent server is reported as no panes.
    pub async fn list_all_panes(&self) -> Result<Vec<String>> {
        let output = self
            .run(["list-panes", "-a", "-F", "#{pane_id}"])
            .await
            .context("failed to list tmux panes")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if no_server(&stderr) {
                return Ok(Vec::new());
            }
            bail!("tmux list-panes failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Create a detached session and return its first pane id.
    pub async fn new_session(&self, name: Option<&str>, work_dir: Option<&str>) -> Result<String> {
        let mut args = vec!["new-session", "-d", "-P", "-F", "#{pane_id}"];
        if let Some(name) = name {
            args.extend(["-s", name]);
        }
        if let Some(dir) = work_dir {
            args.extend(["-c", dir]);
        }
        args.extend(["-x", NEW_SESSION_COLS, "-y", NEW_SESSION_ROWS]);

        let pane = self
            .run_checked("new-session", args)
            .await
            .context("failed to create tmux session")?;
        info!(pane = %pane, session = name.unwrap_or("(auto)"), "tmux session created");
        Ok(pane)
    }

    /// Open a new window in the current session and return its pane id.
    pub async fn new_window(&self) -> Result<String> {
        let pane = self
            .run_checked("new-window", ["new-window", "-P", "-F", "#{pane_id}"])
            .await
            .context("failed to create tmux window")?;
        info!(pane = %pane, "tmux window created");
        Ok(pane)
    }

    /// Split `target` and return the new pane id. `side_by_side` places the
    /// new pane to the right rather than below.
    pub async fn split_window(&self, target: &str, side_by_side: bool) -> Result<String> {
        let flag = if side_by_side { "-h" } else { "-v" };
        let pane = self
            .run_checked(
                "split-window",
                ["split-window", flag, "-t", target, "-P", "-F", "#{pane_id}"],
            )
            .await
            .with_context(|| format!("failed to split pane '{target}'"))?;
        info!(target = target, pane = %pane, side_by_side, "pane split");
        Ok(pane)
    }

    pub async fn kill_pane(&self, target: &str) -> Result<()> {
        self.run_checked("kill-pane", ["kill-pane", "-t", target])
            .await
            .with_context(|| format!("failed to kill pane '{target}'"))?;
        info!(target = target, "pane killed");
        Ok(())
    }

    /// Make `target` the active pane of its window and the window current.
    pub async fn select_pane(&self, target: &str) -> Result<()> {
        self.run_checked("select-window", ["select-window", "-t", target])
            .await
            .with_context(|| format!("failed to select window of '{target}'"))?;
        self.run_checked("select-pane", ["select-pane", "-t", target])
            .await
            .with_context(|| format!("failed to select pane '{target}'"))?;
        Ok(())
    }

    /// Kill the whole server behind this socket. Used to tear down test servers.
    pub async fn kill_server(&self) -> Result<()> {
        let output = self.run(["kill-server"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !no_server(&stderr) {
                bail!("tmux kill-server failed: {}", stderr.trim());
            }
        }
        Ok(())
    }
}
