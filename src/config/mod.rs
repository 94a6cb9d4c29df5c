use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::security::SecurityGuard;
use crate::stabilize::StabilizeSettings;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".tmux-agent";

fn default_run_timeout_secs() -> u64 {
    30
}

fn default_idle_wait_millis() -> u64 {
    1000
}

fn default_idle_cycles() -> u32 {
    2
}

fn default_watch_timeout_secs() -> u64 {
    60
}

fn default_poll_wait_millis() -> u64 {
    2000
}

fn default_settle_millis() -> u64 {
    500
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TmuxSettings {
    /// Socket name passed to every tmux invocation as `-L <socket>`.
    #[serde(default)]
    pub socket: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunCommandSettings {
    #[serde(default = "default_run_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_idle_wait_millis")]
    pub idle_wait_millis: u64,
    #[serde(default = "default_idle_cycles")]
    pub idle_cycles: u32,
}

impl Default for RunCommandSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_run_timeout_secs(),
            idle_wait_millis: default_idle_wait_millis(),
            idle_cycles: default_idle_cycles(),
        }
    }
}

impl RunCommandSettings {
    pub fn stabilize(&self) -> StabilizeSettings {
        StabilizeSettings {
            // zero would declare every command stable before it runs
            idle_threshold: self.idle_cycles.max(1),
            idle_wait: Duration::from_millis(self.idle_wait_millis),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WatchOutputSettings {
    #[serde(default = "default_watch_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_poll_wait_millis")]
    pub poll_wait_millis: u64,
}

impl Default for WatchOutputSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_watch_timeout_secs(),
            poll_wait_millis: default_poll_wait_millis(),
        }
    }
}

impl WatchOutputSettings {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_millis)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InputSettings {
    /// Pause after `send_text` / `send_control` before the screen preview.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            settle_millis: default_settle_millis(),
        }
    }
}

impl InputSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }
}

/// Extra classification prefixes, appended to the built-in sets.
///
/// ```toml
/// [security]
/// extra_dangerous = ["terraform destroy"]
/// extra_safe = ["just --list"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SecuritySettings {
    #[serde(default)]
    pub extra_dangerous: Vec<String>,
    #[serde(default)]
    pub extra_safe: Vec<String>,
    #[serde(default)]
    pub extra_caution: Vec<String>,
}

impl SecuritySettings {
    pub fn guard(&self) -> SecurityGuard {
        SecurityGuard::with_extra(&self.extra_dangerous, &self.extra_safe, &self.extra_caution)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AuditSettings {
    /// JSON-lines audit file. Relative paths resolve against the directory
    /// that holds `.tmux-agent/`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub tmux: TmuxSettings,
    #[serde(default)]
    pub run_command: RunCommandSettings,
    #[serde(default)]
    pub watch_output: WatchOutputSettings,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub audit: AuditSettings,
}

impl AgentConfig {
    /// Search upward from `start` for a `.tmux-agent/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AgentConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((AgentConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Where the audit log goes, if enabled.
    ///
    /// `config_path` is the file the config came from; relative audit paths
    /// are anchored at its project root, otherwise at `cwd`.
    pub fn audit_path(&self, config_path: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
        let path = self.audit.path.as_ref()?;
        if path.is_absolute() {
            return Some(path.clone());
        }
        let root = config_path
            .and_then(Path::parent)
            .and_then(Path::parent)
            .unwrap_or(cwd);
        Some(root.join(path))
    }
}
