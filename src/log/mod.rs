//! Audit trail: one JSON object per line for everything sent to a pane.
//!
//! Each line carries an RFC 3339 timestamp, the event tag and its data, so
//! the file can be tailed, grepped or loaded into anything that reads JSON
//! lines. Logging is optional; tools write through `AgentContext::record`,
//! which does nothing when no log is configured.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::security::SecurityLevel;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A structured event in the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// A command was submitted to a pane.
    CommandSent {
        session: String,
        command: String,
        level: SecurityLevel,
    },
    /// The command's output stabilized or its deadline passed.
    CommandFinished {
        session: String,
        command: String,
        output_lines: usize,
        timed_out: bool,
    },
    /// A pattern watch concluded.
    PatternWatched {
        session: String,
        pattern: String,
        matched: bool,
        matched_lines: usize,
    },
    /// Raw text was typed into a pane. Only the length is kept.
    TextSent {
        session: String,
        length: usize,
        press_enter: bool,
    },
    ControlSent { session: String, key: String },
    /// A session-management action succeeded.
    SessionManaged {
        action: String,
        session: Option<String>,
    },
}

/// Append-only JSON lines writer.
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl AuditLog {
    /// Open (or create) the log at `path`, creating parent directories.
    /// Existing content is kept; new entries are appended.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: AuditEvent) -> Result<()> {
        let entry = AuditEntry {
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize audit entry")?;
        debug!(event = %json, "audit");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("audit log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write audit entry")?;
        writer.flush().context("failed to flush audit log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
