//! `run_command` and `watch_output`.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::{AgentContext, quote};
use crate::error::AgentResult;
use crate::log::AuditEvent;
use crate::security::format_warning;
use crate::stabilize::{CommandOutput, run_and_wait};
use crate::watch::{self, WatchOutcome, compile_pattern};

#[derive(Debug, Deserialize)]
pub struct RunCommandArgs {
    pub command: String,
    /// Seconds. Falls back to `[run_command] default_timeout_secs`.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WatchOutputArgs {
    pub pattern: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub session_id: String,
}

pub async fn run_command(ctx: &AgentContext, args: RunCommandArgs) -> AgentResult<String> {
    let level = ctx.guard.check(&args.command);
    let warning = format_warning(&args.command, level);

    let session = ctx.backend().resolve_session(&args.session_id).await?;
    let timeout_secs = args
        .timeout
        .unwrap_or(ctx.config.run_command.default_timeout_secs);

    info!(session = %session.id, command = %args.command, %level, "running command");
    ctx.record(AuditEvent::CommandSent {
        session: session.id.clone(),
        command: args.command.clone(),
        level,
    });

    let output = run_and_wait(
        ctx.backend(),
        &session,
        &args.command,
        Duration::from_secs(timeout_secs),
        ctx.config.run_command.stabilize(),
    )
    .await?;

    ctx.record(AuditEvent::CommandFinished {
        session: session.id.clone(),
        command: args.command.clone(),
        output_lines: output.lines.len(),
        timed_out: output.timed_out,
    });

    Ok(format_command_result(&args.command, &warning, &output, timeout_secs))
}

/// Warning (if any), the echoed command, the captured lines, and a timeout
/// notice when the deadline was hit.
pub fn format_command_result(
    command: &str,
    warning: &str,
    output: &CommandOutput,
    timeout_secs: u64,
) -> String {
    let mut parts = Vec::with_capacity(4);
    if !warning.is_empty() {
        parts.push(warning.to_string());
    }
    parts.push(format!("$ {command}"));
    parts.push(output.lines.join("\n"));
    if output.timed_out {
        parts.push(format!(
            "\n⏱️ Command timed out after {timeout_secs}s (output may be incomplete)"
        ));
    }
    parts.join("\n")
}

pub async fn watch_output(ctx: &AgentContext, args: WatchOutputArgs) -> AgentResult<String> {
    // Before the session is touched: a bad pattern never waits.
    let regex = compile_pattern(&args.pattern)?;

    let session = ctx.backend().resolve_session(&args.session_id).await?;
    let timeout_secs = args
        .timeout
        .unwrap_or(ctx.config.watch_output.default_timeout_secs);

    info!(session = %session.id, pattern = %args.pattern, timeout_secs, "watching output");
    let outcome = watch::watch(
        ctx.backend(),
        &session,
        &regex,
        Duration::from_secs(timeout_secs),
        ctx.config.watch_output.poll_wait(),
    )
    .await?;

    let (matched, matched_lines) = match &outcome {
        WatchOutcome::Matched { lines } => (true, lines.len()),
        WatchOutcome::TimedOut { .. } => (false, 0),
    };
    ctx.record(AuditEvent::PatternWatched {
        session: session.id.clone(),
        pattern: args.pattern.clone(),
        matched,
        matched_lines,
    });

    Ok(format_watch_result(&args.pattern, &outcome, timeout_secs))
}

pub fn format_watch_result(pattern: &str, outcome: &WatchOutcome, timeout_secs: u64) -> String {
    match outcome {
        WatchOutcome::Matched { lines } => format!(
            "Pattern matched: {}\nMatched lines ({}):\n{}",
            quote(pattern),
            lines.len(),
            lines.join("\n")
        ),
        WatchOutcome::TimedOut { recent } => {
            let recent = if recent.is_empty() {
                "(empty)".to_string()
            } else {
                recent.join("\n")
            };
            format!(
                "⏱️ Timed out after {timeout_secs}s waiting for pattern: {}\n\nLast lines:\n{recent}",
                quote(pattern)
            )
        }
    }
}
