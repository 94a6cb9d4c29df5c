use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tmux_agent::backend::tmux::TmuxBackend;
use tmux_agent::cli::{Cli, Command};
use tmux_agent::config::AgentConfig;
use tmux_agent::log::AuditLog;
use tmux_agent::mcp::McpServer;
use tmux_agent::security::format_warning;
use tmux_agent::shell_completion;
use tmux_agent::tmux::{self, Tmux};
use tmux_agent::tools::AgentContext;

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .tmux-agent/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<22} {value}\n"));
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn render_config_human(config: &AgentConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("tmux\n");
    push_kv(
        &mut output,
        "socket",
        config.tmux.socket.as_deref().unwrap_or("(default)"),
    );
    output.push('\n');

    output.push_str("run_command\n");
    push_kv(
        &mut output,
        "default_timeout",
        format!("{}s", config.run_command.default_timeout_secs),
    );
    push_kv(
        &mut output,
        "idle_wait",
        format!("{}ms", config.run_command.idle_wait_millis),
    );
    push_kv(&mut output, "idle_cycles", config.run_command.idle_cycles);
    output.push('\n');

    output.push_str("watch_output\n");
    push_kv(
        &mut output,
        "default_timeout",
        format!("{}s", config.watch_output.default_timeout_secs),
    );
    push_kv(
        &mut output,
        "poll_wait",
        format!("{}ms", config.watch_output.poll_wait_millis),
    );
    output.push('\n');

    output.push_str("input\n");
    push_kv(
        &mut output,
        "settle",
        format!("{}ms", config.input.settle_millis),
    );
    output.push('\n');

    output.push_str("security\n");
    push_kv(
        &mut output,
        "extra_dangerous",
        list_or_none(&config.security.extra_dangerous),
    );
    push_kv(&mut output, "extra_safe", list_or_none(&config.security.extra_safe));
    push_kv(
        &mut output,
        "extra_caution",
        list_or_none(&config.security.extra_caution),
    );
    output.push('\n');

    output.push_str("audit\n");
    push_kv(
        &mut output,
        "path",
        config
            .audit
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(disabled)".to_string()),
    );
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &AgentConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "source_path".to_string(),
            serde_json::Value::String(config_source_label(config_path)),
        );
    }
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

async fn doctor(config: &AgentConfig) -> Result<()> {
    let version = tmux::check_tmux()?;
    let mut output = String::new();
    push_kv(&mut output, "tmux", &version.raw);
    push_kv(
        &mut output,
        "version",
        if version.known_good() { "ok" } else { "unsupported" },
    );
    let tmux = Tmux::new(config.tmux.socket.clone());
    push_kv(
        &mut output,
        "socket",
        tmux.socket().unwrap_or("(default)"),
    );
    push_kv(
        &mut output,
        "server",
        if tmux.has_sessions().await {
            "running"
        } else {
            "not running"
        },
    );
    print!("{output}");

    if !version.known_good() {
        anyhow::bail!(version.remediation_message());
    }
    Ok(())
}

async fn serve(config: AgentConfig, config_path: Option<&Path>, cwd: &Path) -> Result<()> {
    match tmux::check_tmux() {
        Ok(version) if version.known_good() => info!(version = %version.raw, "tmux detected"),
        Ok(version) => warn!("{}", version.remediation_message()),
        Err(e) => warn!(error = %e, "tmux unavailable; tool calls will fail until it is installed"),
    }

    let audit = match config.audit_path(config_path, cwd) {
        Some(path) => {
            let log = AuditLog::new(&path)?;
            info!(path = %path.display(), "audit log enabled");
            Some(log)
        }
        None => None,
    };

    let backend = Arc::new(TmuxBackend::new(Tmux::new(config.tmux.socket.clone())));
    let context = Arc::new(AgentContext::new(backend, config, audit));
    let server = McpServer::new(context);

    tokio::select! {
        result = server.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_server = matches!(&cli.command, Command::Serve);

    let filter = match cli.verbose {
        0 if is_server => "tmux_agent=info",
        0 => "tmux_agent=warn",
        1 => "tmux_agent=debug",
        _ => "tmux_agent=trace",
    };
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = AgentConfig::load(&cwd)?;

    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .tmux-agent/config.toml found, using defaults"),
    }

    match cli.command {
        Command::Serve => serve(config, config_path.as_deref(), &cwd).await?,
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
        Command::Classify { command } => {
            let command = command.join(" ");
            let level = config.security.guard().check(&command);
            println!("{level}");
            let warning = format_warning(&command, level);
            if !warning.is_empty() {
                println!("{warning}");
            }
        }
        Command::Doctor => doctor(&config).await?,
        Command::Completions { shell } => shell_completion::print(shell)?,
    }

    Ok(())
}
