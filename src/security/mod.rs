//! Command risk classification.
//!
//! Commands are normalized (trimmed, lower-cased) and matched by prefix
//! against three rule sets. Precedence is fixed: dangerous, then safe, then
//! caution. Anything unmatched is treated as caution.

use std::fmt;

use serde::Serialize;

/// Risk level assigned to a shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Safe,
    Caution,
    Dangerous,
}

impl SecurityLevel {
    pub fn label(self) -> &'static str {
        match self {
            SecurityLevel::Safe => "safe",
            SecurityLevel::Caution => "caution",
            SecurityLevel::Dangerous => "dangerous",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Read-only or informational commands.
pub const SAFE_PREFIXES: &[&str] = &[
    "ls",
    "pwd",
    "echo",
    "cat",
    "head",
    "tail",
    "wc",
    "date",
    "whoami",
    "which",
    "where",
    "file",
    "stat",
    "df",
    "du",
    "uname",
    "hostname",
    "env",
    "printenv",
    "id",
    "groups",
    "uptime",
    "ps",
    "top",
    "htop",
    "git status",
    "git log",
    "git diff",
    "git branch",
    "git remote",
    "python --version",
    "python3 --version",
    "node --version",
    "npm --version",
    "pip --version",
    "pip3 --version",
    "cargo --version",
    "go version",
    "java --version",
];

/// Commands that modify the system.
pub const CAUTION_PREFIXES: &[&str] = &[
    "cd",
    "mkdir",
    "touch",
    "cp",
    "mv",
    "git add",
    "git commit",
    "git checkout",
    "git switch",
    "git merge",
    "git rebase",
    "git push",
    "git pull",
    "git fetch",
    "git stash",
    "npm install",
    "npm run",
    "pip install",
    "pip3 install",
    "cargo build",
    "cargo run",
    "go build",
    "go run",
    "make",
    "cmake",
    "docker",
    "docker-compose",
    "brew install",
    "brew update",
    "brew upgrade",
];

/// Destructive commands or ones that need elevated privileges.
pub const DANGEROUS_PREFIXES: &[&str] = &[
    "rm",
    "sudo",
    "chmod",
    "chown",
    "chgrp",
    "kill",
    "killall",
    "pkill",
    "dd",
    "mkfs",
    "fdisk",
    "mount",
    "umount",
    "iptables",
    "systemctl",
    "launchctl",
    "curl | sh",
    "curl | bash",
    "wget | sh",
    "wget | bash",
    "git push --force",
    "git reset --hard",
    "git clean -f",
    "> /dev/",
    ">> /dev/",
];

/// Prefix-based command classifier.
///
/// Holds the built-in rule sets plus any extra prefixes from configuration.
/// Matching is `starts_with` on the normalized command, not token-based, so
/// `"rmdir"` is caught by `"rm"`.
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    dangerous: Vec<String>,
    safe: Vec<String>,
    caution: Vec<String>,
}

impl Default for SecurityGuard {
    fn default() -> Self {
        Self {
            dangerous: to_owned(DANGEROUS_PREFIXES),
            safe: to_owned(SAFE_PREFIXES),
            caution: to_owned(CAUTION_PREFIXES),
        }
    }
}

fn to_owned(prefixes: &[&str]) -> Vec<String> {
    prefixes.iter().map(|p| p.to_string()).collect()
}

fn normalize(prefixes: &[String]) -> impl Iterator<Item = String> + '_ {
    prefixes
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
}

impl SecurityGuard {
    /// Built-in rules extended with extra prefixes. Empty entries are ignored.
    pub fn with_extra(dangerous: &[String], safe: &[String], caution: &[String]) -> Self {
        let mut guard = Self::default();
        guard.dangerous.extend(normalize(dangerous));
        guard.safe.extend(normalize(safe));
        guard.caution.extend(normalize(caution));
        guard
    }

    /// Classify a command. Total over all inputs.
    pub fn check(&self, command: &str) -> SecurityLevel {
        let lower = command.trim().to_lowercase();
        let matches = |set: &[String]| set.iter().any(|prefix| lower.starts_with(prefix.as_str()));

        if matches(&self.dangerous) {
            return SecurityLevel::Dangerous;
        }
        if matches(&self.safe) {
            return SecurityLevel::Safe;
        }
        if matches(&self.caution) {
            return SecurityLevel::Caution;
        }
        SecurityLevel::Caution
    }
}

/// Warning text shown ahead of a non-safe command's output.
pub fn format_warning(command: &str, level: SecurityLevel) -> String {
    match level {
        SecurityLevel::Safe => String::new(),
        SecurityLevel::Caution => format!(
            "⚡ CAUTION: `{command}`\n\
             This command modifies the system. Verify intent before proceeding."
        ),
        SecurityLevel::Dangerous => format!(
            "⚠️ DANGEROUS COMMAND: `{command}`\n\
             This command may cause irreversible changes. Proceed with extreme caution."
        ),
    }
}
