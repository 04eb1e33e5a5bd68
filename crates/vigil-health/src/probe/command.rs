//! Custom probe parsing and command execution.
//!
//! The first token of a custom probe selects how the rest is run:
//!
//! ```text
//! ["http://host/health"]          → single GET, no discovery
//! ["CMD", "pg_isready", "-q"]     → argv executed directly
//! ["CMD-SHELL", "curl -f ..."]    → run through the platform shell
//! ["NONE"]                        → always healthy
//! ["redis-cli ping"]              → anything else goes to the shell
//! ```

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vigil_core::truncate_chars;

use crate::error::ProbeError;

/// Longest command output kept on a result.
const MAX_OUTPUT_LEN: usize = 1024;

/// A parsed custom probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomProbe {
    Url(String),
    Exec(Vec<String>),
    Shell(String),
    Noop,
}

impl CustomProbe {
    /// Parse a token list. Returns `None` for an empty list.
    pub fn parse(tokens: &[String]) -> Option<Self> {
        let (first, rest) = tokens.split_first()?;
        let probe = match first.as_str() {
            url if url.starts_with("http://") || url.starts_with("https://") => {
                CustomProbe::Url(url.to_string())
            }
            "CMD" => CustomProbe::Exec(rest.to_vec()),
            "CMD-SHELL" => CustomProbe::Shell(rest.join(" ")),
            "NONE" => CustomProbe::Noop,
            _ => CustomProbe::Shell(tokens.join(" ")),
        };
        Some(probe)
    }
}

/// What a finished command left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Trimmed stderr, or stdout when stderr was empty.
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run an `Exec` or `Shell` probe to completion.
///
/// The child is killed if the timeout elapses or `cancel` fires.
pub async fn run(
    probe: &CustomProbe,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProbeError> {
    let mut cmd = match probe {
        CustomProbe::Exec(argv) => {
            let (program, args) = argv.split_first().ok_or(ProbeError::EmptyCommand)?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
        CustomProbe::Shell(line) if line.trim().is_empty() => return Err(ProbeError::EmptyCommand),
        CustomProbe::Shell(line) => shell_command(line),
        CustomProbe::Url(_) | CustomProbe::Noop => return Err(ProbeError::EmptyCommand),
    };

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    debug!(?probe, pid = child.id(), "health check command spawned");

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
        res = tokio::time::timeout(timeout, child.wait_with_output()) => match res {
            Ok(output) => output?,
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        },
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };

    Ok(CommandOutput {
        exit_code: output.status.code(),
        output: truncate_chars(text, MAX_OUTPUT_LEN).unwrap_or_else(|| text.to_string()),
    })
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}
