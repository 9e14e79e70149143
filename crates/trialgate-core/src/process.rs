use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Outcome of one external command. Timeouts and missing binaries are
/// normal outcomes here (exit code -1 with a message in stderr), never
/// errors, so scoring can continue past a broken gate.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `argv` in `cwd` with a timeout, capturing both output streams.
pub async fn run_command(argv: &[String], cwd: &Path, timeout_secs: u64) -> CommandOutcome {
    let Some((exe, args)) = argv.split_first() else {
        return CommandOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: "Empty command".to_string(),
        };
    };

    debug!(command = %argv.join(" "), cwd = %cwd.display(), "running command");

    let spawned = Command::new(exe)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(_) => {
            return CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("Command not found: {}", exe),
            };
        }
    };

    let waited = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await;

    match waited {
        Ok(Ok(output)) => CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Ok(Err(err)) => CommandOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Command failed to run: {}", err),
        },
        Err(_) => CommandOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: "Command timed out".to_string(),
        },
    }
}
