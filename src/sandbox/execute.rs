use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::timeout;

use crate::config::ToolchainConfig;
use crate::stage::Workspace;

use super::{Captured, CommandSpec, ExecResult, Launcher, RunningProcess};

/// Which side of the exit-vs-deadline race finished first
#[derive(Debug)]
pub enum Completion {
    Exited { success: bool, output: Captured },
    TimedOut { output: Captured },
}

/// Races process exit against `limit`
///
/// When the deadline wins the process is killed and reaped. On a clean exit
/// anything it left running in its group is killed. In both cases the output
/// readers are joined before returning.
pub async fn wait_with_deadline(process: &mut dyn RunningProcess, limit: Duration) -> Completion {
    match timeout(limit, process.wait()).await {
        Ok(exited) => {
            let success = exited.unwrap_or_else(|e| {
                log::warn!("Failed to wait for process {:?}: {e}", process.id());
                false
            });
            process.reclaim();
            Completion::Exited {
                success,
                output: process.collect().await,
            }
        }
        Err(_) => {
            log::debug!("Deadline of {limit:?} elapsed, killing {:?}", process.id());
            if let Err(e) = process.kill().await {
                log::warn!("Failed to kill timed out process {:?}: {e}", process.id());
            }
            Completion::TimedOut {
                output: process.collect().await,
            }
        }
    }
}

/// Launches `command` and classifies it as OK, ERROR or TIMEOUT
pub async fn launch_with_deadline(
    launcher: &dyn Launcher,
    command: &CommandSpec,
    stdin: Option<File>,
    limit: Duration,
) -> ExecResult {
    let mut process = match launcher.spawn(command, stdin).await {
        Ok(process) => process,
        Err(e) => {
            log::warn!("Failed to launch {}: {e}", command.program);
            return ExecResult::launch_failure(&command.program, e);
        }
    };

    wait_with_deadline(process.as_mut(), limit).await.into()
}

/// Runs the compiled submission against one test input
pub async fn run_case(
    launcher: &dyn Launcher,
    toolchain: &ToolchainConfig,
    workspace: &Workspace,
    input: &Path,
    limit: Duration,
) -> Result<ExecResult> {
    let stdin = File::open(input)
        .with_context(|| format!("Failed to open test input {}", input.display()))?;
    let command = workspace.command(&toolchain.run)?;

    Ok(launch_with_deadline(launcher, &command, Some(stdin), limit).await)
}
