use anyhow::Result;

use crate::config::ToolchainConfig;
use crate::stage::Workspace;

use super::{ExecResult, Launcher, Status, launch_with_deadline};

/// Compiles the staged source file inside its workspace
///
/// Only a clean compiler exit counts as OK. A compiler that cannot be
/// launched or that runs past the compile timeout is reported as ERROR, with
/// the reason appended to the error log.
pub async fn compile(
    launcher: &dyn Launcher,
    toolchain: &ToolchainConfig,
    workspace: &Workspace,
) -> Result<ExecResult> {
    let command = workspace.command(&toolchain.compile)?;
    let limit = toolchain.compile_timeout();

    let mut result = launch_with_deadline(launcher, &command, None, limit).await;
    if result.status == Status::Timeout {
        log::warn!(
            "Compiling {} timed out after {}s",
            workspace.class_name(),
            limit.as_secs()
        );
        result.status = Status::Error;
        if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
            result.stderr.push('\n');
        }
        result
            .stderr
            .push_str(&format!("Compilation timed out after {}s", limit.as_secs()));
    }

    Ok(result)
}
