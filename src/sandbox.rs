mod compile;
mod execute;
mod launcher;

pub use compile::compile;
pub use execute::{Completion, launch_with_deadline, run_case, wait_with_deadline};
pub use launcher::{Captured, CommandSpec, Launcher, ProcessLauncher, RunningProcess};

use std::fmt;

/// Final classification of one compiler or runtime invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    Timeout,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::Timeout => "TIMEOUT",
        };
        f.write_str(label)
    }
}

/// Result of a compile step or of a single test case execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The process could not be started at all
    fn launch_failure(program: &str, error: std::io::Error) -> Self {
        Self {
            status: Status::Error,
            stdout: String::new(),
            stderr: format!("Failed to launch {program}: {error}"),
        }
    }
}

impl From<Completion> for ExecResult {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Exited { success, output } => Self {
                status: if success { Status::Ok } else { Status::Error },
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Completion::TimedOut { output } => Self {
                status: Status::Timeout,
                stdout: output.stdout,
                stderr: output.stderr,
            },
        }
    }
}
