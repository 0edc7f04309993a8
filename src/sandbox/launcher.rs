use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// How long stream readers may lag behind process exit before being aborted
const READER_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// A fully resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: PathBuf,
}

impl CommandSpec {
    /// Builds a command by applying placeholder substitutions to a template
    pub fn from_template(
        template: &[String],
        mapping: &[(&str, &str)],
        current_dir: &Path,
    ) -> Result<Self> {
        let mut parts = template.iter().map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping {
                t = t.replace(k, v);
            }
            t
        });

        let Some(program) = parts.next() else {
            bail!("Empty command template");
        };

        Ok(Self {
            program,
            args: parts.collect(),
            current_dir: current_dir.to_path_buf(),
        })
    }
}

/// Captured standard output and standard error of one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Starts external processes
///
/// The real implementation is [`ProcessLauncher`]; tests inject fakes to
/// drive the timeout race deterministically.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts `command` with `stdin` as its standard input (or nothing)
    async fn spawn(
        &self,
        command: &CommandSpec,
        stdin: Option<File>,
    ) -> io::Result<Box<dyn RunningProcess>>;
}

/// A process started by a [`Launcher`]
#[async_trait]
pub trait RunningProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Waits for the process to exit, returning whether it exited cleanly.
    /// Must be cancel safe: it is raced against the deadline.
    async fn wait(&mut self) -> io::Result<bool>;

    /// Forcibly terminates the process and reaps it
    async fn kill(&mut self) -> io::Result<()>;

    /// Kills whatever the process left running behind it after a clean exit
    fn reclaim(&mut self) {}

    /// Collects everything written to the output streams so far
    async fn collect(&mut self) -> Captured;
}

/// Launches real processes with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(
        &self,
        command: &CommandSpec,
        stdin: Option<File>,
    ) -> io::Result<Box<dyn RunningProcess>> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.current_dir)
            .stdin(stdin.map_or_else(Stdio::null, Stdio::from))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so a timeout kill also reaches any children
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        log::debug!(
            "Spawned {} (pid {:?}) in {}",
            command.program,
            child.id(),
            command.current_dir.display()
        );

        let group = child.id();
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        Ok(Box::new(ChildProcess {
            child,
            group,
            stdout,
            stderr,
        }))
    }
}

struct ChildProcess {
    child: Child,
    /// Process group id, recorded at spawn since `Child::id` is gone once reaped
    group: Option<u32>,
    stdout: Option<StreamReader>,
    stderr: Option<StreamReader>,
}

impl ChildProcess {
    #[cfg(unix)]
    fn signal_group(&self) {
        if let Some(group) = self.group {
            kill_group(group);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self) {}
}

#[async_trait]
impl RunningProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<bool> {
        let status = self.child.wait().await?;
        Ok(status.success())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.signal_group();
        self.child.kill().await
    }

    fn reclaim(&mut self) {
        self.signal_group();
    }

    async fn collect(&mut self) -> Captured {
        Captured {
            stdout: join_reader(self.stdout.take()).await,
            stderr: join_reader(self.stderr.take()).await,
        }
    }
}

/// SIGKILLs every remaining member of a process group
#[cfg(unix)]
fn kill_group(group: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(group) else {
        log::warn!("Process group {group} is out of range, not signalled");
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::debug!("killpg({group}) failed: {e}"),
    }
}

/// A background task draining one output stream into a shared buffer
struct StreamReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

fn spawn_reader<R>(mut stream: R) -> StreamReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = buffer.clone();
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                Err(e) => {
                    log::debug!("Output stream closed with error: {e}");
                    break;
                }
            }
        }
    });

    StreamReader { buffer, handle }
}

/// Waits for a reader to hit end of stream, then returns what it read.
/// A reader still running after the grace period is aborted and its
/// partial output kept.
async fn join_reader(reader: Option<StreamReader>) -> String {
    let Some(StreamReader { buffer, mut handle }) = reader else {
        return String::new();
    };

    match tokio::time::timeout(READER_GRACE_PERIOD, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Output reader task failed: {e}"),
        Err(_) => {
            // Something outside the process group still holds the pipe open
            handle.abort();
            log::warn!("Output reader did not finish in time, keeping partial output");
        }
    }

    let bytes = std::mem::take(&mut *buffer.lock());
    String::from_utf8_lossy(&bytes).into_owned()
}
