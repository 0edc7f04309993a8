#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use subcheck::config::Settings;
use subcheck::sandbox::{Captured, CommandSpec, Launcher, RunningProcess};

/// A recorded launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub program: String,
    pub workspace: PathBuf,
    /// Files present in the workspace when the process started
    pub workspace_files: Vec<String>,
}

#[derive(Default)]
struct Tracker {
    live: HashMap<PathBuf, usize>,
    max_live: usize,
}

/// Pretends to be `javac` / `java`
///
/// The staged source decides what happens: `COMPILE_ERROR` fails the
/// compile, and a `// mode: <echo|crash|hang|print TEXT>` line drives the run.
#[derive(Default)]
pub struct ScriptedLauncher {
    calls: Mutex<Vec<Call>>,
    tracker: Arc<Mutex<Tracker>>,
}

impl ScriptedLauncher {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Highest number of processes alive at once inside a single workspace
    pub fn max_live_per_workspace(&self) -> usize {
        self.tracker.lock().max_live
    }

    fn start(&self, workspace: &Path, behavior: Behavior) -> Box<dyn RunningProcess> {
        let mut tracker = self.tracker.lock();
        let live = tracker.live.entry(workspace.to_path_buf()).or_default();
        *live += 1;
        let live = *live;
        tracker.max_live = tracker.max_live.max(live);

        Box::new(ScriptedProcess {
            behavior,
            workspace: workspace.to_path_buf(),
            tracker: self.tracker.clone(),
        })
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn spawn(
        &self,
        command: &CommandSpec,
        stdin: Option<File>,
    ) -> io::Result<Box<dyn RunningProcess>> {
        let workspace = command.current_dir.clone();
        let mut workspace_files: Vec<String> = fs::read_dir(&workspace)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<_>>()?;
        workspace_files.sort();
        self.calls.lock().push(Call {
            program: command.program.clone(),
            workspace: workspace.clone(),
            workspace_files,
        });

        let behavior = match command.program.as_str() {
            "javac" => {
                let source = fs::read_to_string(&command.args[0])?;
                if source.contains("COMPILE_ERROR") {
                    Behavior::exit(false, "", "Main.java:1: error: ';' expected\n")
                } else {
                    Behavior::exit(true, "", "")
                }
            }
            "java" => {
                let (dir, class) = (&command.args[1], &command.args[2]);
                let source = fs::read_to_string(Path::new(dir).join(format!("{class}.java")))?;
                let mut input = String::new();
                if let Some(mut stdin) = stdin {
                    stdin.read_to_string(&mut input)?;
                }
                run_behavior(&source, input)
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{other}: command not found"),
                ));
            }
        };

        Ok(self.start(&workspace, behavior))
    }
}

fn run_behavior(source: &str, input: String) -> Behavior {
    let mode = source
        .lines()
        .find_map(|line| {
            line.trim()
                .trim_start_matches('/')
                .trim_start()
                .strip_prefix("mode: ")
        })
        .unwrap_or("echo");

    match mode {
        "echo" => Behavior::exit(true, &input, ""),
        "crash" => Behavior::exit(
            false,
            "",
            "Exception in thread \"main\" java.lang.NullPointerException\n",
        ),
        "hang" => Behavior {
            runs_for: Duration::from_secs(3600),
            success: true,
            output: Captured {
                stdout: "partial\n".to_string(),
                stderr: String::new(),
            },
        },
        other => {
            let text = other.strip_prefix("print ").unwrap_or(other);
            Behavior::exit(true, &text.replace("\\n", "\n"), "")
        }
    }
}

struct Behavior {
    runs_for: Duration,
    success: bool,
    output: Captured,
}

impl Behavior {
    fn exit(success: bool, stdout: &str, stderr: &str) -> Self {
        Self {
            runs_for: Duration::from_millis(5),
            success,
            output: Captured {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        }
    }
}

struct ScriptedProcess {
    behavior: Behavior,
    workspace: PathBuf,
    tracker: Arc<Mutex<Tracker>>,
}

#[async_trait]
impl RunningProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> io::Result<bool> {
        tokio::time::sleep(self.behavior.runs_for).await;
        Ok(self.behavior.success)
    }

    async fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn collect(&mut self) -> Captured {
        self.behavior.output.clone()
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        if let Some(live) = self.tracker.lock().live.get_mut(&self.workspace) {
            *live -= 1;
        }
    }
}

/// A project folder with `submissions` and `testcases`
pub struct Project {
    pub dir: tempfile::TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("submissions")).unwrap();
        fs::create_dir(dir.path().join("testcases")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn submission(&self, file_name: &str, source: &str) -> &Self {
        fs::write(self.root().join("submissions").join(file_name), source).unwrap();
        self
    }

    pub fn case(&self, name: &str, input: &str, expected: &str) -> &Self {
        let dir = self.root().join("testcases");
        fs::write(dir.join(format!("{name}.in")), input).unwrap();
        fs::write(dir.join(format!("{name}.out")), expected).unwrap();
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root().join("work")
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.root(), Duration::from_millis(200));
        settings.work_dir = self.work_dir();
        settings
    }

    pub fn report(&self, identity: &str) -> String {
        fs::read_to_string(self.root().join("reports").join(format!("{identity}.txt"))).unwrap()
    }

    pub fn report_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.root().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
