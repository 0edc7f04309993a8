use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;

/// Default number of log lines kept in a report when not running verbose
pub const DEFAULT_MAX_LOG_LINES: usize = 50;

#[derive(Parser, Debug)]
#[command(
    name = "subcheck",
    version = "0.1",
    about = "Compiles, runs and diffs a folder of student submissions",
    long_about = "Your target directory MUST contain a `submissions` folder with the raw \
                  submissions and a `testcases` folder with `<name>.in` / `<name>.out` files. \
                  Inputs and outputs are each sorted alphabetically and the i-th input is \
                  paired with the i-th output."
)]
pub struct CliArgs {
    /// Path to the project folder that contains submissions / testcases
    #[arg(long = "path", short = 'p')]
    pub path: PathBuf,

    /// Timeout threshold when running tests, in seconds
    #[arg(long = "timeout", short = 't')]
    pub timeout: u64,

    /// Print full out/diff logs, even if the output is very large
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Path to a JSON toolchain configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    /// Number of log lines kept per section when not verbose
    #[arg(long = "max-lines")]
    pub max_lines: Option<usize>,

    /// Number of submissions graded at the same time
    #[arg(long = "jobs", short = 'j', default_value_t = 1)]
    pub jobs: usize,

    /// Directory holding the per-submission workspaces
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// Single input file, used instead of the testcases folder
    #[arg(long = "input", requires = "expected")]
    pub input: Option<PathBuf>,

    /// Expected output paired with `--input`
    #[arg(long = "expected", requires = "input")]
    pub expected: Option<PathBuf>,
}

impl CliArgs {
    /// Load the configuration file (if any) and merge it with the flags
    pub fn to_settings(&self) -> Result<Settings> {
        let config = match &self.config_path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        let mut settings = Settings::new(&self.path, Duration::from_secs(self.timeout));
        settings.verbose = self.verbose;
        settings.jobs = self.jobs;
        settings.max_log_lines = self
            .max_lines
            .or(config.max_log_lines)
            .unwrap_or(DEFAULT_MAX_LOG_LINES);
        settings.toolchain = config.toolchain;
        settings.testcases = config.testcases;
        if let Some(work_dir) = &self.work_dir {
            settings.work_dir = work_dir.clone();
        }
        if let (Some(input), Some(expected)) = (&self.input, &self.expected) {
            settings.fixed_pair = Some((input.clone(), expected.clone()));
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Contents of the optional JSON configuration file
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub toolchain: ToolchainConfig,
    pub testcases: TestCasesConfig,
    pub max_log_lines: Option<usize>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// External compiler and runtime, as command templates
///
/// Placeholders: `%SOURCE%` is the staged source file, `%DIR%` the
/// submission workspace and `%CLASS%` the derived class name.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    pub source_extension: String,
    pub compile: Vec<String>,
    pub run: Vec<String>,
    pub compile_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            source_extension: "java".to_string(),
            compile: vec!["javac".to_string(), "%SOURCE%".to_string()],
            run: vec![
                "java".to_string(),
                "-classpath".to_string(),
                "%DIR%".to_string(),
                "%CLASS%".to_string(),
            ],
            compile_timeout_secs: 30,
        }
    }
}

impl ToolchainConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TestCasesConfig {
    pub input_extension: String,
    pub output_extension: String,
}

impl Default for TestCasesConfig {
    fn default() -> Self {
        Self {
            input_extension: "in".to_string(),
            output_extension: "out".to_string(),
        }
    }
}

/// Everything a batch run needs, resolved from flags and the config file
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub timeout: Duration,
    pub verbose: bool,
    pub max_log_lines: usize,
    pub jobs: usize,
    pub work_dir: PathBuf,
    pub toolchain: ToolchainConfig,
    pub testcases: TestCasesConfig,
    pub fixed_pair: Option<(PathBuf, PathBuf)>,
}

impl Settings {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            timeout,
            verbose: false,
            max_log_lines: DEFAULT_MAX_LOG_LINES,
            jobs: 1,
            work_dir: default_work_dir(),
            toolchain: ToolchainConfig::default(),
            testcases: TestCasesConfig::default(),
            fixed_pair: None,
        }
    }

    pub fn submissions_dir(&self) -> PathBuf {
        self.root.join("submissions")
    }

    pub fn testcases_dir(&self) -> PathBuf {
        self.root.join("testcases")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            bail!("The run timeout must be greater than zero");
        }
        if self.jobs == 0 {
            bail!("The number of concurrent jobs must not be 0");
        }
        if self.max_log_lines == 0 {
            bail!("The maximum number of log lines must not be 0");
        }
        if self.toolchain.compile.is_empty() || self.toolchain.run.is_empty() {
            bail!("Compile and run commands must not be empty");
        }
        if self.toolchain.compile_timeout_secs == 0 {
            bail!("The compile timeout must be at least one second");
        }
        for extension in [
            &self.toolchain.source_extension,
            &self.testcases.input_extension,
            &self.testcases.output_extension,
        ] {
            if extension.is_empty() || extension.contains('.') {
                bail!("Invalid file extension {extension:?}: expected a bare extension like \"in\"");
            }
        }
        if self.testcases.input_extension == self.testcases.output_extension {
            bail!("Input and output test case extensions must differ");
        }
        Ok(())
    }
}

/// Per-user cache directory for workspaces, or the temp dir if there is none
pub fn default_work_dir() -> PathBuf {
    use directories::ProjectDirs;

    ProjectDirs::from("", "", "subcheck")
        .map(|dirs| dirs.cache_dir().join("work"))
        .unwrap_or_else(|| std::env::temp_dir().join("subcheck-work"))
}
