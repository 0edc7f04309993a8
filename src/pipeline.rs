use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Settings;
use crate::report::{self, LogPolicy, StatusCounts};
use crate::sandbox::{self, ExecResult, Launcher, ProcessLauncher, Status};
use crate::stage::{SubmissionName, Workspace};
use crate::testcases::{ExpectedOutput, TestCases, list_files};

/// One graded submission, handed over to report writing once complete
#[derive(Debug, Clone)]
pub struct Submission {
    pub name: SubmissionName,
    pub compile: ExecResult,
    /// One result per test case, empty when compilation failed
    pub runs: Vec<ExecResult>,
}

impl Submission {
    pub fn compiled(&self) -> bool {
        self.compile.is_ok()
    }
}

/// What ended up in one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionSummary {
    pub identity: String,
    pub compile_status: Status,
    pub counts: StatusCounts,
    pub mismatches: usize,
    pub report: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub reports_dir: PathBuf,
    /// Sorted by identity
    pub submissions: Vec<SubmissionSummary>,
}

impl BatchSummary {
    pub fn compiled(&self) -> usize {
        self.submissions
            .iter()
            .filter(|s| s.compile_status == Status::Ok)
            .count()
    }

    pub fn mismatches(&self) -> usize {
        self.submissions.iter().map(|s| s.mismatches).sum()
    }
}

/// Drives staging, compilation, execution and reporting for a whole batch
pub struct Grader {
    settings: Arc<Settings>,
    launcher: Arc<dyn Launcher>,
}

impl Grader {
    pub fn new(settings: Settings, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            settings: Arc::new(settings),
            launcher,
        }
    }

    /// A grader that launches the real compiler and runtime
    pub fn with_process_launcher(settings: Settings) -> Self {
        Self::new(settings, Arc::new(ProcessLauncher))
    }

    pub async fn run(&self) -> Result<BatchSummary> {
        let started_at = Local::now();
        self.settings.validate()?;

        let tests = Arc::new(self.load_test_cases()?);
        let names = self.discover_submissions()?;
        let expected: Arc<[ExpectedOutput]> = tests.load_expected()?.into();
        log::info!(
            "Grading {} submissions against {} test cases",
            names.len(),
            tests.len()
        );

        let reports_dir = self.settings.reports_dir();
        reset_dir(&reports_dir).await?;

        let submissions = self.grade_all(names, tests).await?;
        let summaries = match self.write_reports(submissions, expected, &reports_dir).await {
            Ok(summaries) => summaries,
            Err(e) => {
                // Never leave a partial report set behind
                if let Err(cleanup) = tokio::fs::remove_dir_all(&reports_dir).await {
                    log::warn!("Failed to remove partial reports: {cleanup}");
                }
                return Err(e);
            }
        };

        Ok(BatchSummary {
            started_at,
            finished_at: Local::now(),
            reports_dir,
            submissions: summaries,
        })
    }

    fn load_test_cases(&self) -> Result<TestCases> {
        match &self.settings.fixed_pair {
            Some((input, expected)) => {
                log::info!("Using single test case {}", input.display());
                Ok(TestCases::from_pair(input, expected))
            }
            None => TestCases::load(&self.settings.testcases_dir(), &self.settings.testcases),
        }
    }

    /// Lists and parses every raw submission before any work starts
    fn discover_submissions(&self) -> Result<Vec<SubmissionName>> {
        let extension = &self.settings.toolchain.source_extension;
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for path in list_files(&self.settings.submissions_dir())? {
            let name = SubmissionName::parse(&path, extension)?;
            if !seen.insert(name.identity.clone()) {
                bail!(
                    "Two submissions share the identity {}, their workspaces would collide",
                    name.identity
                );
            }
            names.push(name);
        }

        Ok(names)
    }

    /// Grades every submission, at most `jobs` at a time
    async fn grade_all(
        &self,
        names: Vec<SubmissionName>,
        tests: Arc<TestCases>,
    ) -> Result<Vec<Submission>> {
        let permits = Arc::new(Semaphore::new(self.settings.jobs));
        let mut tasks = JoinSet::new();

        for (index, name) in names.into_iter().enumerate() {
            let permits = permits.clone();
            let settings = self.settings.clone();
            let launcher = self.launcher.clone();
            let tests = tests.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let submission = grade_submission(&settings, launcher.as_ref(), &tests, name).await?;
                anyhow::Ok((index, submission))
            });
        }

        let mut graded = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            graded.push(joined??);
        }
        graded.sort_by_key(|(index, _)| *index);

        Ok(graded.into_iter().map(|(_, submission)| submission).collect())
    }

    /// One report task per submission, joined before returning
    async fn write_reports(
        &self,
        submissions: Vec<Submission>,
        expected: Arc<[ExpectedOutput]>,
        reports_dir: &Path,
    ) -> Result<Vec<SubmissionSummary>> {
        let policy = LogPolicy {
            verbose: self.settings.verbose,
            max_lines: self.settings.max_log_lines,
        };
        let mut tasks = JoinSet::new();

        for submission in submissions {
            let expected = expected.clone();
            let reports_dir = reports_dir.to_path_buf();

            tasks.spawn(async move {
                log::info!("Writing report for {}...", submission.name.display_name());
                let rendered = report::write(&reports_dir, &submission, &expected, policy).await?;
                anyhow::Ok(SubmissionSummary {
                    report: report::report_path(&reports_dir, &submission.name.identity),
                    identity: submission.name.identity,
                    compile_status: submission.compile.status,
                    counts: rendered.counts,
                    mismatches: rendered.mismatches,
                })
            });
        }

        let mut summaries = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            summaries.push(joined??);
        }
        summaries.sort_by(|a, b| a.identity.cmp(&b.identity));

        Ok(summaries)
    }
}

/// Stage, compile and run one submission, then remove its workspace
pub async fn grade_submission(
    settings: &Settings,
    launcher: &dyn Launcher,
    tests: &TestCases,
    name: SubmissionName,
) -> Result<Submission> {
    log::info!("Running {}...", name.source.display());
    let toolchain = &settings.toolchain;
    let workspace = Workspace::create(&settings.work_dir, &name, &toolchain.source_extension)?;

    let compile = sandbox::compile(launcher, toolchain, &workspace).await?;
    if !compile.is_ok() {
        log::warn!("{} failed to compile, skipping its test cases", name.identity);
        workspace.remove()?;
        return Ok(Submission {
            name,
            compile,
            runs: Vec::new(),
        });
    }

    let mut runs = Vec::with_capacity(tests.len());
    for (idx, input) in tests.inputs().iter().enumerate() {
        log::debug!("{}: case {} ({})", name.identity, idx + 1, input.display());
        let result =
            sandbox::run_case(launcher, toolchain, &workspace, input, settings.timeout).await?;
        match result.status {
            Status::Timeout => log::warn!(
                "{}: case {} timed out after {:?}",
                name.identity,
                idx + 1,
                settings.timeout
            ),
            Status::Error => log::debug!("{}: case {} exited with an error", name.identity, idx + 1),
            Status::Ok => {}
        }
        runs.push(result);
    }

    workspace.remove()?;
    Ok(Submission {
        name,
        compile,
        runs,
    })
}

/// Removes `dir` if present and creates it empty
async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => bail!("Failed to clear {}: {e}", dir.display()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
