use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::diff::{self, DiffVerdict};
use crate::pipeline::Submission;
use crate::sandbox::{ExecResult, Status};
use crate::testcases::ExpectedOutput;

pub const TRUNCATION_MARKER: &str =
    "\n=========OUTPUT TRUNCATED. USE -v FOR FULL LOG PRINT=========\n";

/// How much of each captured log ends up in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    pub verbose: bool,
    pub max_lines: usize,
}

impl LogPolicy {
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.verbose {
            Cow::Borrowed(text)
        } else {
            truncate_lines(text, self.max_lines)
        }
    }
}

/// Keeps the first `max_lines` lines of `text`, marking the cut if any
pub fn truncate_lines(text: &str, max_lines: usize) -> Cow<'_, str> {
    let cut = match max_lines.checked_sub(1) {
        None => Some(0),
        Some(last) => text.match_indices('\n').nth(last).map(|(i, _)| i + 1),
    };

    match cut {
        Some(end) if end < text.len() => Cow::Owned(format!("{}{TRUNCATION_MARKER}", &text[..end])),
        _ => Cow::Borrowed(text),
    }
}

/// Per-status counts over a submission's run results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub ok: usize,
    pub error: usize,
    pub timeout: usize,
}

impl StatusCounts {
    pub fn tally(results: &[ExecResult]) -> Self {
        results.iter().fold(Self::default(), |mut counts, result| {
            match result.status {
                Status::Ok => counts.ok += 1,
                Status::Error => counts.error += 1,
                Status::Timeout => counts.timeout += 1,
            }
            counts
        })
    }
}

/// A serialized report and the figures it summarizes
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub text: String,
    pub counts: StatusCounts,
    pub mismatches: usize,
}

/// Serializes one submission
pub fn render(
    submission: &Submission,
    expected: &[ExpectedOutput],
    policy: LogPolicy,
) -> Result<RenderedReport> {
    let compile = &submission.compile;
    let counts = StatusCounts::tally(&submission.runs);
    let mut text = String::new();

    writeln!(text, "Report For {}\n", submission.name.display_name())?;
    writeln!(
        text,
        "------------------Compile Result: {}------------------",
        compile.status
    )?;
    if !compile.is_ok() {
        write!(text, "Error Log:\n{}\n\n", policy.apply(&compile.stderr))?;
    }
    if !compile.stdout.is_empty() {
        write!(text, "Out Log:\n{}\n\n", policy.apply(&compile.stdout))?;
    }
    if !compile.is_ok() {
        return Ok(RenderedReport {
            text,
            counts,
            mismatches: 0,
        });
    }

    if submission.runs.len() != expected.len() {
        bail!(
            "{} has {} run results for {} expected outputs",
            submission.name.identity,
            submission.runs.len(),
            expected.len()
        );
    }

    write!(
        text,
        "------------------Run Results------------------\nTimeout: {}\nError: {}\nNo Timeout/Error: {}\n\n",
        counts.timeout, counts.error, counts.ok
    )?;
    text.push_str("Test Cases:\n");

    let mut mismatches = 0;
    for (result, expected) in submission.runs.iter().zip(expected) {
        write!(text, "\nCase {}: {}\n", expected.path.display(), result.status)?;

        if result.status == Status::Error {
            write!(text, "Error Log:\n{}\n\n", policy.apply(&result.stderr))?;
            continue;
        }

        match diff::classify(&expected.text, &result.stdout) {
            DiffVerdict::NoDiff => text.push_str("Diff Log: No Diff!\n\n"),
            DiffVerdict::Mismatch(rendered) => {
                mismatches += 1;
                write!(text, "Diff Log:\n\n{}", policy.apply(&rendered))?;
                write!(text, "Out Log:\n\n{}", policy.apply(&result.stdout))?;
            }
        }
    }

    write!(
        text,
        "\n\n---------------Number of mismatch test outputs: {mismatches}---------------\n\n"
    )?;

    Ok(RenderedReport {
        text,
        counts,
        mismatches,
    })
}

/// Path of the report file for a submission identity
pub fn report_path(reports_dir: &Path, identity: &str) -> PathBuf {
    reports_dir.join(format!("{identity}.txt"))
}

/// Renders a submission and writes it to `<reports_dir>/<identity>.txt`
pub async fn write(
    reports_dir: &Path,
    submission: &Submission,
    expected: &[ExpectedOutput],
    policy: LogPolicy,
) -> Result<RenderedReport> {
    let report = render(submission, expected, policy)?;
    let path = report_path(reports_dir, &submission.name.identity);
    tokio::fs::write(&path, &report.text)
        .await
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(report)
}
