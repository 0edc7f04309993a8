use clap::Parser;

use subcheck::config::CliArgs;
use subcheck::pipeline::Grader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let settings = cli.to_settings()?;
    log::info!(
        "Checking {} with a {}s timeout",
        settings.root.display(),
        settings.timeout.as_secs()
    );

    // ======= PREPARATION END, EXECUTION START =======

    let grader = Grader::with_process_launcher(settings);
    let summary = grader
        .run()
        .await
        .inspect_err(|e| log::error!("Batch aborted: {e:#}"))?;

    // ===== EXECUTION END, SUMMARIZING RESULTS ======

    let elapsed = summary.finished_at - summary.started_at;
    log::info!(
        "{} submissions graded in {}s, {} compiled, {} mismatched test outputs",
        summary.submissions.len(),
        elapsed.num_seconds(),
        summary.compiled(),
        summary.mismatches()
    );
    for submission in &summary.submissions {
        log::debug!(
            "{}: compile {}, {} ok / {} error / {} timeout, {} mismatches",
            submission.identity,
            submission.compile_status,
            submission.counts.ok,
            submission.counts.error,
            submission.counts.timeout,
            submission.mismatches
        );
    }

    log::info!(
        "All reports completed in {}. Exiting...",
        summary.reports_dir.display()
    );
    log::warn!(
        "Please make sure to check error logs as students may have incongruent filenames to class names!!"
    );
    Ok(())
}
