//! Pledge conformance runner
//!
//! Runs the built-in Promises/A+ style catalogue against the adapter and
//! reports per-case results as coloured text or JSON.

mod output;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pledge_conformance::{catalogue, RunSummary};
use pledge_core::RuntimeConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pledge-conformance")]
#[command(about = "Run the deferred-value conformance catalogue", long_about = None)]
#[command(version)]
struct Cli {
    /// Only run cases whose id or description contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// Emit a JSON report instead of text
    #[arg(long)]
    json: bool,

    /// Stop after the first failing case
    #[arg(long)]
    fail_fast: bool,

    /// Show descriptions and timings
    #[arg(short, long)]
    verbose: bool,

    /// Color output: auto, always, never
    #[arg(long, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    /// List matching case ids without running them
    #[arg(long)]
    list: bool,

    /// Use tight resolution-depth and task-budget limits
    #[arg(long)]
    restricted: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cases = catalogue();
    let selected: Vec<_> = cases
        .iter()
        .filter(|case| cli.filter.as_deref().map_or(true, |f| case.matches(f)))
        .collect();
    if selected.is_empty() {
        bail!(
            "no conformance case matches filter {:?}",
            cli.filter.as_deref().unwrap_or_default()
        );
    }

    if cli.list {
        for case in &selected {
            println!("{}\t{}", case.id, case.description);
        }
        return Ok(());
    }

    let config = if cli.restricted {
        RuntimeConfig::restricted()
    } else {
        RuntimeConfig::from_env().context("invalid runtime settings in environment")?
    };
    info!(
        max_sync_depth = config.max_sync_depth,
        task_budget = ?config.task_budget,
        cases = selected.len(),
        "running conformance catalogue"
    );

    let summary = RunSummary::collect(selected.iter().copied(), &config, cli.fail_fast);

    if cli.json {
        println!("{}", summary.to_json().context("failed to render JSON report")?);
    } else {
        let mut out = output::StyledOutput::new(output::resolve_color_choice(cli.color.as_deref()));
        let mut current_section = None;
        for report in &summary.cases {
            if current_section != Some(report.section) {
                out.section(report.section);
                current_section = Some(report.section);
            }
            out.case(report, cli.verbose);
        }
        out.summary(&summary);
    }

    if !summary.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
