//! Print the cost report of one run as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use runledger_core::RunId;
use runledger_cost::{RunDatabase, rollup};

/// Print the cost report of a run, including every descendant.
#[derive(Parser, Debug)]
#[command(name = "runledger-report", version, about)]
struct Args {
    /// Path to the runledger database
    #[arg(long, short = 'd')]
    database: PathBuf,

    /// Run to report on
    run_id: RunId,

    /// Print only own/children/total amounts
    #[arg(long)]
    totals_only: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    if !args.database.exists() {
        anyhow::bail!("database does not exist at {}", args.database.display());
    }

    let db = RunDatabase::open(&args.database)
        .with_context(|| format!("failed to open {}", args.database.display()))?;
    let report = rollup::build_report(&db, args.run_id)?;

    if args.totals_only {
        println!("own:      {}", report.own_cost);
        println!("children: {}", report.children_cost);
        println!("total:    {}", report.total_cost);
        println!("runs:     {}", report.descendants.len() + 1);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
