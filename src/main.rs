//! guestrun - test execution orchestrator
//!
//! Runs discovered tests on already provisioned guests, collects the results
//! they report and keeps one authoritative result per test, guest and serial
//! number across runs.
//!
//! ## Features
//!
//! - Concurrent execution across guests with a bounded worker pool
//! - Restart and reboot handling driven by the tests themselves
//! - Custom, restraint and framework result interpretation
//! - Checks around each test (`dmesg`)
//! - Result export to JSON, YAML, CSV and JUnit XML
//!
//! ## Usage
//!
//! ```bash
//! # Write an example plan
//! guestrun plan init
//!
//! # Run the plan
//! guestrun run --plan guestrun.yaml
//!
//! # Run everything again in the same working directory
//! guestrun run --plan guestrun.yaml --workdir /var/tmp/run-1 --force
//!
//! # Show results of the latest run, write a JUnit report
//! guestrun results --junit junit.xml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod cli;
mod config;
mod discover;
mod executor;
mod guest;
mod models;
mod output;
mod results;
mod utils;

use cli::Args;
use config::{build_guests, EnvConfig, PlanFile};
use discover::StaticDiscover;
use executor::{ExecuteError, ExecuteStep, ExecutionContext};
use output::{OutputFormat, ResultFormatter};
use results::{ExportFormat, ResultsStorage};
use utils::{init_logger, InterruptRegistry, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(LogLevel::from_flags(args.verbose, args.debug));

    match args.command {
        cli::Command::Run(run_args) => {
            run_plan(run_args).await?;
        }
        cli::Command::Results(results_args) => {
            show_results(results_args)?;
        }
        cli::Command::Schema => {
            print_schema()?;
        }
        cli::Command::Plan(plan_args) => {
            manage_plan(plan_args)?;
        }
    }

    Ok(())
}

/// Terminate running tests when the orchestrator is interrupted
fn forward_interrupts() {
    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, terminating running tests");
            InterruptRegistry::global().fire(Signal::SIGINT);
        }
    });
}

fn locate_plan(plan: Option<PathBuf>, env: &EnvConfig) -> Result<PathBuf> {
    plan.or_else(|| env.plan.clone())
        .or_else(PlanFile::find)
        .context("No plan file given and none found in standard locations")
}

async fn run_plan(args: cli::RunArgs) -> Result<()> {
    let env = EnvConfig::load();
    let plan_path = locate_plan(args.plan, &env)?;
    let mut plan = PlanFile::load(&plan_path)?;

    let storage = match args.workdir.or_else(|| env.workdir.clone()) {
        Some(workdir) => ResultsStorage::new(workdir),
        None => ResultsStorage::new_run(&ResultsStorage::base_dir()),
    };
    storage.ensure_dir()?;
    let workdir = storage.workdir().to_path_buf();

    info!("Plan {} ({})", plan.name, plan_path.display());
    info!("Working directory {}", workdir.display());

    if plan.execute.is_empty() {
        plan.execute.push(Default::default());
    }
    for data in &mut plan.execute {
        if let Some(max_workers) = args.max_workers.or(env.max_workers) {
            data.max_workers = max_workers;
        }
        data.exit_first |= args.exit_first || env.exit_first.unwrap_or(false);
        data.ignore_duration |= args.ignore_duration;
    }

    let root = match plan.root.clone() {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let context = Arc::new(ExecutionContext {
        workdir: workdir.clone(),
        root,
        discover: Arc::new(StaticDiscover::new(plan.discover.clone())),
        context: Arc::new(plan.context.clone()),
        interrupts: InterruptRegistry::global(),
    });

    let guests = build_guests(&plan.guests, &workdir);

    let mut step = ExecuteStep::new(storage, plan.execute.clone(), context, guests)
        .with_actions(plan.actions.clone())
        .with_again(args.again);

    forward_interrupts();

    let outcome = step.go(args.force).await;

    let formatter =
        ResultFormatter::new(OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table));
    println!("{}", formatter.format_results(step.results()));

    match outcome {
        Ok(()) => Ok(()),
        Err(e @ ExecuteError::General { .. }) => Err(anyhow::anyhow!(e.report())),
        Err(e) => Err(e).context("Execute step failed"),
    }
}

fn show_results(args: cli::ResultsArgs) -> Result<()> {
    let storage = match args.workdir {
        Some(workdir) => ResultsStorage::new(workdir),
        None => match ResultsStorage::latest_run(&ResultsStorage::base_dir())? {
            Some(storage) => storage,
            None => {
                println!("\n📭 No stored results found.");
                println!("   Run tests with: guestrun run --plan <file>");
                return Ok(());
            }
        },
    };

    info!("Results of {}", storage.workdir().display());
    let results = storage.load_results(false)?;

    let formatter =
        ResultFormatter::new(OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table));
    println!("{}", formatter.format_results(&results));

    if let Some(path) = args.export {
        let format = ExportFormat::from_extension(&path)
            .with_context(|| format!("Unknown export format of {}", path.display()))?;
        ResultsStorage::export(&results, &path, format)?;
        println!("✓ Results exported to {}", path.display());
    }

    if let Some(path) = args.junit {
        let name = storage
            .workdir()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "guestrun".to_string());
        results::write_junit(
            &name,
            &results,
            storage.workdir(),
            &path,
            args.include_output,
        )?;
        println!("✓ JUnit report written to {}", path.display());
    }

    Ok(())
}

fn print_schema() -> Result<()> {
    let schema = schemars::schema_for!(Vec<models::RawResult>);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn manage_plan(args: cli::PlanArgs) -> Result<()> {
    match args.action {
        cli::PlanAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Plan file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            PlanFile::example().save(&output)?;
            println!("✓ Plan file created: {}", output.display());
            println!("\nEdit the file to describe your guests and tests.");
        }

        cli::PlanAction::Show { file, env, format } => {
            if env {
                let env_config = EnvConfig::load();
                env_config.print_summary();
            } else {
                let path = locate_plan(file, &EnvConfig::load())?;
                let plan = PlanFile::load(&path)?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(&plan)?
                } else {
                    serde_yaml::to_string(&plan)?
                };
                println!("{output}");
            }
        }

        cli::PlanAction::Validate { file } => {
            let path = locate_plan(file, &EnvConfig::load())?;

            match PlanFile::load(&path) {
                Ok(plan) => {
                    let tests: usize = plan.discover.iter().map(|phase| phase.tests.len()).sum();
                    println!("✓ Plan file is valid: {}", path.display());
                    println!(
                        "  {} guests, {} discover phases, {} tests",
                        plan.guests.len(),
                        plan.discover.len(),
                        tests
                    );
                }
                Err(e) => {
                    println!("✗ Plan file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
