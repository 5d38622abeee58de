//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run tests on provisioned guests and collect their results
#[derive(Parser, Debug)]
#[command(name = "guestrun")]
#[command(version)]
#[command(about = "Run discovered tests on guests and reconcile their results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute the tests of a plan
    Run(RunArgs),

    /// View results of a run
    Results(ResultsArgs),

    /// Print the JSON schema of result records written by tests
    Schema,

    /// Manage plan files
    Plan(PlanArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Plan file, searched for in standard locations if not given
    #[arg(short, long)]
    pub plan: Option<PathBuf>,

    /// Step working directory, a new run directory if not given
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Discard previous results and run everything again
    #[arg(short, long)]
    pub force: bool,

    /// Run again even if the step is done already
    #[arg(short, long)]
    pub again: bool,

    /// Guests running tests at the same time
    #[arg(short, long)]
    pub max_workers: Option<usize>,

    /// Stop after the first failed test
    #[arg(short = 'x', long)]
    pub exit_first: bool,

    /// Run tests without their duration limit
    #[arg(long)]
    pub ignore_duration: bool,

    /// Output format of the final results (table, json, json-pretty, yaml, summary)
    #[arg(long, default_value = "table")]
    pub format: String,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Step working directory, the latest run if not given
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Output format (table, json, json-pretty, yaml, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Export to file, format chosen by extension (json, yaml, csv)
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Write a JUnit XML report
    #[arg(short, long)]
    pub junit: Option<PathBuf>,

    /// Include test output in the JUnit report
    #[arg(long, requires = "junit")]
    pub include_output: bool,
}

/// Arguments for plan management
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(subcommand)]
    pub action: PlanAction,
}

#[derive(Subcommand, Debug)]
pub enum PlanAction {
    /// Write an example plan file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./guestrun.yaml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the plan file
    Show {
        /// Plan file
        file: Option<PathBuf>,

        /// Show environment variable overrides
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a plan file
    Validate {
        /// Plan file
        file: Option<PathBuf>,
    },
}
