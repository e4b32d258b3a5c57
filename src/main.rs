//! Scenario-driven integration test runner
//!
//! Loads declarative YAML scenarios, executes their steps against registered
//! protocol adapters, and reports a hierarchical pass/fail tree.

use clap::Parser;

use scenarun::commands::{self, Commands};
use scenarun::common::logging;
use scenarun::Error;

#[derive(Parser)]
#[command(name = "scenarun", about = "Scenario-driven integration test runner")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let cli = Cli::parse();
    logging::init();

    if let Err(err) = commands::dispatch(cli.command) {
        if matches!(err, Error::TestFailed) {
            std::process::exit(10);
        }
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
