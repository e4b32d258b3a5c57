//! CLI subcommands and dispatch

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;

use crate::common::config::Config;
use crate::common::{self, Error, Result};
use crate::context::Context;
use crate::reporter::{self, RunOptions};
use crate::runner::Runner;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run scenario files
    Run {
        /// Scenario YAML files to run
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,

        /// Write a JSON test report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run scenario files in parallel
        #[arg(long)]
        parallel: bool,
    },

    /// Print version information
    Version,
}

/// Dispatch a parsed command
pub fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            scenarios,
            no_color,
            report,
            config,
            parallel,
        } => run(scenarios, no_color, report, config, parallel),
        Commands::Version => {
            println!("scenarun {}", common::version());
            Ok(())
        }
    }
}

fn run(
    scenarios: Vec<PathBuf>,
    no_color: bool,
    report: Option<PathBuf>,
    config: Option<PathBuf>,
    parallel: bool,
) -> Result<()> {
    let config = Config::load(config.as_deref())?;
    let color = !no_color && config.color_enabled(std::io::stdout().is_terminal());

    let runner = Runner::with_scenarios(scenarios).with_parallel_files(parallel);
    let options = RunOptions::default()
        .with_color(color)
        .with_max_parallel(config.reporter.max_parallel);

    let mut generated = None;
    let ok = reporter::run_with_options(options, |r| {
        let mut ctx = Context::new(r.clone()).with_color(color);
        if config.defaults.timeout_secs > 0 {
            ctx = ctx.with_timeout(Duration::from_secs(config.defaults.timeout_secs));
        }
        if let Some(dir) = &config.defaults.plugin_dir {
            ctx = ctx.with_plugin_dir(dir.clone());
        }
        runner.run(&ctx);
        if report.is_some() {
            generated = Some(reporter::generate_test_report(r));
        }
    });

    if let Some(path) = report {
        let report = generated.expect("report generated inside the run");
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)?;
    }

    if !ok {
        return Err(Error::TestFailed);
    }
    Ok(())
}
