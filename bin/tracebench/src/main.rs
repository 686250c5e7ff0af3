//! Benchmark data collection harness.
//!
//! Collects distributed traces, per-pod resource usage and achieved throughput for every test case of a plan, and
//! appends the derived tables to the configured data directory.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use tracebench_app::prelude::*;
use tracebench_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

mod config;
use self::config::{Action, Cli, CollectConfig, HarnessConfig};

mod plan;
use self::plan::CollectionPlan;

mod runner;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _guard = match initialize_logging(None) {
        Ok(guard) => guard,
        Err(e) => fatal_and_exit(format!("failed to initialize logging: {}", e)),
    };

    match run(cli).await {
        Ok(()) => info!("Collection complete."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    let config = HarnessConfig::load(&cli.config)
        .with_error_context(|| format!("Failed to load configuration from '{}'.", cli.config.display()))?;

    match cli.action {
        Action::Collect(CollectConfig { plan }) => {
            let plan = CollectionPlan::from_yaml(&plan)?;
            let pipeline = runner::build_pipeline(&config)?;
            let summary = runner::collect(pipeline, config.max_workers, plan).await;

            println!(
                "persisted: {}\npartially failed: {}\nno data: {}\ncrashed: {}",
                summary.persisted, summary.partially_failed, summary.no_data, summary.crashed
            );
            Ok(())
        }
    }
}
