//! `unitvisor-worker` -- streams JSON records through hot-reloaded units.
//!
//! Loads units from the configured source, reconciles them on a timer (and
//! on change notifications for watched directories), reads one JSON record
//! per line from stdin and writes unit outputs as JSON lines to stdout.
//!
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unitvisor_core::{ArtifactCache, Dispatcher, Host, ReloadScheduler};
use unitvisor_worker::{pipeline, ProcessEngine, WorkerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "unitvisor_worker=info,unitvisor_core=info,unitvisor_sources=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        source = config.source.kind(),
        interval_secs = config.scheduler.interval.as_secs(),
        grace_secs = config.scheduler.grace_period.as_secs(),
        member = %config.dispatch_member,
        "Starting unitvisor-worker",
    );

    let source = match unitvisor_sources::build(&config.source).await {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build source");
            return ExitCode::FAILURE;
        }
    };
    let engine = Arc::new(ProcessEngine::new(&config.artifact_dir, config.script_timeout));
    let host = Host::new(source, engine, Arc::new(ArtifactCache::new()));
    let scheduler = ReloadScheduler::new(Arc::clone(&host), config.scheduler);

    let code = match scheduler.start().await {
        Ok(result) => {
            tracing::info!(
                generation = result.generation,
                units = ?host.list_unit_names().await,
                "Initial units loaded",
            );
            let mut dispatcher = Dispatcher::new(Arc::clone(&host), config.dispatch_member.clone());
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();

            match pipeline::run(&scheduler, &mut dispatcher, stdin, &mut stdout).await {
                Ok(_) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "Pipeline stopped");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Initial reconciliation failed");
            ExitCode::FAILURE
        }
    };

    // Stop the timer before contexts go away.
    scheduler.close().await;
    host.release().await;
    tracing::info!("Worker stopped");
    code
}
