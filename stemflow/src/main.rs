use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stemflow::api::{ApiServer, ApiServerConfig, AppState};
use stemflow::config::AppConfig;
use stemflow::jobs::JobRegistry;
use stemflow::logging::init_logging;
use stemflow::notify::{HubConfig, NotificationHub};
use stemflow::pipeline::{
    JobPurgeService, Orchestrator, OrchestratorConfig, PurgeConfig, StageSet, WorkDirAllocator,
};
use stemflow::submission::SubmissionService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();

    let (logging_config, _log_guard) =
        init_logging(&config.log_dir).context("Failed to initialize logging")?;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        work_dir = %config.work_dir.display(),
        enrichment = config.enrichment,
        archive_format = %config.archive_format,
        "Starting stemflow"
    );

    let shutdown = CancellationToken::new();

    let registry = Arc::new(JobRegistry::new());
    let hub = Arc::new(NotificationHub::new(
        registry.clone(),
        HubConfig {
            publish_timeout: config.publish_timeout,
            buffer: config.subscriber_buffer,
        },
    ));
    let workdirs = Arc::new(WorkDirAllocator::new(&config.work_dir));
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        hub.clone(),
        StageSet::from_config(&config),
        workdirs.clone(),
        OrchestratorConfig {
            stage_timeout: config.stage_timeout,
        },
    ));
    let submission = Arc::new(SubmissionService::new(
        registry.clone(),
        orchestrator,
        workdirs.clone(),
    ));

    let purge = Arc::new(JobPurgeService::new(
        PurgeConfig::new()
            .with_retention(config.job_retention)
            .with_check_interval(config.purge_interval),
        registry.clone(),
        hub.clone(),
        workdirs,
    ));
    let purge_task = purge.start_background_task(shutdown.clone());
    logging_config.start_retention_cleanup(shutdown.clone());

    let state = AppState::new(registry, hub, submission).with_logging_config(logging_config);
    let server = ApiServer::new(ApiServerConfig::from(&config), state)
        .with_cancel_token(shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    server.run().await.context("Server error")?;

    shutdown.cancel();
    if let Err(e) = purge_task.await {
        warn!(error = %e, "Purge task did not shut down cleanly");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
