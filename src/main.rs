use std::sync::Arc;

use anyhow::{Context, Result};
use billing_crawler::api;
use billing_crawler::crawling::{CrawlingEngine, EngineSettings};
use billing_crawler::infrastructure::config::ConfigManager;
use billing_crawler::infrastructure::connectivity::{
    AlwaysOnline, ConnectivityProbe, HttpConnectivityProbe,
};
use billing_crawler::infrastructure::logging::{init_logging_with_config, log_system_info};
use billing_crawler::infrastructure::{DigitChallengeSolver, HttpPortalFactory};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config =
        ConfigManager::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging_with_config(&config.logging).context("Failed to initialize logging")?;
    log_system_info();
    info!("📁 Input list: {:?}", config.paths.input_list);
    info!("📁 Result table: {:?}", config.paths.result_table);
    info!("📁 Failure list: {:?}", config.paths.failure_list);
    info!("📁 Status file: {:?}", config.paths.status_file);

    let probe: Arc<dyn ConnectivityProbe> = if config.connectivity.probe_url.trim().is_empty() {
        Arc::new(AlwaysOnline)
    } else {
        Arc::new(HttpConnectivityProbe::new(&config.connectivity)?)
    };
    let solver = Arc::new(DigitChallengeSolver::new()?);
    let factory = Arc::new(HttpPortalFactory::new(config.portal.clone(), solver));

    let engine = CrawlingEngine::new(EngineSettings::from(&config), factory, probe)?;
    let addr = config.server.socket_addr()?;

    let shutdown_engine = engine.clone();
    api::serve(addr, engine, async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received, stopping active run");
        shutdown_engine.shutdown().await;
    })
    .await?;

    info!("👋 Billing crawler exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
