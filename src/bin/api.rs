use finvoice_orchestrator::{api::start_server, bootstrap::Runtime, config::AppConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("🚀 FinVoice Orchestrator - API Server");
    info!("📍 Port: {}", config.port);

    let runtime = Runtime::connect(&config).await?;
    info!("✅ Orchestrator initialized");

    start_server(runtime.orchestrator.clone(), config.port, shutdown_signal()).await?;

    runtime.shutdown().await;
    Ok(())
}
