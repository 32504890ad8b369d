//! sweep-server entry point

use sweep_server::{AppState, Config, api, logger};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    logger::init_logger(&config.log_level, config.log_dir.as_deref());

    tracing::info!(
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting sweep-server"
    );

    let state = AppState::new(&config).await?;
    let app = api::build_app(state);

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("sweep-server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("sweep-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
