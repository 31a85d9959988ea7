use std::sync::Arc;

use anyhow::{Context, Result};
use archway_gateway::{
    cli::{self, Cli, Commands},
    config::ServerConfig,
    proxy::UpstreamClient,
    serve,
    state::AppState,
    telemetry::Telemetry,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, signal};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Tap(args)) = cli.command {
        Telemetry::init_client()?;
        return cli::run_tap(args).await;
    }

    let telemetry = Telemetry::init()?;
    let config = ServerConfig::try_from(cli.serve)?;
    info!(
        listen_addr = %config.listen_addr,
        ai_service_url = %config.ai_service_url,
        outbound_buffer = config.outbound_buffer,
        "starting archway gateway"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let upstream = UpstreamClient::new(&config.ai_service_url, config.upstream_timeout)
        .context("failed to build AI service client")?;
    let state = Arc::new(AppState::new(
        upstream,
        config.outbound_buffer,
        Some(metrics),
    ));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("API gateway running at http://{}", config.listen_addr);

    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
