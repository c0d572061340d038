use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use herald_core::ServerConfig;
use herald_gateway::{app, BroadcastServer, HandlerBinding, LogHandler, ServerRegistry};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "herald-gateway", version, about = "Server-sent events broadcast gateway")]
struct Cli {
    /// Path to herald.toml (falls back to HERALD_CONFIG, then ~/.herald/herald.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_gateway=info,herald_history=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // invalid settings abort startup before anything binds
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    let server = BroadcastServer::new(config)?;

    let registry = ServerRegistry::new();
    registry.register("default", Arc::new(server.clone()));

    let tasks = server.spawn_background(vec![HandlerBinding::all(Arc::new(LogHandler))])?;

    let addr: SocketAddr = server.config().bind_addr().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Herald gateway listening on {}{}", addr, server.config().path);

    let mut http = tokio::spawn(app::serve(server.clone(), listener));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown signal received");
        }
        res = &mut http => {
            // the listener died on its own; still tear everything down below
            match res {
                Ok(Ok(())) => warn!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
        }
    }

    server.stop().await;
    registry.unregister("default");

    if !http.is_finished() {
        match tokio::time::timeout(server.config().shutdown_timeout(), http).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server shut down with error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task panicked during shutdown"),
            Err(_) => warn!("HTTP server did not drain before the shutdown timeout"),
            Ok(Ok(Ok(()))) => {}
        }
    }
    tasks.join().await;

    info!("Herald gateway stopped");
    Ok(())
}
