use std::net::SocketAddr;

use axum::{
    routing::{any, get, post},
    Router,
};
use herald_core::Result;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http;
use crate::server::BroadcastServer;

/// Assemble the router: the stream endpoint at `path` plus its admin
/// siblings (`{path}/health`, `/metrics`, `/connections`, `/publish`).
pub fn build_router(server: BroadcastServer) -> Router {
    let base = server.config().base_path().to_string();
    let stream_path = if base.is_empty() { "/".to_string() } else { base.clone() };

    let router = Router::new()
        .route(&stream_path, any(http::stream::stream_handler))
        .route(&format!("{base}/health"), get(http::admin::health_handler))
        .route(&format!("{base}/metrics"), get(http::admin::metrics_handler))
        .route(
            &format!("{base}/connections"),
            get(http::admin::connections_handler),
        )
        .route(&format!("{base}/publish"), post(http::publish::publish_handler))
        .with_state(server.clone());

    let router = if server.config().enable_cors {
        router.layer(server.cors().layer())
    } else {
        router
    };
    router.layer(TraceLayer::new_for_http())
}

/// Serve until the server's shutdown token fires.
pub async fn serve(server: BroadcastServer, listener: TcpListener) -> Result<()> {
    let shutdown = server.shutdown_token();
    let router = build_router(server);
    info!(addr = ?listener.local_addr().ok(), "accepting HTTP connections");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;
    Ok(())
}
