use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

mod config;
mod handlers;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tekserver_core::logging::init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let port = config.port;
    let state = Arc::new(AppState::new(config)?);

    let app = Router::new()
        .route("/", post(handlers::publish))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "publish-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown");
        })
        .await?;
    Ok(())
}
