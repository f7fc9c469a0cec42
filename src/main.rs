mod config;
mod guard;
mod proxy;
mod routes;
mod state;
mod upstream;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let upstream = upstream::HttpUpstream::new(config.api_base_url.clone(), config.timeouts)
        .expect("upstream client init failed");
    tracing::info!(
        upstream = upstream.base_url(),
        site_dir = %config.site_dir.display(),
        "upstream client initialized"
    );

    let port = config.port;
    let state = state::AppState::new(config, Arc::new(upstream));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "platform360 listening");
    axum::serve(listener, app).await.expect("server failed");
}
