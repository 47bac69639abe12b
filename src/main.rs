mod config;
mod frame;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::GameConfig::from_env().expect("invalid configuration");
    tracing::info!(
        grid_size = config.grid_size,
        challenge_ttl = ?config.challenge_ttl,
        disconnect_grace = ?config.disconnect_grace,
        "configuration loaded"
    );

    let state = state::AppState::new(config);

    // Spawn background expiry of challenges and rooms.
    let _sweeper = services::sweeper::spawn_sweeper_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "loopsquares listening");
    axum::serve(listener, app).await.expect("server failed");
}
