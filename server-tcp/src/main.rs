use std::sync::Arc;

use server_tcp::{ServerState, serve};
use shared::config::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = ServerConfig::from_env();
    if config.password.is_some() {
        info!("Clients must AUTH before issuing commands");
    }

    let state = Arc::new(ServerState::new(config.password.clone()));
    let listener = TcpListener::bind(config.bind_addr()).await?;

    info!("TCP Server listening on tcp://{}", listener.local_addr()?);

    serve(listener, state).await?;
    Ok(())
}
