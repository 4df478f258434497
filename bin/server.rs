// Meter Readings - Web Server
// Accepts CSV uploads of meter readings over HTTP

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use meter_readings::seed_accounts_from_csv;
use meter_readings::server::{router, AppState};
use meter_readings::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::parse();
    let conn = config.store.open_database()?;

    // A failed seed is logged; the server still starts
    if let Err(e) = seed_accounts_from_csv(&conn, &config.store.seed_file) {
        error!("An error occurred while seeding the database: {:#}", e);
    }

    let state = AppState::new(conn, config.store.batch_options());
    let app = router(state, &config.cors_origin, config.max_upload_bytes)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("🚀 Server running on http://{}", config.bind_addr);
    info!(
        "   Upload: POST /meter-reading-uploads (multipart field 'file', max {} bytes)",
        config.max_upload_bytes
    );

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
