use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deedscout_common::Config;

mod adapters;
mod app;
mod rest;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    let filter = EnvFilter::from_default_env().add_directive("deedscout=info".parse()?);
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    config.log_keys();

    let state = app::build_state(&config).await?;
    let app = app::router(state, &config.cors_origins);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("DeedScout API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
