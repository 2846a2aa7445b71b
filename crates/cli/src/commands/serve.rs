//! `campusd serve` — Start the HTTP API server.

use anyhow::Context;
use campusd_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load_path(config_path).context("Failed to load config")?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Campusd gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Store:     {}", config.store.backend);
    println!("   Model:     {}", config.reasoner.model);

    campusd_gateway::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}
