//! `campusd init` — Write a default campusd.toml.

use campusd_config::AppConfig;
use std::path::Path;

pub fn run(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    std::fs::write(config_path, AppConfig::default_toml())?;
    println!("Wrote {}", config_path.display());
    println!("Set CAMPUSD_API_KEY (or reasoner.api_key) before serving.");
    Ok(())
}
