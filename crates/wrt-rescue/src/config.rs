use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::debug;
use wrt_rescue_core::RescueConfig;

/// Read the TOML configuration; a missing file means all defaults
pub async fn load_config(path: &Path) -> Result<RescueConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!("No configuration at {}, using defaults", path.display());
        return Ok(RescueConfig::default());
    }

    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: RescueConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

    Ok(config)
}

pub async fn save_config(path: &Path, config: &RescueConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    fs::write(path, contents)
        .await
        .context("Failed to write configuration file")?;

    Ok(())
}
