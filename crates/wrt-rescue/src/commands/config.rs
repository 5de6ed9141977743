use anyhow::Result;
use std::path::Path;
use wrt_rescue_core::config::validate_config;
use wrt_rescue_core::{Notice, Operator, RescueConfig};

use crate::config::save_config;

/// `wrt-rescue init-config`: write the defaults, refusing to clobber an existing file
pub async fn init(path: &Path, force: bool, operator: &dyn Operator) -> Result<()> {
    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }

    save_config(path, &RescueConfig::default()).await?;
    operator.notify(
        Notice::Success,
        &format!("Wrote config to {}", path.display()),
    );
    Ok(())
}

/// `wrt-rescue check-config`
pub fn check(path: &Path, config: &RescueConfig, operator: &dyn Operator) -> Result<()> {
    validate_config(config)?;
    operator.notify(Notice::Success, &format!("Config OK: {}", path.display()));
    Ok(())
}
