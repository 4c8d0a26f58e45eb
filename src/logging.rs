use std::path::Path;

use anyhow::{Context, Result};

/// Location of the optional log4rs configuration, relative to the workspace root.
pub const LOG_CONFIG_PATH: &str = "config/log4rs.yaml";

/// Installs the global logger.
///
/// A `config/log4rs.yaml` in the workspace wins; otherwise `env_logger` is used,
/// filtered by `RUST_LOG` and defaulting to `info`.
pub fn init(workspace_root: &Path) -> Result<()> {
    let config_path = workspace_root.join(LOG_CONFIG_PATH);
    if config_path.exists() {
        log4rs::init_file(&config_path, Default::default())
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        log::debug!("Logging configured from {}", config_path.display());
        return Ok(());
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()
        .context("logger already initialized")?;
    Ok(())
}
