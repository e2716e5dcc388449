//! Client configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.backplane/` by default)
//! and deserializes it into [`BackplaneConfig`]. Falls back to defaults when
//! the file is missing or malformed; command-line flags fill in or override
//! whatever the file provides.

use std::path::Path;

use backplane_types::config::BackplaneConfig;

pub const CONFIG_FILE: &str = "config.toml";

/// Load client configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`BackplaneConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_client_config(data_dir: &Path) -> BackplaneConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return BackplaneConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return BackplaneConfig::default();
        }
    };

    match toml::from_str::<BackplaneConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            BackplaneConfig::default()
        }
    }
}
