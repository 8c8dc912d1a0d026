//! Host configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.skillhost/` in
//! production) into [`HostConfig`]. A missing or malformed file falls back to
//! defaults so the host always starts.

use std::path::{Path, PathBuf};

use skillhost_types::config::HostConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SKILLHOST_DATA_DIR";

/// Resolve the data directory: `SKILLHOST_DATA_DIR`, else `~/.skillhost`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skillhost")
}

/// Directory durable artifacts are copied into.
pub fn artifacts_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("artifacts")
}

/// SQLite URL for the run database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("skillhost.db").display())
}

/// Load host configuration from `{data_dir}/config.toml`.
pub async fn load_host_config(data_dir: &Path) -> HostConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return HostConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return HostConfig::default();
        }
    };

    match toml::from_str::<HostConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            HostConfig::default()
        }
    }
}

/// Keep the default timeout within the maximum.
fn sanitize(mut config: HostConfig) -> HostConfig {
    if config.default_timeout_secs > config.max_timeout_secs {
        tracing::warn!(
            default = config.default_timeout_secs,
            max = config.max_timeout_secs,
            "default_timeout_secs exceeds max_timeout_secs; clamping"
        );
        config.default_timeout_secs = config.max_timeout_secs;
    }
    config
}
