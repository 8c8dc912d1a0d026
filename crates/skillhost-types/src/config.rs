//! Host configuration types for skillhost.
//!
//! `HostConfig` represents the top-level `config.toml` that bounds execution:
//! timeouts, artifact limits, stream keepalive cadence, and the interpreters
//! used to launch bundle entrypoints.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the execution host.
///
/// Loaded from `~/.skillhost/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Timeout applied when neither the caller nor the bundle declares one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Upper bound applied to every effective timeout.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Largest artifact file a run may declare.
    #[serde(default = "default_max_artifact_size_bytes")]
    pub max_artifact_size_bytes: u64,

    /// Maximum number of artifacts a single run may declare.
    #[serde(default = "default_max_artifacts_per_run")]
    pub max_artifacts_per_run: usize,

    /// Idle interval after which an event stream yields a keepalive.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,

    /// Parent directory for per-run working directories (system temp dir when unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir_root: Option<PathBuf>,

    /// Interpreter for `.py` entrypoints.
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Interpreter for `.sh` entrypoints.
    #[serde(default = "default_shell_bin")]
    pub shell_bin: String,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_timeout_secs() -> u64 {
    300
}

fn default_max_artifact_size_bytes() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_max_artifacts_per_run() -> usize {
    20
}

fn default_stream_idle_timeout_secs() -> u64 {
    15
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_shell_bin() -> String {
    "bash".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            max_artifact_size_bytes: default_max_artifact_size_bytes(),
            max_artifacts_per_run: default_max_artifacts_per_run(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            workdir_root: None,
            python_bin: default_python_bin(),
            shell_bin: default_shell_bin(),
        }
    }
}

impl HostConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_default_values() {
        let config = HostConfig::default();
        assert_eq!(config.default_timeout_secs, 60);
        assert_eq!(config.max_timeout_secs, 300);
        assert_eq!(config.max_artifact_size_bytes, 104_857_600);
        assert_eq!(config.max_artifacts_per_run, 20);
        assert_eq!(config.stream_idle_timeout(), Duration::from_secs(15));
        assert!(config.workdir_root.is_none());
        assert_eq!(config.python_bin, "python3");
    }

    #[test]
    fn test_host_config_deserialize_with_defaults() {
        let config: HostConfig = toml::from_str("").unwrap();
        assert_eq!(config.default_timeout_secs, 60);
        assert_eq!(config.shell_bin, "bash");
    }

    #[test]
    fn test_host_config_deserialize_with_values() {
        let toml_str = r#"
default_timeout_secs = 5
max_timeout_secs = 30
max_artifacts_per_run = 3
workdir_root = "/var/tmp/skillhost"
python_bin = "/usr/local/bin/python3.12"
"#;
        let config: HostConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_artifacts_per_run, 3);
        assert_eq!(config.workdir_root, Some(PathBuf::from("/var/tmp/skillhost")));
        assert_eq!(config.python_bin, "/usr/local/bin/python3.12");
        // Unspecified fields keep their defaults
        assert_eq!(config.stream_idle_timeout_secs, 15);
    }
}
