//! Uploader configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ghs/upload.toml`
//! - Windows: `%APPDATA%/ghs/upload.toml`
//!
//! A missing file means defaults; the file is never written by the tool.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ghs_upload::UploadConfig;
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the file server, e.g. `http://nas:8080`.
    #[serde(default)]
    pub server: Option<String>,

    /// Path prefix the multipart endpoints are mounted under.
    #[serde(default)]
    pub prefix: String,

    /// Destination directory on the server.
    #[serde(default = "default_dest")]
    pub dest: String,

    /// Per-request timeout in seconds (0 = none).
    #[serde(default)]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub upload: UploadConfig,
}

fn default_dest() -> String {
    "/".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            prefix: String::new(),
            dest: default_dest(),
            request_timeout_secs: 0,
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path` if given (it must exist), otherwise the default
    /// location, falling back to defaults when that file is absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ghs").join("upload.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("ghs")
            .join("upload.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.server.is_none());
        assert_eq!(config.dest, "/");
        assert_eq!(config.upload.concurrency, 3);
        assert_eq!(config.upload.chunk_size, 8 * 1024 * 1024);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
server = "http://nas:8080"

[upload]
concurrency = 6
rate_interval = 1000

[upload.part_retry]
max_attempts = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.as_deref(), Some("http://nas:8080"));
        assert_eq!(config.dest, "/");
        assert_eq!(config.upload.concurrency, 6);
        assert_eq!(config.upload.threshold, 3);
        assert_eq!(config.upload.rate_interval, Duration::from_secs(1));
        assert_eq!(config.upload.part_retry.max_attempts, 10);
        assert_eq!(
            config.upload.part_retry.initial_delay,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            server: Some("https://files.example".into()),
            prefix: "/api".into(),
            dest: "/backup".into(),
            request_timeout_secs: 30,
            upload: UploadConfig {
                parallel_files: 2,
                multipart_enabled: false,
                ..UploadConfig::default()
            },
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn explicit_path_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("upload.toml");
        std::fs::write(&path, "dest = \"/incoming\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.dest, "/incoming");
        assert!(config.upload.multipart_enabled);
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("ghs"));
    }
}
