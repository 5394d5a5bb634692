// ============================
// classroom-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path (session records and recording artifacts)
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Recording buffer hand-off threshold in bytes. Chunks buffered in
    /// memory are flushed to the artifact file once this is exceeded.
    pub recording_flush_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            recording_flush_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load settings from `classroom.toml` and `CLASSROOM_`-prefixed
    /// environment variables, on top of the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from("classroom.toml")
    }

    /// Load settings from an explicit config file path.
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CLASSROOM_"))
            .extract()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.bind_addr.port(), 3000);
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert!(settings.recording_flush_bytes > 0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does-not-exist.toml").unwrap();
        assert_eq!(settings.log_level, "info");
    }
}
