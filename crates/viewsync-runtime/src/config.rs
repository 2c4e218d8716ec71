//! Engine configuration, loaded from TOML. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use viewsync_core::ShellSource;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Grace period between disconnect and Context cleanup.
    pub cleanup_delay_ms: u64,
    /// Shell template path. `None` uses the built-in shell.
    pub shell: Option<PathBuf>,
    /// Inspection socket path. `None` uses [`default_socket_path`].
    pub socket_path: Option<String>,
    /// Head injections added to every assembled document.
    pub head: Vec<String>,
    /// Foot injections added to every assembled document.
    pub foot: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_ms: 5_000,
            shell: None,
            socket_path: None,
            head: Vec::new(),
            foot: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn shell_source(&self) -> ShellSource {
        match &self.shell {
            Some(path) => ShellSource::Path(path.clone()),
            None => ShellSource::default(),
        }
    }

    pub fn socket_path(&self) -> String {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/viewsync/viewsync.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/viewsync-{user}/viewsync.sock")
}
