//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use multiexec_core::DispatchConfig;
use multiexec_exec::SshConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MULTIEXEC_CONFIG";
/// Environment variable overriding `dispatch.max_concurrency`
pub const CONCURRENCY_ENV: &str = "MULTIEXEC_CONCURRENCY";

/// Top-level configuration for multiexec daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon server settings
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Run dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshSettings,
}

/// Daemon server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address and port to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Largest accepted upload body, in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_upload_mb() -> usize {
    64
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn load_default() -> eyre::Result<Self> {
        let mut config = Self::find_and_load()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn find_and_load() -> eyre::Result<Self> {
        // Check environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        // Try common paths
        let paths = [
            Some(PathBuf::from("multiexec.toml")),
            Some(PathBuf::from("/etc/multiexec/multiexec.toml")),
            dirs::config_dir().map(|p| p.join("multiexec/multiexec.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading config");
                return Self::load(&path);
            }
        }

        // Return default config if no file found
        tracing::warn!("no config file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment overrides
    ///
    /// # Errors
    /// Returns error if an override is not a valid value
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> eyre::Result<()> {
        if let Some(value) = var(CONCURRENCY_ENV) {
            let limit: usize = value
                .trim()
                .parse()
                .map_err(|e| eyre::eyre!("invalid {CONCURRENCY_ENV}={value}: {e}"))?;
            self.dispatch.max_concurrency = (limit > 0).then_some(limit);
        }
        Ok(())
    }

    /// Dispatch settings with the SSH port applied
    ///
    /// The daemon never exports session logs, so sessions keep none.
    #[must_use]
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            ssh_port: self.ssh.port,
            log_capacity: 0,
            ..self.dispatch.clone()
        }
    }

    #[must_use]
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
        }
    }
}
