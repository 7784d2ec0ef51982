use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `identity.nsec`.
pub const NSEC_ENV: &str = "SNOWFEED_NSEC";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub relays: RelaysConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaysConfig {
    /// Relays used for requests that name none.
    #[serde(default = "default_relays")]
    pub default: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct IdentityConfig {
    /// Secret key used to sign provider requests. A throwaway key is used when unset.
    pub nsec: Option<String>,
    /// Hex pubkey that scopes and web-of-trust resolve against.
    pub user: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RequestConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_provider_expiration_secs")]
    pub provider_expiration_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            default: default_relays(),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            provider_expiration_secs: default_provider_expiration_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_relays() -> Vec<String> {
    vec!["wss://relay.damus.io".to_string(), "wss://nos.lol".to_string()]
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_provider_expiration_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `~/.snowfeed/config.toml`, when a home directory can be found.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".snowfeed").join("config.toml"))
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = std::fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env();
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_file(&path.to_string_lossy()),
            _ => {
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(nsec) = std::env::var(NSEC_ENV) {
            if !nsec.trim().is_empty() {
                self.identity.nsec = Some(nsec);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for relay in &self.relays.default {
            if !relay.starts_with("wss://") && !relay.starts_with("ws://") {
                anyhow::bail!("Relay URL must start with ws:// or wss://: {relay}");
            }
        }

        if self.request.timeout_secs == 0 {
            anyhow::bail!("request.timeout_secs must be greater than zero");
        }

        if let Some(user) = &self.identity.user {
            if user.len() != 64 || !user.chars().all(|c| c.is_ascii_hexdigit()) {
                anyhow::bail!("identity.user must be a 64 character hex pubkey");
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request.timeout_secs)
    }

    pub fn provider_expiration(&self) -> Duration {
        Duration::from_secs(self.request.provider_expiration_secs)
    }
}

/// Read a file given on the command line, with `~` expanded.
pub fn read_input(path: &Path) -> Result<String> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    std::fs::read_to_string(&expanded).with_context(|| format!("Failed to read {}", path.display()))
}
