//! Configuration for the subscriber and publisher.
//!
//! Loads a TOML file with `${VAR}` environment substitution, then applies
//! the environment overrides the deployment relies on (`APP_PORT`).
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 6010
//!
//! [store]
//! backend = "mysql"
//! url = "mysql://${MYSQL_USER}:${MYSQL_PASSWORD}@db:3306/aweme"
//!
//! [pubsub]
//! dead_letter_topic = "deadletter"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Config file path used when `CONFIG_FILE_PATH` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/aweme-sub.toml";

/// Listening port used when neither the file nor `APP_PORT` set one.
pub const DEFAULT_APP_PORT: u16 = 6010;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SubConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pubsub: PubsubConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    DEFAULT_APP_PORT
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Mysql,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

fn default_store_url() -> String {
    "mysql://root@localhost:3306/aweme".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PubsubConfig {
    /// Topic the bus forwards dropped events to, if any
    #[serde(default)]
    pub dead_letter_topic: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherConfig {
    #[serde(default = "default_sidecar_url")]
    pub sidecar_url: String,

    #[serde(default = "default_publish_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sidecar_url: default_sidecar_url(),
            timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl PublisherConfig {
    /// Replace the fields given on the command line.
    pub fn with_overrides(mut self, sidecar_url: Option<String>, timeout_ms: Option<u64>) -> Self {
        if let Some(url) = sidecar_url {
            self.sidecar_url = url;
        }
        if let Some(ms) = timeout_ms {
            self.timeout_ms = ms;
        }
        self
    }
}

fn default_sidecar_url() -> String {
    "http://localhost:3500".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

impl SubConfig {
    /// Load from `CONFIG_FILE_PATH` (or the default path) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("CONFIG_FILE_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load from a specific path. A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            info!(path = %path.display(), "Loading configuration");
            let content = fs::read_to_string(path)?;
            Self::parse(&substitute_env_vars(&content))?
        } else {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;

        info!(
            port = config.server.port,
            store = ?config.store.backend,
            dead_letter_topic = ?config.pubsub.dead_letter_topic,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        debug!("Parsing TOML configuration");
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("APP_PORT").filter(|p| !p.is_empty()) {
            self.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("APP_PORT '{}' is not a valid port", port))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Mysql && !self.store.url.starts_with("mysql://") {
            return Err(ConfigError::ValidationError(
                "store.url must start with mysql://".to_string(),
            ));
        }

        if self.store.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "store.max_connections must be at least 1".to_string(),
            ));
        }

        let sidecar = &self.publisher.sidecar_url;
        if !sidecar.starts_with("http://") && !sidecar.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "publisher.sidecar_url '{}' must start with http:// or https://",
                sidecar
            )));
        }

        if let Some(topic) = &self.pubsub.dead_letter_topic {
            if topic.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "pubsub.dead_letter_topic must not be blank".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("AWEME_SUB_TEST_VAR", "substituted_value");
        let input = "url = \"${AWEME_SUB_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("AWEME_SUB_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${AWEME_SUB_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${AWEME_SUB_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = SubConfig::default();
        assert_eq!(config.server.port, 6010);
        assert_eq!(config.server.addr().to_string(), "0.0.0.0:6010");
        assert_eq!(config.store.backend, StoreBackend::Mysql);
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(30));
        assert!(config.pubsub.dead_letter_topic.is_none());
        assert!(!config.log.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 7000

            [log]
            json = true
            level = "debug"

            [store]
            backend = "memory"

            [pubsub]
            dead_letter_topic = "deadletter"

            [shutdown]
            timeout_secs = 5

            [publisher]
            sidecar_url = "http://dapr:3500"
            timeout_ms = 250
        "#;

        let config = SubConfig::parse(toml).unwrap();
        assert_eq!(config.server.addr().to_string(), "127.0.0.1:7000");
        assert!(config.log.json);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.pubsub.dead_letter_topic.as_deref(), Some("deadletter"));
        assert_eq!(config.shutdown.timeout_secs, 5);
        assert_eq!(config.publisher.sidecar_url, "http://dapr:3500");
        assert_eq!(config.publisher.timeout_ms, 250);
    }

    #[test]
    fn test_app_port_override() {
        let mut config = SubConfig::default();
        config
            .apply_overrides(|key| (key == "APP_PORT").then(|| "6100".to_string()))
            .unwrap();
        assert_eq!(config.server.port, 6100);
    }

    #[test]
    fn test_empty_app_port_keeps_default() {
        let mut config = SubConfig::default();
        config.apply_overrides(|_| Some(String::new())).unwrap();
        assert_eq!(config.server.port, DEFAULT_APP_PORT);
    }

    #[test]
    fn test_invalid_app_port() {
        let mut config = SubConfig::default();
        let result = config.apply_overrides(|_| Some("http".to_string()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_non_mysql_url() {
        let config = SubConfig::parse(
            r#"
            [store]
            url = "postgres://localhost/aweme"
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_backend_ignores_url() {
        let config = SubConfig::parse(
            r#"
            [store]
            backend = "memory"
            url = "anything"
        "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_sidecar_url() {
        let config = SubConfig::parse(
            r#"
            [publisher]
            sidecar_url = "localhost:3500"
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_blank_dead_letter_topic() {
        let config = SubConfig::parse(
            r#"
            [pubsub]
            dead_letter_topic = "  "
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_publisher_overrides() {
        let config = SubConfig::parse(
            r#"
            [publisher]
            sidecar_url = "http://dapr:3500"
            timeout_ms = 250
        "#,
        )
        .unwrap();

        let kept = config.publisher.clone().with_overrides(None, None);
        assert_eq!(kept.sidecar_url, "http://dapr:3500");
        assert_eq!(kept.timeout_ms, 250);

        let overridden = config
            .publisher
            .with_overrides(Some("http://localhost:3501".into()), Some(1000));
        assert_eq!(overridden.sidecar_url, "http://localhost:3501");
        assert_eq!(overridden.timeout_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = SubConfig::load_from("/nonexistent/aweme-sub.toml");
        // APP_PORT may be set in the environment running the tests
        assert!(config.is_ok());
    }
}
