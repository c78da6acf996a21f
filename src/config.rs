//! # Configuration Management
//!
//! Endpoint parameters and server settings for Herald.
//!
//! [`HeraldConfig`] describes one Herald endpoint: the name, the address and
//! port it listens on, the WebSocket path, the shared secret Links identify
//! with, and whether TLS is used. It is validated on construction and never
//! changes afterwards; [`HeraldConfig::copy`] derives variants.
//!
//! [`Settings`] is the full configuration file, layering the endpoint with
//! server tuning, logging and TLS material.
//!
//! ## Configuration Sources
//! - TOML files via [`Settings::from_file`]
//! - TOML strings via [`Settings::from_toml`]
//! - `HERALD_*` environment overrides via [`Settings::apply_env`]
//!
//! ## Example
//! ```rust
//! use herald::config::{ConfigOverrides, HeraldConfig};
//!
//! let config = HeraldConfig::new("herald", "127.0.0.1", 8765, false, "s3cret", "/herald").unwrap();
//! assert_eq!(config.url(), "ws://127.0.0.1:8765/herald");
//!
//! let other = config.copy(ConfigOverrides::default().port(9999)).unwrap();
//! assert_eq!(other.port(), 9999);
//! assert_eq!(config.port(), 8765);
//! ```

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Field separator of the identification handshake.
pub const HANDSHAKE_SEPARATOR: char = ':';

/// Default port for a Herald endpoint
pub const DEFAULT_PORT: u16 = 8765;

/// Default maximum size of one WebSocket message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Connection parameters of one Herald endpoint.
///
/// Fields are private: a config is validated once and then only read.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EndpointFields", into = "EndpointFields")]
pub struct HeraldConfig {
    name: String,
    address: String,
    port: u16,
    secure: bool,
    secret: String,
    path: String,
}

impl HeraldConfig {
    /// Build a validated endpoint configuration.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` if `name` or `secret` contains a
    /// colon, or if `path` does not start with `/`.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        secure: bool,
        secret: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            name: name.into(),
            address: address.into(),
            port,
            secure,
            secret: secret.into(),
            path: path.into(),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.name.contains(HANDSHAKE_SEPARATOR) {
            return Err(ProtocolError::ConfigError(format!(
                "name must not contain '{HANDSHAKE_SEPARATOR}': '{}'",
                self.name
            )));
        }
        if self.secret.contains(HANDSHAKE_SEPARATOR) {
            return Err(ProtocolError::ConfigError(format!(
                "secret must not contain '{HANDSHAKE_SEPARATOR}'"
            )));
        }
        if !self.path.starts_with('/') {
            return Err(ProtocolError::ConfigError(format!(
                "path must start with '/': '{}'",
                self.path
            )));
        }
        Ok(())
    }

    /// Return a new config with the given fields replaced.
    ///
    /// The receiver is left untouched; the result is validated like a fresh
    /// config.
    pub fn copy(&self, overrides: ConfigOverrides) -> Result<Self> {
        let ConfigOverrides {
            name,
            address,
            port,
            secure,
            secret,
            path,
        } = overrides;

        Self::new(
            name.unwrap_or_else(|| self.name.clone()),
            address.unwrap_or_else(|| self.address.clone()),
            port.unwrap_or(self.port),
            secure.unwrap_or(self.secure),
            secret.unwrap_or_else(|| self.secret.clone()),
            path.unwrap_or_else(|| self.path.clone()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` pair the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// WebSocket URL Links connect to
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}{}", self.address, self.port, self.path)
    }
}

impl fmt::Debug for HeraldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeraldConfig")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("secret", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            name: String::from("herald"),
            address: String::from("127.0.0.1"),
            port: DEFAULT_PORT,
            secure: false,
            secret: String::new(),
            path: String::from("/"),
        }
    }
}

/// Field replacements for [`HeraldConfig::copy`]. `None` keeps the original.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub secret: Option<String>,
    pub path: Option<String>,
}

impl ConfigOverrides {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Serialized shape of [`HeraldConfig`]; validated through `TryFrom`.
#[derive(Serialize, Deserialize)]
struct EndpointFields {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_address")]
    address: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    secret: String,
    #[serde(default = "default_path")]
    path: String,
}

fn default_name() -> String {
    HeraldConfig::default().name
}

fn default_address() -> String {
    HeraldConfig::default().address
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    HeraldConfig::default().path
}

impl TryFrom<EndpointFields> for HeraldConfig {
    type Error = ProtocolError;

    fn try_from(f: EndpointFields) -> Result<Self> {
        HeraldConfig::new(f.name, f.address, f.port, f.secure, f.secret, f.path)
    }
}

impl From<HeraldConfig> for EndpointFields {
    fn from(c: HeraldConfig) -> Self {
        Self {
            name: c.name,
            address: c.address,
            port: c.port,
            secure: c.secure,
            secret: c.secret,
            path: c.path,
        }
    }
}

/// Whether a broadcast (`*`) package is also delivered back to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPolicy {
    #[default]
    IncludeSender,
    ExcludeSender,
}

/// Full Herald configuration file
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Settings {
    /// Endpoint parameters
    #[serde(default)]
    pub endpoint: HeraldConfig,

    /// Server tuning
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Certificate material, required when `endpoint.secure` is set
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Apply `HERALD_*` environment variable overrides
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (environment in production)
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut endpoint = ConfigOverrides::default();

        if let Some(addr) = lookup("HERALD_ADDRESS") {
            endpoint = endpoint.address(addr);
        }

        if let Some(port) = lookup("HERALD_PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| ProtocolError::ConfigError(format!("Invalid HERALD_PORT: {e}")))?;
            endpoint = endpoint.port(port);
        }

        if let Some(secret) = lookup("HERALD_SECRET") {
            endpoint = endpoint.secret(secret);
        }

        self.endpoint = self.endpoint.copy(endpoint)?;

        if let Some(timeout) = lookup("HERALD_HANDSHAKE_TIMEOUT_MS") {
            let millis = timeout.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid HERALD_HANDSHAKE_TIMEOUT_MS: {e}"))
            })?;
            self.server.handshake_timeout = Duration::from_millis(millis);
        }

        if let Some(level) = lookup("HERALD_LOG_LEVEL") {
            self.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid HERALD_LOG_LEVEL: {level}")))?;
        }

        Ok(self)
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the settings for common misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means the settings are usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.endpoint.secret().is_empty() {
            errors.push("Endpoint secret cannot be empty".to_string());
        }

        if self.endpoint.address().is_empty() {
            errors.push("Endpoint address cannot be empty".to_string());
        }

        if self.endpoint.secure() && self.tls.is_none() {
            errors.push("A [tls] section is required when endpoint.secure is true".to_string());
        }

        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-side tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Deadline for the identification message
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Maximum number of connections allowed in the identification phase at once
    pub max_pending_connections: usize,

    /// Capacity of each client's outbound queue
    pub outbound_queue: usize,

    /// Time allowed for connection and routing tasks to drain on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum size of a single WebSocket message in bytes
    pub max_message_size: usize,

    /// Whether broadcasts loop back to the sender
    pub broadcast: BroadcastPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            max_pending_connections: 256,
            outbound_queue: 64,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            broadcast: BroadcastPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.max_pending_connections == 0 {
            errors.push("Max pending connections must be greater than 0".to_string());
        }

        if self.outbound_queue == 0 {
            errors.push("Outbound queue must be greater than 0".to_string());
        } else if self.outbound_queue > 65_536 {
            errors.push(format!(
                "Outbound queue too large: {} (maximum: 65536)",
                self.outbound_queue
            ));
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_message_size < 1024 {
            errors.push("Max message size too small (minimum: 1 KB)".to_string());
        } else if self.max_message_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum: 64 MB)",
                self.max_message_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name attached to the root span
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("herald"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Certificate chain and private key used when the endpoint is secure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = level.as_str().to_ascii_lowercase();
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
