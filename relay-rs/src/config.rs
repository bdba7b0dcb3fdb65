//! Relay configuration
//!
//! A [`Config`] is an immutable snapshot decoded from a TOML file. Every
//! section is merged field by field over the compiled-in defaults: a key
//! present in the file replaces the default value entirely (lists and maps
//! included), a missing key keeps the default.
//!
//! [`ConfigStore`] publishes the current snapshot behind an atomic pointer
//! and refreshes it in the background when the file changes on disk.
//!
//! # Example
//!
//! ```toml
//! logLevel = "debug"
//!
//! [server]
//! address = "127.0.0.1"
//! port = 2525
//! dataPath = "/var/lib/relay-rs/messages"
//!
//! [filters]
//! to = ["^spam@", "@blocked\\.example$"]
//! maxMessageSize = 10485760
//!
//! [proxy]
//! address = "smtp.example.com"
//! port = 587
//! username = "relay@example.com"
//! password = "upstream-secret"
//!
//! [auth.plain]
//! "app@example.com" = "s3cret"
//! ```

use crate::error::{RelayError, Result};
use crate::logging::LevelHandle;
use arc_swap::ArcSwap;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default interval between two checks of the configuration file
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum message size (8 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Rendering used for every secret in logs and dumps
pub const REDACTED: &str = "**redacted**";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub server: ServerConfig,
    pub filters: FilterConfig,
    pub proxy: ProxyConfig,
    pub auth: AuthConfig,
    pub log_level: LogLevel,
}

/// Inbound listener and local persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Directory receiving one file per accepted message. Empty disables persistence.
    pub data_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<PathBuf>,
}

/// Destination filtering and size policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    /// Recipient patterns; the first match drops the message
    pub to: Vec<Pattern>,
    pub max_message_size: usize,
    pub oversize: OversizePolicy,
}

/// Upstream relay every accepted message is forwarded to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub tls: TlsMode,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    /// Username to secret table checked by AUTH PLAIN
    pub plain: BTreeMap<String, Secret>,
}

/// What to do with a body larger than `maxMessageSize`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Fail the relay, nothing is stored or forwarded
    #[default]
    Reject,
    /// Keep the first `maxMessageSize` bytes
    Truncate,
}

/// Transport security towards the upstream relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connect followed by STARTTLS (submission, port 587)
    #[default]
    StartTls,
    /// TLS from the first byte (port 465)
    Implicit,
    /// No encryption. Only meant for a relay on the loopback interface.
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 2525,
            data_path: PathBuf::from("/var/lib/relay-rs/messages"),
            log_file_path: None,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            to: Vec::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            oversize: OversizePolicy::default(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 587,
            username: String::new(),
            password: Secret::default(),
            tls: TlsMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl ProxyConfig {
    /// `address:port`, or the bare address when no port is set
    pub fn addr(&self) -> String {
        if self.port == 0 {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Credentials are only used when both halves are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.expose()))
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::from_toml(&content)
    }

    /// Decode a snapshot, merging it over the defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.filters.max_message_size == 0 {
            return Err(RelayError::Config(
                "filters.maxMessageSize must be greater than zero".to_string(),
            ));
        }

        for (username, _) in self.auth.plain.iter() {
            if username.is_empty() {
                return Err(RelayError::Config(
                    "auth.plain contains an empty username".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// JSON rendering with every secret redacted
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A compiled recipient filter rule
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|source| RelayError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.0.is_match(haystack)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// A credential that never renders in cleartext
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret().as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret::new)
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(RelayError::Config(format!("Unknown log level '{}'", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Holds the live configuration snapshot
///
/// Readers call [`ConfigStore::load`] once per operation and keep the returned
/// `Arc` for its duration. The refresher is the only writer; it replaces the
/// whole snapshot with a single atomic store.
pub struct ConfigStore {
    state: ArcSwap<Config>,
    target: Option<PathBuf>,
    /// Modification time of the file behind the current snapshot
    last_sync: Mutex<Option<SystemTime>>,
    level_override: Option<LogLevel>,
    level: Option<LevelHandle>,
}

impl ConfigStore {
    /// Load the configuration file. Any failure here is fatal for the caller.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let target = path.into();
        let modified = modified_at(&target)?;
        let config = Config::from_file(&target)?;
        debug!("Loaded configuration: {}", config.to_json_pretty()?);

        Ok(Self {
            state: ArcSwap::from_pointee(config),
            target: Some(target),
            last_sync: Mutex::new(Some(modified)),
            level_override: None,
            level: None,
        })
    }

    /// A store without a backing file; `reload` never changes it
    pub fn from_config(config: Config) -> Self {
        Self {
            state: ArcSwap::from_pointee(config),
            target: None,
            last_sync: Mutex::new(None),
            level_override: None,
            level: None,
        }
    }

    /// Pin the log level regardless of what the file says
    pub fn with_level_override(mut self, level: Option<LogLevel>) -> Self {
        self.level_override = level;
        self
    }

    /// Attach the subscriber handle updated after each successful reload
    pub fn with_level_handle(mut self, handle: LevelHandle) -> Self {
        handle.set(self.log_level());
        self.level = Some(handle);
        self
    }

    /// Current snapshot
    pub fn load(&self) -> Arc<Config> {
        self.state.load_full()
    }

    pub fn path(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    /// Effective log level: the override if any, the snapshot's otherwise
    pub fn log_level(&self) -> LogLevel {
        self.level_override.unwrap_or(self.state.load().log_level)
    }

    /// Re-read the file if it changed since the last successful sync
    ///
    /// Returns `Ok(true)` when a new snapshot was published. On error the
    /// previous snapshot stays in effect.
    pub fn reload(&self) -> Result<bool> {
        let Some(target) = &self.target else {
            return Ok(false);
        };

        let mut last_sync = self
            .last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let modified = modified_at(target)?;
        if matches!(*last_sync, Some(synced) if modified <= synced) {
            return Ok(false);
        }

        let config = Config::from_file(target)?;
        debug!("Loaded new configuration: {}", config.to_json_pretty()?);

        self.state.store(Arc::new(config));
        *last_sync = Some(modified);

        if let Some(handle) = &self.level {
            handle.set(self.log_level());
        }

        Ok(true)
    }

    /// Check the file every `every` and reload it when it changed
    pub fn spawn_refresher(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately and the file was just loaded
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let store = self.clone();
                let outcome = match tokio::task::spawn_blocking(move || store.reload()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Configuration reload task failed: {}", e);
                        continue;
                    }
                };
                match outcome {
                    Ok(true) => {
                        info!(
                            "Configuration reloaded from {}",
                            self.target.as_deref().unwrap_or(Path::new("-")).display()
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to reload configuration, keeping previous: {}", e);
                    }
                }
            }
        })
    }
}

fn modified_at(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| RelayError::Config(format!("Failed to stat {}: {}", path.display(), e)))
}
