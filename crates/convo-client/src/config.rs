//! Client configuration: gateway environment, channel identity, socket and
//! retry tuning.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientConfig::default()`]
//! 2. If a config file exists, deep-merge its values over the defaults
//! 3. Apply `CONVO_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use convo_core::{RetryConfig, VisitorId};

/// Failure while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed.
    #[error("config file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// The config file or merged value is not valid.
    #[error("config parse failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The loaded values cannot describe a usable session.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which gateway region the client talks to.
///
/// Named regions resolve to well-known URL pairs; `Custom` supplies both
/// directly (used for staging and tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Environment {
    /// `gateway-na` / `channels-na`.
    NorthAmerica,
    /// `gateway-eu` / `channels-eu`.
    Europe,
    /// `gateway-au` / `channels-au`.
    Australia,
    /// `gateway-uk` / `channels-uk`.
    UnitedKingdom,
    /// `gateway-jp` / `channels-jp`.
    Japan,
    /// Explicit URL pair.
    #[serde(rename_all = "camelCase")]
    Custom {
        /// Base HTTP URL of the chat backend.
        chat_url: String,
        /// WebSocket URL of the gateway.
        socket_url: String,
    },
}

impl Environment {
    fn region(&self) -> Option<&'static str> {
        match self {
            Self::NorthAmerica => Some("na"),
            Self::Europe => Some("eu"),
            Self::Australia => Some("au"),
            Self::UnitedKingdom => Some("uk"),
            Self::Japan => Some("jp"),
            Self::Custom { .. } => None,
        }
    }

    /// Base HTTP URL of the chat backend for this environment.
    #[must_use]
    pub fn chat_url(&self) -> String {
        match self {
            Self::Custom { chat_url, .. } => chat_url.clone(),
            named => format!(
                "https://channels-{}.convo.chat/chat",
                named.region().unwrap_or("na")
            ),
        }
    }

    /// WebSocket URL of the gateway for this environment.
    #[must_use]
    pub fn socket_url(&self) -> String {
        match self {
            Self::Custom { socket_url, .. } => socket_url.clone(),
            named => format!(
                "wss://gateway-{}.convo.chat",
                named.region().unwrap_or("na")
            ),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::NorthAmerica
    }
}

/// How many concurrent threads a channel supports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelMode {
    /// One active thread per customer.
    #[default]
    SingleThread,
    /// Any number of named threads.
    MultiThread,
    /// One thread, gated on agent availability.
    LiveChat,
}

/// Socket-level tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    /// How often a heartbeat probe is sent.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long the connection may go without any liveness signal.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// How long a command waits for its response before timing out.
    #[serde(default = "default_command_deadline_ms")]
    pub command_deadline_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    4_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_command_deadline_ms() -> u64 {
    30_000
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            command_deadline_ms: default_command_deadline_ms(),
        }
    }
}

/// Everything a session needs to reach its channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Numeric brand id.
    #[serde(default)]
    pub brand_id: i32,
    /// Channel id string (e.g. `chat_b2...`).
    #[serde(default)]
    pub channel_id: String,
    /// Gateway region.
    #[serde(default)]
    pub environment: Environment,
    /// Thread model of the channel.
    #[serde(default)]
    pub channel_mode: ChannelMode,
    /// Whether a live-chat channel currently has agents online. Ignored for
    /// other channel modes.
    #[serde(default = "default_true")]
    pub live_chat_available: bool,
    /// Persisted visitor id from a previous run; a fresh one is minted at
    /// prepare time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<VisitorId>,
    /// Socket tuning.
    #[serde(default)]
    pub socket: SocketConfig,
    /// Reconnection backoff tuning.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brand_id: 0,
            channel_id: String::new(),
            environment: Environment::default(),
            channel_mode: ChannelMode::default(),
            live_chat_available: true,
            visitor_id: None,
            socket: SocketConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// A config for the given channel with default tuning.
    #[must_use]
    pub fn new(brand_id: i32, channel_id: impl Into<String>, environment: Environment) -> Self {
        Self {
            brand_id,
            channel_id: channel_id.into(),
            environment,
            ..Self::default()
        }
    }

    /// Checks the config describes a reachable channel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brand_id <= 0 {
            return Err(ConfigError::Invalid(format!(
                "brandId must be positive, got {}",
                self.brand_id
            )));
        }
        if self.channel_id.is_empty() {
            return Err(ConfigError::Invalid("channelId must not be empty".into()));
        }
        if self.socket.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeatIntervalMs must not be zero".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the path to the config file (`~/.convo/config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".convo").join("config.json")
}

/// Load config from the default path with env var overrides.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(&config_path())
}

/// Load config from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains invalid
/// JSON, returns an error.
pub fn load_config_from_path(path: &Path) -> Result<ClientConfig, ConfigError> {
    let defaults = serde_json::to_value(ClientConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading client config from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: ClientConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to a loaded config.
///
/// Each env var has strict parsing rules; invalid values are ignored with a
/// warning, falling back to the file/default value.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    if let Some(v) = read_env_i32("CONVO_BRAND_ID", 1, i32::MAX) {
        config.brand_id = v;
    }
    if let Some(v) = read_env_string("CONVO_CHANNEL_ID") {
        config.channel_id = v;
    }
    if let Some(v) = read_env_string("CONVO_ENVIRONMENT") {
        if let Ok(env) = serde_json::from_value(Value::String(v)) {
            config.environment = env;
        }
    }
    if let Some(v) = read_env_string("CONVO_CHANNEL_MODE") {
        if let Ok(mode) = serde_json::from_value(Value::String(v)) {
            config.channel_mode = mode;
        }
    }
    if let Some(v) = read_env_bool("CONVO_LIVE_CHAT_AVAILABLE") {
        config.live_chat_available = v;
    }
    if let Some(v) = read_env_u64("CONVO_HEARTBEAT_INTERVAL_MS", 250, 600_000) {
        config.socket.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("CONVO_HEARTBEAT_TIMEOUT_MS", 250, 600_000) {
        config.socket.heartbeat_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("CONVO_COMMAND_DEADLINE_MS", 1_000, 600_000) {
        config.socket.command_deadline_ms = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
#[must_use]
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
#[must_use]
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `i32` within a range.
#[must_use]
pub fn parse_i32_range(val: &str, min: i32, max: i32) -> Option<i32> {
    let n: i32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_i32(name: &str, min: i32, max: i32) -> Option<i32> {
    let val = std::env::var(name).ok()?;
    let result = parse_i32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid i32 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
