//! Relay configuration.
//!
//! Configuration can be loaded from a JSON document or from the flat
//! string property map a hosting runtime hands to a data source plugin.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WINDOW_SIZE: u64 = 1000;

/// How many times the transport retries establishing its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum ConnectRetries {
    Bounded(u32),
    /// Encoded as `-1` in properties.
    Forever,
}

impl ConnectRetries {
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            // the first connect is not a retry
            ConnectRetries::Bounded(n) => Some(n.saturating_add(1)),
            ConnectRetries::Forever => None,
        }
    }
}

impl Default for ConnectRetries {
    fn default() -> Self {
        ConnectRetries::Forever
    }
}

impl TryFrom<i64> for ConnectRetries {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(ConnectRetries::Forever),
            n if n >= 0 => u32::try_from(n)
                .map(ConnectRetries::Bounded)
                .map_err(|_| Error::Config(format!("connect retries out of range: {}", n))),
            n => Err(Error::Config(format!(
                "connect retries must be -1 or non-negative, got {}",
                n
            ))),
        }
    }
}

impl From<ConnectRetries> for i64 {
    fn from(value: ConnectRetries) -> Self {
        match value {
            ConnectRetries::Bounded(n) => n as i64,
            ConnectRetries::Forever => -1,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransportConfig {
    pub host: String,
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub vpn_name: String,
    #[serde(default)]
    pub connect_retries: ConnectRetries,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("vpn_name", &self.vpn_name)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("transport host must be non-empty".to_string()));
        }
        if self.vpn_name.trim().is_empty() {
            return Err(Error::Config("VPN name must be non-empty".to_string()));
        }
        if self.user_name.trim().is_empty() {
            return Err(Error::Config("client username must be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Window and chunk settings for a [`crate::cursor::CursorEnumerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CursorConfig {
    /// Maximum records requested per window.
    pub window_size: u64,
    /// Hard cap on records emitted across all windows.
    pub chunk_limit: u64,
    pub base_offset: u64,
    /// Scan by ascending identifier. Best-effort only, see the cursor docs.
    pub order_by_id: bool,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            chunk_limit: u64::MAX,
            base_offset: 0,
            order_by_id: true,
        }
    }
}

impl CursorConfig {
    pub fn new(window_size: u64) -> Self {
        Self {
            window_size,
            ..Default::default()
        }
    }

    pub fn with_chunk(mut self, base_offset: u64, chunk_limit: u64) -> Self {
        self.base_offset = base_offset;
        self.chunk_limit = chunk_limit;
        self
    }

    pub fn with_order_by_id(mut self, order_by_id: bool) -> Self {
        self.order_by_id = order_by_id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::Config("window size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayConfig {
    /// Name of the data grid space; also the destination queue name.
    pub space_name: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub transport: TransportConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl RelayConfig {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Build from the flat property map of a hosting runtime.
    ///
    /// Recognized keys: `SpaceName`, `MaxAttempts`, `Transport.Host`,
    /// `Transport.UserName`, `Transport.Password`, `Transport.VpnName`,
    /// `Transport.ConnectRetries`, `Cursor.WindowSize`, `Cursor.ChunkLimit`,
    /// `Cursor.BaseOffset` and `Cursor.OrderById`.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let props = Properties(properties);
        let defaults = CursorConfig::default();

        let config = RelayConfig {
            space_name: props.required("SpaceName")?,
            max_attempts: props.parsed("MaxAttempts", DEFAULT_MAX_ATTEMPTS)?,
            transport: TransportConfig {
                host: props.required("Transport.Host")?,
                user_name: props.required("Transport.UserName")?,
                password: props.optional("Transport.Password").unwrap_or_default(),
                vpn_name: props.optional("Transport.VpnName").unwrap_or_default(),
                connect_retries: ConnectRetries::try_from(
                    props.parsed::<i64>("Transport.ConnectRetries", -1)?,
                )?,
            },
            cursor: CursorConfig {
                window_size: props.parsed("Cursor.WindowSize", defaults.window_size)?,
                chunk_limit: props.parsed("Cursor.ChunkLimit", defaults.chunk_limit)?,
                base_offset: props.parsed("Cursor.BaseOffset", defaults.base_offset)?,
                order_by_id: props.parsed("Cursor.OrderById", defaults.order_by_id)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.space_name.trim().is_empty() {
            return Err(Error::Config("space name must be non-empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max attempts must be at least 1".to_string()));
        }
        self.transport.validate()?;
        self.cursor.validate()
    }

    pub fn queue_name(&self) -> &str {
        &self.space_name
    }
}

struct Properties<'a>(&'a HashMap<String, String>);

impl Properties<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| v.trim().to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| Error::Config(format!("missing property {}", key)))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, raw))),
        }
    }
}
