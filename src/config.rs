// MIT License - Copyright (c) 2021 TJForc
// Session and registry configuration

use std::path::PathBuf;

use tokio::time::Duration;

use crate::constants::TELNET_PORT;
use crate::error::ConfigError;

/// Configuration for the integration session with a Lutron controller.
#[derive(Debug, Clone)]
pub struct LutronConfig {
    /// Controller host name or IP address
    pub host: String,
    /// Telnet port (default: 23)
    pub port: u16,
    /// Integration login user (default: lutron)
    pub user: String,
    /// Integration login password (default: integration)
    pub password: String,
    /// Timeout for establishing the TCP connection in milliseconds
    pub connect_timeout_ms: u64,
    /// Timeout for each login prompt in milliseconds
    pub prompt_timeout_ms: u64,
    /// Poll tick of the session reader in milliseconds
    pub read_timeout_ms: u64,
    /// Base delay between reconnection attempts (exponential backoff)
    pub reconnect_delay_ms: u64,
}

impl Default for LutronConfig {
    fn default() -> Self {
        Self {
            host: "lutron.local".to_string(),
            port: TELNET_PORT,
            user: "lutron".to_string(),
            password: "integration".to_string(),
            connect_timeout_ms: 60_000,
            prompt_timeout_ms: 10_000,
            read_timeout_ms: 10_000,
            reconnect_delay_ms: 1_000,
        }
    }
}

impl LutronConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> LutronConfigBuilder {
        LutronConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Delay before reconnection attempt `attempt` (1-based), capped at 16x the base.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(
            self.reconnect_delay_ms
                .saturating_mul(1u64 << (attempt - 1).min(4)),
        )
    }
}

/// Builder for LutronConfig.
#[derive(Debug, Clone, Default)]
pub struct LutronConfigBuilder {
    config: LutronConfig,
}

impl LutronConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn prompt_timeout_ms(mut self, ms: u64) -> Self {
        self.config.prompt_timeout_ms = ms;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn build(self) -> LutronConfig {
        self.config
    }
}

/// Where a section file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from disk on every load
    File(PathBuf),
    /// In-memory text, labelled for error messages
    Inline { label: String, text: String },
}

impl ConfigSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn inline(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Inline {
            label: label.into(),
            text: text.into(),
        }
    }

    /// Name used in log records and error messages.
    pub fn origin(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Inline { label, .. } => label.clone(),
        }
    }

    /// Read the full text of the source.
    pub fn read(&self) -> std::result::Result<String, ConfigError> {
        match self {
            Self::File(path) => std::fs::read_to_string(path).map_err(|source| {
                ConfigError::Read {
                    path: path.clone(),
                    source,
                }
            }),
            Self::Inline { text, .. } => Ok(text.clone()),
        }
    }
}

/// The pair of sources the registry is (re)loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySources {
    pub scenes: ConfigSource,
    pub picos: ConfigSource,
}

impl RegistrySources {
    pub fn new(scenes: ConfigSource, picos: ConfigSource) -> Self {
        Self { scenes, picos }
    }

    pub fn files(scenes: impl Into<PathBuf>, picos: impl Into<PathBuf>) -> Self {
        Self {
            scenes: ConfigSource::file(scenes),
            picos: ConfigSource::file(picos),
        }
    }
}
