//! Gateway settings.
//!
//! Loaded once at startup (TOML file, then command line overrides), validated,
//! and shared read-only between every session.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::framer::FramerKind;

/// How the gateway reaches its instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Listen on `listen_address` and accept any number of connections.
    Server,
    /// Dial `listen_address` and reconnect whenever the connection drops.
    Client,
    /// Read from `serial_port`.
    Serial,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind in server mode, or to dial in client mode.
    pub listen_address: String,
    pub mode: Mode,
    /// Where extracted results are POSTed. Results are only logged when unset.
    pub endpoint: Option<String>,
    pub debug: bool,
    /// Accept HL7 over MLLP.
    pub hl7: bool,
    /// Accept ASTM E1381.
    pub astm: bool,
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub sink_timeout_secs: u64,
    /// Wait after a failed dial or serial open before trying again.
    pub reconnect_delay_secs: u64,
    /// Wait after a client or serial session ends before reconnecting.
    pub reconnect_pause_secs: u64,
    /// Largest message or frame accepted, in bytes.
    pub max_message_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            listen_address: "0.0.0.0:7007".to_string(),
            mode: Mode::Server,
            endpoint: None,
            debug: false,
            hl7: true,
            astm: false,
            serial_port: None,
            baud_rate: 9600,
            sink_timeout_secs: 10,
            reconnect_delay_secs: 5,
            reconnect_pause_secs: 2,
            max_message_len: 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        GatewayConfig::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.framer_kind()?;
        if self.mode == Mode::Serial && self.serial_port.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingSerialPort);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Zero("baud_rate"));
        }
        if self.sink_timeout_secs == 0 {
            return Err(ConfigError::Zero("sink_timeout_secs"));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Zero("max_message_len"));
        }
        Ok(())
    }

    /// The framer every session of this gateway uses.
    pub fn framer_kind(&self) -> Result<FramerKind, ConfigError> {
        FramerKind::from_flags(self.hl7, self.astm).ok_or(ConfigError::NoProtocol)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_secs(self.reconnect_pause_secs)
    }
}
