//! Timing and provisioning settings, loadable from JSON.

use crate::constants::{APP_KEY_SIZE, EUI_SIZE};
use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    pub join: JoinConfig,
    pub fetch: FetchConfig,
}

impl LinkConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LinkError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, LinkError> {
        let config: LinkConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.transport.read_slice_ms == 0 {
            return Err(LinkError::InvalidConfig("transport.read_slice_ms must be > 0".into()));
        }
        if self.join.poll_attempts == 0 {
            return Err(LinkError::InvalidConfig("join.poll_attempts must be > 0".into()));
        }
        if self.fetch.window_ms == 0 || self.fetch.read_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "fetch.window_ms and fetch.read_timeout_ms must be > 0".into(),
            ));
        }
        if self.join.check_join_status && self.join.status_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig("join.status_timeout_ms must be > 0".into()));
        }
        if let Some(otaa) = &self.join.otaa {
            otaa.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Sub-timeout of each bulk IN transfer while waiting for a line.
    pub read_slice_ms: u64,
    /// Keep bytes after a newline for the next read instead of dropping them.
    pub retain_partial_lines: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_slice_ms: 250,
            retain_partial_lines: false,
        }
    }
}

impl TransportConfig {
    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.read_slice_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub attention_timeout_ms: u64,
    pub echo_off_timeout_ms: u64,
    /// Write timeout of `AT+JOIN`, and write/read timeout of provisioning commands.
    pub command_timeout_ms: u64,
    pub poll_attempts: u32,
    pub poll_read_timeout_ms: u64,
    /// Ask the module with `AT+NJS=?` first and skip the join when it reports `1`.
    pub check_join_status: bool,
    /// How long to wait for the `0`/`1` answer to `AT+NJS=?`.
    pub status_timeout_ms: u64,
    pub otaa: Option<OtaaCredentials>,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            attention_timeout_ms: 500,
            echo_off_timeout_ms: 1000,
            command_timeout_ms: 1000,
            poll_attempts: 30,
            poll_read_timeout_ms: 500,
            check_join_status: false,
            status_timeout_ms: 5000,
            otaa: None,
        }
    }
}

impl JoinConfig {
    pub fn attention_timeout(&self) -> Duration {
        Duration::from_millis(self.attention_timeout_ms)
    }

    pub fn echo_off_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_off_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_read_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_read_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub send_timeout_ms: u64,
    /// Total time spent waiting for a downlink.
    pub window_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 2000,
            window_ms: 8000,
            read_timeout_ms: 1000,
        }
    }
}

impl FetchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// LoRaWAN OTAA credentials written to the module before joining.
///
/// Values are hex strings; spaces and colons are accepted as separators
/// (`"A8 40 41 68 E1 89 62 1F"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaaCredentials {
    pub dev_eui: String,
    pub app_eui: String,
    pub app_key: String,
}

impl OtaaCredentials {
    pub fn validate(&self) -> Result<(), LinkError> {
        normalize_hex("dev_eui", &self.dev_eui, EUI_SIZE)?;
        normalize_hex("app_eui", &self.app_eui, EUI_SIZE)?;
        normalize_hex("app_key", &self.app_key, APP_KEY_SIZE)?;
        Ok(())
    }

    pub fn dev_eui_hex(&self) -> Result<String, LinkError> {
        normalize_hex("dev_eui", &self.dev_eui, EUI_SIZE)
    }

    pub fn app_eui_hex(&self) -> Result<String, LinkError> {
        normalize_hex("app_eui", &self.app_eui, EUI_SIZE)
    }

    pub fn app_key_hex(&self) -> Result<String, LinkError> {
        normalize_hex("app_key", &self.app_key, APP_KEY_SIZE)
    }
}

/// Strips separators, checks the byte length and re-encodes as contiguous uppercase hex.
fn normalize_hex(field: &str, value: &str, len: usize) -> Result<String, LinkError> {
    let compact: String = value.chars().filter(|c| !matches!(c, ' ' | ':' | '-')).collect();
    let bytes = hex::decode(&compact)
        .map_err(|e| LinkError::InvalidConfig(format!("join.otaa.{field}: {e}")))?;
    if bytes.len() != len {
        return Err(LinkError::InvalidConfig(format!(
            "join.otaa.{field}: expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(hex::encode_upper(bytes))
}
