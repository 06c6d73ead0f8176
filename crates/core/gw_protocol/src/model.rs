//! The semantic entities shared across translators and services.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// An opaque, non-empty, globally unique device identifier.
///
/// Wrapping the raw string (rather than passing `String` everywhere) gives
/// protocol-significant strings their own type, so a caller cannot
/// accidentally pass a channel where a key is expected.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() {
            None
        } else {
            Some(DeviceKey(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The gateway's own key. A distinct type so a function signature can make
/// "this one is the gateway, not just any device" explicit.
pub type GatewayKey = DeviceKey;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub reference: String,
    pub name: String,
    #[serde(rename = "type")]
    pub feed_type: String,
    pub unit: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub key: String,
    pub name: String,
    pub template_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// A single reading value, or a multi-value reading (`value | values[]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Single(f64),
    Multiple(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub reference: String,
    #[serde(flatten)]
    pub value: ReadingValue,
    /// 0 means "use current wall-clock time at send time".
    pub timestamp_ms_since_epoch: i64,
}

impl Reading {
    pub const USE_CURRENT_TIME: i64 = 0;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Connected,
    Offline,
    Sleep,
    Service,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub hash_hex: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub device_key: String,
    pub version: String,
}
