//! Firmware-update lifecycle: install/abort commands, status relay and
//! version publication.

use crate::error::ProtocolError;
use crate::model::DeviceKey;
use crate::model::FirmwareVersion;
use gw_mqtt::Message;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FirmwareStatus {
    FileTransfer,
    FileReady,
    Installation,
    Completed,
    Aborted,
    Error,
}

/// Status codes forwarded/produced during firmware update, carried as an
/// integer in the `error` field (the only family here that is int- rather
/// than string-coded).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(i32)]
pub enum FirmwareErrorCode {
    Unspecified = 0,
    FileUploadDisabled = 1,
    UnsupportedFileSize = 2,
    InstallationFailed = 3,
    MalformedUrl = 4,
    FileSystemError = 5,
    RetryCountExceeded = 6,
    FileNotPresent = 7,
}

impl TryFrom<i32> for FirmwareErrorCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use FirmwareErrorCode::*;
        Ok(match value {
            0 => Unspecified,
            1 => FileUploadDisabled,
            2 => UnsupportedFileSize,
            3 => InstallationFailed,
            4 => MalformedUrl,
            5 => FileSystemError,
            6 => RetryCountExceeded,
            7 => FileNotPresent,
            _ => return Err(ProtocolError::InvalidJson(format!("unknown firmware error code {value}"))),
        })
    }
}

impl Serialize for FirmwareErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for FirmwareErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        FirmwareErrorCode::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareInstallCommand {
    pub device_keys: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareAbortCommand {
    pub device_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareStatusMessage {
    pub status: FirmwareStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FirmwareErrorCode>,
}

impl FirmwareStatusMessage {
    pub fn ok(status: FirmwareStatus) -> Self {
        FirmwareStatusMessage { status, error: None }
    }

    pub fn error(code: FirmwareErrorCode) -> Self {
        FirmwareStatusMessage {
            status: FirmwareStatus::Error,
            error: Some(code),
        }
    }
}

/// `p2d/firmware_update_install/d/<dev>` — no gateway prefix: the platform
/// scopes the topic to this gateway by broker ACL rather than by an
/// in-channel `g/<gw>` segment.
pub fn decode_install_command(payload: &[u8]) -> Result<FirmwareInstallCommand, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn decode_abort_command(payload: &[u8]) -> Result<FirmwareAbortCommand, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// `d2p/firmware_update_status/d/<dev>`.
pub fn encode_status(device: &DeviceKey, status: &FirmwareStatusMessage) -> Message {
    Message::new(
        format!("d2p/firmware_update_status/d/{device}"),
        serde_json::to_vec(status).expect("serializable"),
    )
}

/// Forwards an install/abort command down to a subdevice unchanged, on the
/// local broker, preserving the channel's message-type segment.
pub fn encode_install_to_device(device: &DeviceKey, command: &FirmwareInstallCommand) -> Message {
    Message::new(
        format!("p2d/firmware_update_install/d/{device}"),
        serde_json::to_vec(command).expect("serializable"),
    )
}

pub fn encode_abort_to_device(device: &DeviceKey, command: &FirmwareAbortCommand) -> Message {
    Message::new(
        format!("p2d/firmware_update_abort/d/{device}"),
        serde_json::to_vec(command).expect("serializable"),
    )
}

/// `d2p/firmware_version/d/<dev>`.
pub fn encode_firmware_version(version: &FirmwareVersion) -> Message {
    Message::new(
        format!("d2p/firmware_version/d/{}", version.device_key),
        serde_json::to_vec(version).expect("serializable"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_round_trips_int_error_code() {
        let message = FirmwareStatusMessage::error(FirmwareErrorCode::RetryCountExceeded);
        let bytes = serde_json::to_vec(&message).unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"status":"ERROR","error":6}"#
        );
        let decoded: FirmwareStatusMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.error, Some(FirmwareErrorCode::RetryCountExceeded));
    }
}
