//! File inventory, chunked upload and URL-download lifecycle.
//!
//! Channel sub-actions live under the `file` message-type segment: the outer
//! pattern is `d2p/file/g/<gw>[/d/<dev>]`, and the sub-action name is the
//! next token, the same shape the `dfu` submodule uses for
//! `firmware_update_*`.

use crate::channel::segment;
use crate::error::ProtocolError;
use crate::model::FileInfo;
use gw_mqtt::Message;
use serde::Deserialize;
use serde::Serialize;

mod action {
    pub const UPLOAD_INITIATE: &str = "upload_initiate";
    pub const UPLOAD_CHUNK: &str = "upload_chunk";
    pub const UPLOAD_ABORT: &str = "upload_abort";
    pub const URL_DOWNLOAD_INITIATE: &str = "url_download_initiate";
    pub const URL_DOWNLOAD_ABORT: &str = "url_download_abort";
    pub const URL_DOWNLOAD_STATUS: &str = "url_download_status";
    pub const STATUS: &str = "status";
    pub const LIST_REQUEST: &str = "list_request";
    pub const LIST_RESPONSE: &str = "list_response";
    pub const PURGE: &str = "purge";
    pub const DELETE: &str = "delete";
}

fn channel(action: &str) -> String {
    format!("d2p/{}/{}", segment::FILE, action)
}

fn channel_to_device(action: &str) -> String {
    format!("p2d/{}/{}", segment::FILE, action)
}

/// `file/upload_initiate` request payload: `{name, size, hash_base64}`. The
/// hash is base64 here, unlike the hex encoding `FileInfo`/existing-device
/// persistence use on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadInitiate {
    pub name: String,
    pub size: u64,
    pub hash_base64: String,
}

pub fn decode_upload_initiate(payload: &[u8]) -> Result<UploadInitiate, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// A packet request the gateway sends down to the uploading device:
/// `{fileName, chunkIndex, chunkSize}`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PacketRequest {
    pub file_name: String,
    pub chunk_index: u32,
    pub chunk_size: u32,
}

/// `p2d/file/upload_chunk`: the gateway's request for the next (or a
/// retried) chunk. The device answers on the sibling `d2p` channel of the
/// same action ([`upload_chunk_channel`]) with a raw binary [`Chunk`]
/// envelope, so both directions share the `upload_chunk` action name.
pub fn encode_packet_request(request: &PacketRequest) -> Message {
    Message::new(
        channel_to_device(action::UPLOAD_CHUNK),
        serde_json::to_vec(request).expect("serializable"),
    )
}

/// `d2p/file/upload_chunk` — the binary chunk channel a device replies on.
pub fn upload_chunk_channel() -> String {
    channel(action::UPLOAD_CHUNK)
}

/// A binary chunk envelope: `[prev_hash(32B)][data(N B)][hash(32B)]`, with
/// `hash = SHA-256(data)` — the link that forms the chunk chain.
pub struct Chunk {
    pub previous_hash: [u8; 32],
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

pub const ZERO_HASH: [u8; 32] = [0u8; 32];

impl Chunk {
    pub fn new(previous_hash: [u8; 32], data: Vec<u8>) -> Self {
        let hash = sha256::digest(data.as_slice());
        let mut hash_bytes = [0u8; 32];
        hex::decode_to_slice(&hash, &mut hash_bytes).expect("sha256::digest always returns 64 hex chars");
        Chunk {
            previous_hash,
            data,
            hash: hash_bytes,
        }
    }

    /// `true` when `hash` actually matches `SHA-256(data)`.
    pub fn hash_is_valid(&self) -> bool {
        let digest = sha256::digest(self.data.as_slice());
        let mut expected = [0u8; 32];
        hex::decode_to_slice(&digest, &mut expected).expect("sha256::digest always returns 64 hex chars");
        expected == self.hash
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64 + self.data.len());
        bytes.extend_from_slice(&self.previous_hash);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.hash);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < 64 {
            return Err(ProtocolError::InvalidJson(
                "binary chunk payload shorter than the 64-byte hash envelope".to_string(),
            ));
        }
        let mut previous_hash = [0u8; 32];
        previous_hash.copy_from_slice(&bytes[0..32]);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[bytes.len() - 32..]);
        let data = bytes[32..bytes.len() - 32].to_vec();
        Ok(Chunk {
            previous_hash,
            data,
            hash,
        })
    }
}

/// `file/upload_abort`: `{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAbort {
    pub name: String,
}

pub fn decode_upload_abort(payload: &[u8]) -> Result<UploadAbort, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// `file/url_download_initiate`: `{url}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlDownloadInitiate {
    pub url: String,
}

pub fn decode_url_download_initiate(payload: &[u8]) -> Result<UrlDownloadInitiate, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlDownloadAbort {
    pub url: String,
}

pub fn decode_url_download_abort(payload: &[u8]) -> Result<UrlDownloadAbort, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Reported once a URL download completes: `{url, fileName}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUrlDownloadStatus {
    pub url: String,
    pub file_name: String,
}

pub fn encode_url_download_status(status: &FileUrlDownloadStatus) -> Message {
    Message::new(
        channel(action::URL_DOWNLOAD_STATUS),
        serde_json::to_vec(status).expect("serializable"),
    )
}

/// Result/error codes specific to the file-transfer family. Distinct from
/// [`crate::codec::dfu::FirmwareErrorCode`] because this family carries two
/// codes (`FILE_HASH_MISMATCH`, `TRANSFER_PROTOCOL_DISABLED`) the DFU
/// family's error list does not.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    FileTransfer,
    FileReady,
    Aborted,
    FileHashMismatch,
    TransferProtocolDisabled,
    Error,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileErrorCode {
    Unspecified,
    UnsupportedFileSize,
    FileSystemError,
    RetryCountExceeded,
    FileNotPresent,
    MalformedUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatusMessage {
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileErrorCode>,
}

impl FileStatusMessage {
    pub fn ok(status: FileStatus) -> Self {
        FileStatusMessage { status, error: None }
    }

    pub fn error(code: FileErrorCode) -> Self {
        FileStatusMessage {
            status: FileStatus::Error,
            error: Some(code),
        }
    }
}

pub fn encode_status(status: &FileStatusMessage) -> Message {
    Message::new(channel(action::STATUS), serde_json::to_vec(status).expect("serializable"))
}

/// `file/list_response`: the full current inventory, published after every
/// mutating file-repository operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
}

pub fn encode_list_response(files: Vec<FileInfo>) -> Message {
    Message::new(
        channel(action::LIST_RESPONSE),
        serde_json::to_vec(&FileListResponse { files }).expect("serializable"),
    )
}

/// `file/delete`: `{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub name: String,
}

pub fn decode_delete_request(payload: &[u8]) -> Result<DeleteRequest, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn is_list_request(channel_str: &str) -> bool {
    channel_str.ends_with(action::LIST_REQUEST)
}

pub fn is_purge(channel_str: &str) -> bool {
    channel_str.ends_with(action::PURGE)
}

pub fn is_upload_initiate(channel_str: &str) -> bool {
    channel_str.ends_with(action::UPLOAD_INITIATE)
}

pub fn is_upload_chunk(channel_str: &str) -> bool {
    channel_str.ends_with(action::UPLOAD_CHUNK)
}

pub fn is_upload_abort(channel_str: &str) -> bool {
    channel_str.ends_with(action::UPLOAD_ABORT)
}

pub fn is_url_download_initiate(channel_str: &str) -> bool {
    channel_str.ends_with(action::URL_DOWNLOAD_INITIATE)
}

pub fn is_url_download_abort(channel_str: &str) -> bool {
    channel_str.ends_with(action::URL_DOWNLOAD_ABORT)
}

pub fn is_delete(channel_str: &str) -> bool {
    channel_str.ends_with(action::DELETE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_round_trips_through_binary_envelope() {
        let chunk = Chunk::new(ZERO_HASH, b"hello world".to_vec());
        let bytes = chunk.encode();
        let decoded = Chunk::decode(&bytes).unwrap();
        assert_eq!(decoded.previous_hash, ZERO_HASH);
        assert_eq!(decoded.data, b"hello world");
        assert_eq!(decoded.hash, chunk.hash);
        assert!(decoded.hash_is_valid());
    }

    #[test]
    fn tampered_data_fails_hash_validation() {
        let chunk = Chunk::new(ZERO_HASH, b"hello world".to_vec());
        let mut bytes = chunk.encode();
        let last = bytes.len() - 33;
        bytes[last] ^= 0xFF;
        let decoded = Chunk::decode(&bytes).unwrap();
        assert!(!decoded.hash_is_valid());
    }

    #[test]
    fn error_status_serializes_with_code() {
        let message = FileStatusMessage::error(FileErrorCode::RetryCountExceeded);
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"status":"ERROR","error":"RETRY_COUNT_EXCEEDED"}"#);
    }
}
