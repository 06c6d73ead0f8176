//! The file transfer service: a single active chunked-upload slot per
//! gateway, plus a concurrent map of in-flight URL downloads keyed by URL.

use crate::downloader::file_name_of;
use crate::downloader::UrlDownloader;
use crate::error::FileTransferError;
use crate::state::FileTransferState;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use gw_lifecycle::RetryTable;
use gw_mqtt::Message;
use gw_persistence::FileRepository;
use gw_protocol::codec::file;
use gw_protocol::codec::file::Chunk;
use gw_protocol::codec::file::FileErrorCode;
use gw_protocol::codec::file::FileStatus;
use gw_protocol::codec::file::FileStatusMessage;
use gw_protocol::codec::file::FileUrlDownloadStatus;
use gw_protocol::codec::file::PacketRequest;
use gw_protocol::model::FileInfo;
use gw_publisher::Publisher;
use gw_router::Handler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing::info;
use tracing::warn;

pub const MAX_RETRY_COUNT: u32 = 3;
pub const PACKET_REQUEST_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 4096;

enum UrlDownloadState {
    InProgress,
    Complete,
}

/// File inventory, chunked upload, and URL download. The chunked-upload
/// retry logic is tracked through [`RetryTable`] exactly like
/// registration/deletion, keyed by the fixed `upload_chunk` response channel
/// since only one chunked upload is active at a time.
pub struct FileTransferService {
    file_repository: Arc<dyn FileRepository>,
    platform_publisher: Arc<Publisher>,
    device_publisher: Arc<Publisher>,
    retry: Arc<RetryTable>,
    url_downloader: Option<Arc<dyn UrlDownloader>>,
    download_directory: PathBuf,
    max_file_size: u64,
    max_packet_size: u32,
    active_upload: Mutex<Option<FileTransferState>>,
    url_downloads: Mutex<HashMap<String, UrlDownloadState>>,
}

impl FileTransferService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_repository: Arc<dyn FileRepository>,
        platform_publisher: Arc<Publisher>,
        device_publisher: Arc<Publisher>,
        retry: Arc<RetryTable>,
        url_downloader: Option<Arc<dyn UrlDownloader>>,
        download_directory: PathBuf,
        max_file_size: u64,
        max_packet_size: u32,
    ) -> Arc<Self> {
        Arc::new(FileTransferService {
            file_repository,
            platform_publisher,
            device_publisher,
            retry,
            url_downloader,
            download_directory,
            max_file_size,
            max_packet_size,
            active_upload: Mutex::new(None),
            url_downloads: Mutex::new(HashMap::new()),
        })
    }

    async fn publish_status(&self, message: FileStatusMessage) {
        self.platform_publisher.add_message(file::encode_status(&message)).await;
    }

    async fn refresh_list(&self) {
        match self.file_repository.list_infos() {
            Ok(files) => self.platform_publisher.add_message(file::encode_list_response(files)).await,
            Err(err) => error!(%err, "failed to list files for inventory refresh"),
        }
    }

    pub async fn handle_upload_initiate(&self, payload: &[u8]) {
        let request = match file::decode_upload_initiate(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed upload_initiate; dropping");
                return;
            }
        };

        if request.name.is_empty() || request.size == 0 {
            self.publish_status(FileStatusMessage::error(FileErrorCode::UnsupportedFileSize)).await;
            return;
        }
        if request.size > self.max_file_size {
            self.publish_status(FileStatusMessage::error(FileErrorCode::UnsupportedFileSize)).await;
            return;
        }

        let expected_hash = match BASE64.decode(&request.hash_base64) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                hash
            }
            _ => {
                self.publish_status(FileStatusMessage::error(FileErrorCode::Unspecified)).await;
                return;
            }
        };

        match self.file_repository.get_info(&request.name) {
            Ok(Some(existing)) => {
                let hash_hex = hex::encode(expected_hash);
                if existing.hash_hex == hash_hex {
                    self.publish_status(FileStatusMessage::ok(FileStatus::FileReady)).await;
                } else {
                    self.publish_status(FileStatusMessage::ok(FileStatus::FileHashMismatch)).await;
                }
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!(%err, "file repository lookup failed during upload_initiate");
                self.publish_status(FileStatusMessage::error(FileErrorCode::FileSystemError)).await;
                return;
            }
        }

        let state = FileTransferState::new(request.name.clone(), request.size, expected_hash, self.max_packet_size);
        let packet_size = state.packet_size;
        *self.active_upload.lock() = Some(state);

        self.publish_status(FileStatusMessage::ok(FileStatus::FileTransfer)).await;
        self.request_chunk(request.name, 0, packet_size).await;
    }

    async fn request_chunk(&self, file_name: String, chunk_index: u32, chunk_size: u32) {
        let request = PacketRequest {
            file_name,
            chunk_index,
            chunk_size,
        };
        let message = file::encode_packet_request(&request);
        self.retry.track_with(
            file::upload_chunk_channel(),
            message.clone(),
            MAX_RETRY_COUNT,
            PACKET_REQUEST_TIMEOUT,
            Some(Box::new({
                let service_status = self.status_give_up_sender();
                move || service_status(FileErrorCode::RetryCountExceeded)
            })),
        );
        self.device_publisher.add_message(message).await;
    }

    /// A retry give-up callback must be `Send + 'static` and cannot hold
    /// `&self`; this closes over a cloned publisher handle instead.
    fn status_give_up_sender(&self) -> impl Fn(FileErrorCode) + Send + Sync + 'static {
        let publisher = self.platform_publisher.clone();
        move |code| {
            let publisher = publisher.clone();
            tokio::spawn(async move {
                publisher.add_message(file::encode_status(&FileStatusMessage::error(code))).await;
            });
        }
    }

    pub async fn handle_upload_chunk(&self, payload: &[u8]) {
        self.retry.resolve(&file::upload_chunk_channel());

        let chunk = match Chunk::decode(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(%err, "malformed binary chunk; dropping");
                return;
            }
        };

        enum Outcome {
            Completed(FileTransferState),
            Retry(String, u32, u32),
            RetryExhausted,
        }

        let outcome = {
            let mut guard = self.active_upload.lock();
            let Some(state) = guard.as_mut() else {
                warn!("chunk received with no active upload; dropping");
                return;
            };
            let chunk_index = state.next_chunk_index;
            if state.accept(&chunk) {
                if state.is_last_chunk() {
                    let completed = guard.take().expect("checked above");
                    Outcome::Completed(completed)
                } else {
                    let next_index = state.next_chunk_index;
                    let file_name = state.name.clone();
                    let packet_size = state.packet_size;
                    Outcome::Retry(file_name, next_index, packet_size)
                }
            } else if state.note_failed_attempt(MAX_RETRY_COUNT) {
                warn!(name = %state.name, chunk_index, "chunk retry budget exhausted; abandoning transfer");
                guard.take();
                Outcome::RetryExhausted
            } else {
                let file_name = state.name.clone();
                let packet_size = state.packet_size;
                Outcome::Retry(file_name, chunk_index, packet_size)
            }
        };

        match outcome {
            Outcome::Completed(completed) => self.finish_upload(completed).await,
            Outcome::Retry(file_name, next_index, packet_size) => {
                self.request_chunk(file_name, next_index, packet_size).await;
            }
            Outcome::RetryExhausted => {
                self.publish_status(FileStatusMessage::error(FileErrorCode::RetryCountExceeded)).await;
            }
        }
    }

    async fn finish_upload(&self, state: FileTransferState) {
        if !state.whole_file_hash_matches() {
            warn!(name = %state.name, "whole-file hash mismatch after chunk chain completed");
            self.publish_status(FileStatusMessage::ok(FileStatus::FileHashMismatch)).await;
            return;
        }

        let target_path = self.download_directory.join(&state.name);
        if let Err(source) = std::fs::write(&target_path, &state.buffer) {
            error!(%source, path = %target_path.display(), "failed to write completed upload to disk");
            self.publish_status(FileStatusMessage::error(FileErrorCode::FileSystemError)).await;
            return;
        }

        let hash_hex = hex::encode(state.expected_hash);
        if let Err(err) = self.file_repository.store(FileInfo {
            name: state.name.clone(),
            size: state.size,
            hash_hex,
        }) {
            error!(%err, "failed to record completed upload in the file repository");
        }

        self.publish_status(FileStatusMessage::ok(FileStatus::FileReady)).await;
        self.refresh_list().await;
    }

    pub async fn handle_upload_abort(&self, payload: &[u8]) {
        let request = match file::decode_upload_abort(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed upload_abort; dropping");
                return;
            }
        };
        let mut guard = self.active_upload.lock();
        if matches!(guard.as_ref(), Some(state) if state.name == request.name) {
            *guard = None;
            drop(guard);
            self.retry.resolve(&file::upload_chunk_channel());
            self.publish_status(FileStatusMessage::ok(FileStatus::Aborted)).await;
        }
    }

    pub async fn handle_url_download_initiate(&self, payload: &[u8]) {
        let request = match file::decode_url_download_initiate(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed url_download_initiate; dropping");
                return;
            }
        };

        let Some(downloader) = self.url_downloader.clone() else {
            self.publish_status(FileStatusMessage::error(FileErrorCode::Unspecified)).await;
            return;
        };

        self.url_downloads.lock().insert(request.url.clone(), UrlDownloadState::InProgress);

        match downloader.download(&request.url).await {
            Ok(path) => {
                let file_name = file_name_of(&path);
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        let hash_hex = sha256::digest(bytes.as_slice());
                        let size = bytes.len() as u64;
                        if let Err(err) = self.file_repository.store(FileInfo {
                            name: file_name.clone(),
                            size,
                            hash_hex,
                        }) {
                            error!(%err, "failed to record URL download in the file repository");
                        }
                        self.url_downloads.lock().insert(request.url.clone(), UrlDownloadState::Complete);
                        self.platform_publisher
                            .add_message(file::encode_url_download_status(&FileUrlDownloadStatus {
                                url: request.url,
                                file_name,
                            }))
                            .await;
                        self.refresh_list().await;
                    }
                    Err(source) => {
                        error!(%source, "failed to read back downloaded file");
                        self.publish_status(FileStatusMessage::error(FileErrorCode::FileSystemError)).await;
                    }
                }
            }
            Err(err) => {
                warn!(%err, url = %request.url, "URL download failed");
                self.url_downloads.lock().remove(&request.url);
                self.publish_status(FileStatusMessage::error(FileErrorCode::MalformedUrl)).await;
            }
        }
    }

    pub async fn handle_url_download_abort(&self, payload: &[u8]) {
        let request = match file::decode_url_download_abort(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed url_download_abort; dropping");
                return;
            }
        };
        self.url_downloads.lock().remove(&request.url);
        self.publish_status(FileStatusMessage::ok(FileStatus::Aborted)).await;
    }

    pub async fn handle_delete(&self, payload: &[u8]) {
        let request = match file::decode_delete_request(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed delete request; dropping");
                return;
            }
        };
        if let Err(err) = self.file_repository.remove(&request.name) {
            error!(%err, name = %request.name, "failed to delete file");
        }
        self.refresh_list().await;
    }

    pub async fn handle_purge(&self) {
        if let Err(err) = self.file_repository.remove_all() {
            error!(%err, "failed to purge file repository");
        }
        self.refresh_list().await;
    }

    pub async fn handle_list_request(&self) {
        self.refresh_list().await;
    }

    /// Sweeps completed URL-download entries out of the in-flight map. A
    /// polling sweep rather than a notify-driven one, since [`Mutex`] has no
    /// async notify primitive worth adding for a rarely-populated map.
    pub fn collect_garbage(&self) {
        self.url_downloads.lock().retain(|_, state| !matches!(state, UrlDownloadState::Complete));
    }

    pub fn spawn_garbage_collector(self: &Arc<Self>, interval: Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                service.collect_garbage();
            }
        });
    }
}

pub struct FileTransferPlatformHandler(pub Arc<FileTransferService>);

#[async_trait]
impl Handler for FileTransferPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["p2d/file/#".to_string()]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        if file::is_upload_abort(channel) {
            self.0.handle_upload_abort(payload).await;
        } else if file::is_url_download_initiate(channel) {
            self.0.handle_url_download_initiate(payload).await;
        } else if file::is_url_download_abort(channel) {
            self.0.handle_url_download_abort(payload).await;
        } else if file::is_delete(channel) {
            self.0.handle_delete(payload).await;
        } else if file::is_purge(channel) {
            self.0.handle_purge().await;
        } else if file::is_list_request(channel) {
            self.0.handle_list_request().await;
        } else if file::is_upload_initiate(channel) {
            self.0.handle_upload_initiate(payload).await;
        }
    }
}

/// A separate handler for the device-facing broker: only `upload_chunk`'s
/// binary reply travels there.
pub struct FileTransferLocalHandler(pub Arc<FileTransferService>);

#[async_trait]
impl Handler for FileTransferLocalHandler {
    fn patterns(&self) -> Vec<String> {
        vec![file::upload_chunk_channel()]
    }

    async fn on_message(&self, _channel: &str, payload: &[u8]) {
        self.0.handle_upload_chunk(payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_persistence::Discipline;
    use gw_persistence::FilesystemFileRepository;
    use gw_persistence::OutboundQueue;
    use tempfile::tempdir;

    struct NoopTransport;

    #[async_trait::async_trait]
    impl gw_mqtt::MqttTransport for NoopTransport {
        fn is_connected(&self) -> bool {
            false
        }
        async fn connect(&self) -> Result<(), gw_mqtt::MqttError> {
            Err(gw_mqtt::MqttError::NotConnected)
        }
        async fn disconnect(&self) {}
        async fn subscribe(&self, _pattern: &str) -> Result<(), gw_mqtt::MqttError> {
            Ok(())
        }
        async fn publish(&self, _message: &Message) -> Result<(), gw_mqtt::MqttError> {
            Err(gw_mqtt::MqttError::NotConnected)
        }
    }

    fn fake_publisher(dir: &tempfile::TempDir) -> Arc<Publisher> {
        let persistence = Arc::new(OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap());
        Arc::new(Publisher::new(
            "test",
            Arc::new(NoopTransport),
            persistence,
            Duration::from_secs(30),
            Duration::from_millis(10),
        ))
    }

    fn make_service(files_dir: &tempfile::TempDir, platform_dir: &tempfile::TempDir, device_dir: &tempfile::TempDir) -> Arc<FileTransferService> {
        let repository: Arc<dyn FileRepository> = Arc::new(FilesystemFileRepository::open(files_dir.path()).unwrap());
        let platform_publisher = fake_publisher(platform_dir);
        let retry = RetryTable::new(platform_publisher.clone(), Duration::from_secs(5), 3);
        FileTransferService::new(
            repository,
            platform_publisher,
            fake_publisher(device_dir),
            retry,
            None,
            files_dir.path().to_path_buf(),
            DEFAULT_MAX_FILE_SIZE,
            DEFAULT_MAX_PACKET_SIZE,
        )
    }

    #[tokio::test]
    async fn single_chunk_upload_completes_and_is_recorded() {
        let files_dir = tempdir().unwrap();
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();
        let service = make_service(&files_dir, &platform_dir, &device_dir);

        let data = b"hello world".to_vec();
        let hash = sha256::digest(data.as_slice());
        let hash_bytes = hex::decode(&hash).unwrap();
        let hash_base64 = BASE64.encode(&hash_bytes);

        let initiate = serde_json::json!({"name": "greeting.txt", "size": data.len(), "hash_base64": hash_base64});
        service.handle_upload_initiate(serde_json::to_vec(&initiate).unwrap().as_slice()).await;
        assert!(service.active_upload.lock().is_some());

        let chunk = Chunk::new(gw_protocol::codec::file::ZERO_HASH, data.clone());
        service.handle_upload_chunk(&chunk.encode()).await;

        assert!(service.active_upload.lock().is_none());
        assert!(service.file_repository.contains("greeting.txt").unwrap());
        assert_eq!(std::fs::read(files_dir.path().join("greeting.txt")).unwrap(), data);
    }

    /// After 3 failed attempts at the same chunk index, the transfer is
    /// abandoned with `ERROR`/`RETRY_COUNT_EXCEEDED` and the active slot is
    /// freed — even though every mismatched chunk arrives well inside the
    /// per-chunk timeout.
    #[tokio::test]
    async fn chunk_retry_budget_exhaustion_abandons_the_transfer() {
        let files_dir = tempdir().unwrap();
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();

        // Data spans two chunks (packet size 16) so the first chunk alone can't complete the transfer.
        let data = vec![7u8; 20];
        let hash = sha256::digest(data.as_slice());
        let hash_bytes = hex::decode(&hash).unwrap();
        let hash_base64 = BASE64.encode(&hash_bytes);
        let initiate = serde_json::json!({"name": "f.bin", "size": data.len(), "hash_base64": hash_base64});

        let repository: Arc<dyn FileRepository> = Arc::new(FilesystemFileRepository::open(files_dir.path()).unwrap());
        let platform_publisher = fake_publisher(&platform_dir);
        let retry = RetryTable::new(platform_publisher.clone(), Duration::from_secs(5), 3);
        let service = FileTransferService::new(
            repository,
            platform_publisher.clone(),
            fake_publisher(&device_dir),
            retry,
            None,
            files_dir.path().to_path_buf(),
            DEFAULT_MAX_FILE_SIZE,
            16,
        );
        service.handle_upload_initiate(serde_json::to_vec(&initiate).unwrap().as_slice()).await;
        assert!(service.active_upload.lock().is_some());

        let bogus_previous = [9u8; 32];
        for _ in 0..3 {
            let chunk = Chunk::new(bogus_previous, b"wrong".to_vec());
            service.handle_upload_chunk(&chunk.encode()).await;
        }

        assert!(
            service.active_upload.lock().is_none(),
            "transfer must be abandoned once the retry budget is exhausted"
        );

        // `platform_publisher` publishes directly (NoopTransport is disconnected, so every
        // add_message call actually persists); read the queue back to inspect what was sent.
        let persisted = OutboundQueue::open(platform_dir.path(), Discipline::Fifo, None).unwrap();
        let message = persisted.front().expect("an ERROR status must have been queued");
        let status: FileStatusMessage = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(status.status, FileStatus::Error);
        assert_eq!(status.error, Some(FileErrorCode::RetryCountExceeded));
    }

    #[tokio::test]
    async fn upload_abort_clears_the_active_slot() {
        let files_dir = tempdir().unwrap();
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();
        let service = make_service(&files_dir, &platform_dir, &device_dir);

        let initiate = serde_json::json!({"name": "f.bin", "size": 10, "hash_base64": BASE64.encode([0u8; 32])});
        service.handle_upload_initiate(serde_json::to_vec(&initiate).unwrap().as_slice()).await;
        assert!(service.active_upload.lock().is_some());

        let abort = serde_json::json!({"name": "f.bin"});
        service.handle_upload_abort(serde_json::to_vec(&abort).unwrap().as_slice()).await;
        assert!(service.active_upload.lock().is_none());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_starting_a_transfer() {
        let files_dir = tempdir().unwrap();
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();
        let service = make_service(&files_dir, &platform_dir, &device_dir);

        let initiate = serde_json::json!({
            "name": "huge.bin",
            "size": DEFAULT_MAX_FILE_SIZE + 1,
            "hash_base64": BASE64.encode([0u8; 32]),
        });
        service.handle_upload_initiate(serde_json::to_vec(&initiate).unwrap().as_slice()).await;
        assert!(service.active_upload.lock().is_none());
    }
}
