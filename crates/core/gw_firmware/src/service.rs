//! The firmware update service: gateway-local install via a
//! [`FirmwareInstaller`], or forwarding to a subdevice with unchanged
//! status relay; plus the `FIRMWARE_VERSION_FILE` post-reboot check.

use crate::installer::FirmwareInstaller;
use async_trait::async_trait;
use gw_mqtt::Message;
use gw_protocol::codec::dfu;
use gw_protocol::codec::dfu::FirmwareAbortCommand;
use gw_protocol::codec::dfu::FirmwareErrorCode;
use gw_protocol::codec::dfu::FirmwareInstallCommand;
use gw_protocol::codec::dfu::FirmwareStatus;
use gw_protocol::codec::dfu::FirmwareStatusMessage;
use gw_protocol::model::DeviceKey;
use gw_protocol::model::FirmwareVersion;
use gw_publisher::Publisher;
use gw_router::Handler;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing::info;
use tracing::warn;

pub struct FirmwareService {
    gateway_key: DeviceKey,
    current_version: Mutex<String>,
    installer: Option<Arc<dyn FirmwareInstaller>>,
    download_directory: PathBuf,
    version_file_path: PathBuf,
    platform_publisher: Arc<Publisher>,
    device_publisher: Option<Arc<Publisher>>,
}

impl FirmwareService {
    pub fn new(
        gateway_key: DeviceKey,
        current_version: String,
        installer: Option<Arc<dyn FirmwareInstaller>>,
        download_directory: PathBuf,
        version_file_path: PathBuf,
        platform_publisher: Arc<Publisher>,
        device_publisher: Option<Arc<Publisher>>,
    ) -> Arc<Self> {
        Arc::new(FirmwareService {
            gateway_key,
            current_version: Mutex::new(current_version),
            installer,
            download_directory,
            version_file_path,
            platform_publisher,
            device_publisher,
        })
    }

    async fn publish_gateway_status(&self, status: FirmwareStatusMessage) {
        self.platform_publisher
            .add_message(dfu::encode_status(&self.gateway_key, &status))
            .await;
    }

    pub async fn install(&self, device_keys: Vec<String>, file_name: String) {
        for key in device_keys {
            if key == self.gateway_key.as_str() {
                self.install_local(&file_name).await;
            } else if let Some(device) = DeviceKey::new(key) {
                self.forward_install(&device, &file_name).await;
            }
        }
    }

    async fn install_local(&self, file_name: &str) {
        let Some(installer) = &self.installer else {
            warn!("firmware install requested but no installer is configured");
            self.publish_gateway_status(FirmwareStatusMessage::error(FirmwareErrorCode::InstallationFailed))
                .await;
            return;
        };
        let current_version = self.current_version.lock().clone();
        if current_version.is_empty() {
            warn!("firmware install requested but the gateway has no current version configured");
            self.publish_gateway_status(FirmwareStatusMessage::error(FirmwareErrorCode::InstallationFailed))
                .await;
            return;
        }

        if let Err(source) = std::fs::write(&self.version_file_path, &current_version) {
            error!(%source, path = %self.version_file_path.display(), "failed to write firmware version sentinel");
            self.publish_gateway_status(FirmwareStatusMessage::error(FirmwareErrorCode::FileSystemError))
                .await;
            return;
        }

        self.publish_gateway_status(FirmwareStatusMessage::ok(FirmwareStatus::Installation)).await;

        let path = self.download_directory.join(file_name);
        if let Err(err) = installer.install(&path).await {
            error!(%err, path = %path.display(), "firmware installer failed");
            self.publish_gateway_status(FirmwareStatusMessage::error(FirmwareErrorCode::InstallationFailed))
                .await;
        }
    }

    async fn forward_install(&self, device: &DeviceKey, file_name: &str) {
        let Some(device_publisher) = &self.device_publisher else { return };
        let command = FirmwareInstallCommand {
            device_keys: vec![device.as_str().to_string()],
            file_name: file_name.to_string(),
        };
        device_publisher.add_message(dfu::encode_install_to_device(device, &command)).await;
    }

    /// Gateway-local abort is a no-op by contract; only subdevice aborts are
    /// forwarded.
    pub async fn abort(&self, device_keys: Vec<String>) {
        let Some(device_publisher) = &self.device_publisher else { return };
        for key in device_keys {
            if key == self.gateway_key.as_str() {
                continue;
            }
            let Some(device) = DeviceKey::new(key) else { continue };
            let command = FirmwareAbortCommand {
                device_keys: vec![device.as_str().to_string()],
            };
            device_publisher.add_message(dfu::encode_abort_to_device(&device, &command)).await;
        }
    }

    /// A subdevice's own firmware status arriving on the local broker is
    /// relayed to the platform unchanged.
    pub async fn relay_device_status(&self, channel: &str, payload: &[u8]) {
        self.platform_publisher.add_message(Message::new(channel.to_string(), payload.to_vec())).await;
    }

    /// Runs once at startup: if `FIRMWARE_VERSION_FILE` exists and the
    /// version it records differs from `new_current_version`, the install
    /// that preceded the reboot took effect, so report `COMPLETED`;
    /// otherwise the device rebooted without the new firmware taking hold,
    /// so report `INSTALLATION_FAILED`. The sentinel is deleted either way.
    pub async fn report_firmware_update_result(&self, new_current_version: &str) {
        let Ok(recorded) = std::fs::read_to_string(&self.version_file_path) else {
            return;
        };
        let recorded = recorded.trim();
        let status = if recorded != new_current_version {
            FirmwareStatusMessage::ok(FirmwareStatus::Completed)
        } else {
            FirmwareStatusMessage::error(FirmwareErrorCode::InstallationFailed)
        };
        if let Err(source) = std::fs::remove_file(&self.version_file_path) {
            error!(%source, path = %self.version_file_path.display(), "failed to remove firmware version sentinel");
        }
        *self.current_version.lock() = new_current_version.to_string();
        self.publish_gateway_status(status).await;
    }

    pub async fn publish_firmware_version(&self) {
        let version = self.current_version.lock().clone();
        info!(%version, "publishing gateway firmware version");
        let message = FirmwareVersion {
            device_key: self.gateway_key.as_str().to_string(),
            version,
        };
        self.platform_publisher.add_message(dfu::encode_firmware_version(&message)).await;
    }
}

pub struct FirmwarePlatformHandler(pub Arc<FirmwareService>);

#[async_trait]
impl Handler for FirmwarePlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["p2d/firmware_update_install/d/+".to_string(), "p2d/firmware_update_abort/d/+".to_string()]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        if channel.starts_with("p2d/firmware_update_install/") {
            match dfu::decode_install_command(payload) {
                Ok(command) => self.0.install(command.device_keys, command.file_name).await,
                Err(err) => warn!(%channel, %err, "malformed firmware install command; dropping"),
            }
        } else {
            match dfu::decode_abort_command(payload) {
                Ok(command) => self.0.abort(command.device_keys).await,
                Err(err) => warn!(%channel, %err, "malformed firmware abort command; dropping"),
            }
        }
    }
}

pub struct FirmwareLocalHandler(pub Arc<FirmwareService>);

#[async_trait]
impl Handler for FirmwareLocalHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["d2p/firmware_update_status/d/+".to_string()]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        self.0.relay_device_status(channel, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_persistence::Discipline;
    use gw_persistence::OutboundQueue;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
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

    fn fake_publisher(dir: &tempfile::TempDir) -> (Arc<Publisher>, Arc<OutboundQueue>) {
        let persistence = Arc::new(OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap());
        let publisher = Arc::new(Publisher::new(
            "test",
            Arc::new(NoopTransport),
            persistence.clone(),
            Duration::from_secs(30),
            Duration::from_millis(10),
        ));
        (publisher, persistence)
    }

    struct FakeInstaller {
        should_fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl FirmwareInstaller for FakeInstaller {
        async fn install(&self, _path: &std::path::Path) -> Result<(), crate::error::FirmwareError> {
            if self.should_fail.load(Ordering::SeqCst) {
                Err(crate::error::FirmwareError::InstallFailed {
                    path: "fw.bin".to_string(),
                    reason: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn gateway_local_install_writes_version_sentinel() {
        let platform_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, _persistence) = fake_publisher(&platform_dir);

        let service = FirmwareService::new(
            gw,
            "1.0.0".to_string(),
            Some(Arc::new(FakeInstaller { should_fail: AtomicBool::new(false) })),
            download_dir.path().to_path_buf(),
            version_file.clone(),
            platform_publisher,
            None,
        );

        service.install(vec!["GW".to_string()], "fw.bin".to_string()).await;
        assert_eq!(std::fs::read_to_string(&version_file).unwrap(), "1.0.0");
    }

    #[tokio::test]
    async fn gateway_local_install_failure_reports_error_status() {
        let platform_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, persistence) = fake_publisher(&platform_dir);

        let service = FirmwareService::new(
            gw,
            "1.0.0".to_string(),
            Some(Arc::new(FakeInstaller { should_fail: AtomicBool::new(true) })),
            download_dir.path().to_path_buf(),
            version_file.clone(),
            platform_publisher,
            None,
        );

        service.install(vec!["GW".to_string()], "fw.bin".to_string()).await;
        assert!(version_file.exists(), "sentinel is written before the installer runs");
        assert_eq!(persistence.len(), 2, "an INSTALLATION status then an error status");
        persistence.pop().unwrap();
        let error_status = persistence.pop().unwrap();
        assert!(error_status.payload_str().unwrap().contains("\"ERROR\""));
        assert!(error_status.payload_str().unwrap().contains("3"));
    }

    #[tokio::test]
    async fn install_missing_installer_reports_error_without_writing_sentinel() {
        let platform_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, persistence) = fake_publisher(&platform_dir);

        let service = FirmwareService::new(
            gw,
            "1.0.0".to_string(),
            None,
            download_dir.path().to_path_buf(),
            version_file.clone(),
            platform_publisher,
            None,
        );

        service.install(vec!["GW".to_string()], "fw.bin".to_string()).await;
        assert!(!version_file.exists());
        assert_eq!(persistence.len(), 1);
    }

    #[tokio::test]
    async fn abort_forwards_to_subdevice_but_not_gateway() {
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, _platform_persistence) = fake_publisher(&platform_dir);
        let (device_publisher, device_persistence) = fake_publisher(&device_dir);

        let service = FirmwareService::new(
            gw,
            "1.0.0".to_string(),
            None,
            download_dir.path().to_path_buf(),
            version_file,
            platform_publisher,
            Some(device_publisher),
        );

        service.abort(vec!["GW".to_string(), "sub-1".to_string()]).await;
        assert_eq!(device_persistence.len(), 1, "gateway key is skipped, only the subdevice abort is forwarded");
        let forwarded = device_persistence.front().unwrap();
        assert!(forwarded.channel.contains("sub-1"));
    }

    #[tokio::test]
    async fn publish_firmware_version_reports_current_version() {
        let platform_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, persistence) = fake_publisher(&platform_dir);

        let service = FirmwareService::new(
            gw,
            "3.2.1".to_string(),
            None,
            download_dir.path().to_path_buf(),
            version_file,
            platform_publisher,
            None,
        );

        service.publish_firmware_version().await;
        assert_eq!(persistence.len(), 1);
        let message = persistence.front().unwrap();
        let payload = message.payload_str().unwrap();
        assert!(payload.contains("3.2.1"));
    }

    #[tokio::test]
    async fn post_reboot_reports_completed_when_version_changed() {
        let platform_dir = tempdir().unwrap();
        let download_dir = tempdir().unwrap();
        let version_file = download_dir.path().join("version.sentinel");
        std::fs::write(&version_file, "1.0.0\n").unwrap();
        let gw = DeviceKey::new("GW").unwrap();
        let (platform_publisher, _persistence) = fake_publisher(&platform_dir);

        let service = FirmwareService::new(
            gw,
            "1.0.0".to_string(),
            None,
            download_dir.path().to_path_buf(),
            version_file.clone(),
            platform_publisher,
            None,
        );

        service.report_firmware_update_result("2.0.0").await;
        assert!(!version_file.exists());
    }
}
