//! The deletion service.

use crate::retry::RetryTable;
use async_trait::async_trait;
use gw_persistence::DeviceRepository;
use gw_protocol::codec::registration;
use gw_protocol::model::DeviceKey;
use gw_publisher::Publisher;
use gw_router::Handler;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_COUNT: u32 = 3;

/// Removes every repository entry not named in `keep_keys` (and never the
/// gateway itself), forwarding a retried `delete_device` request per
/// removal.
pub struct DeletionService {
    gateway_key: DeviceKey,
    repository: Arc<DeviceRepository>,
    retry: Arc<RetryTable>,
    platform_publisher: Arc<Publisher>,
}

impl DeletionService {
    pub fn new(
        gateway_key: DeviceKey,
        repository: Arc<DeviceRepository>,
        retry: Arc<RetryTable>,
        platform_publisher: Arc<Publisher>,
    ) -> Arc<Self> {
        Arc::new(DeletionService {
            gateway_key,
            repository,
            retry,
            platform_publisher,
        })
    }

    pub async fn delete_devices_other_than(&self, keep_keys: &[String]) {
        let keep: HashSet<&str> = keep_keys.iter().map(String::as_str).collect();
        for key in self.repository.find_all_keys() {
            if key == self.gateway_key.as_str() || keep.contains(key.as_str()) {
                continue;
            }
            self.delete_one(key).await;
        }
    }

    async fn delete_one(&self, key: String) {
        if let Err(err) = self.repository.remove(&key) {
            error!(%key, %err, "failed to remove device locally before requesting deletion");
        }
        let Some(device) = DeviceKey::new(key) else { return };
        let message = registration::encode_delete_device_request(&self.gateway_key, &device);
        let response_channel = format!("p2d/delete_device/g/{}/d/{device}", self.gateway_key);
        self.retry
            .track_with(response_channel, message.clone(), RETRY_COUNT, RETRY_TIMEOUT, None);
        self.platform_publisher.add_message(message).await;
    }

    /// Consulted for both an ack of a gateway-initiated deletion and (the
    /// same channel family, platform-initiated) a one-off deletion of a
    /// single device.
    pub async fn handle_platform_message(&self, channel: &str, _payload: &[u8]) {
        if self.retry.resolve(channel) {
            return;
        }
        if let Some(key) = gw_protocol::channel::extract_device_key(channel) {
            self.delete_one(key.as_str().to_string()).await;
        }
    }
}

pub struct DeletionPlatformHandler(pub Arc<DeletionService>);

#[async_trait]
impl Handler for DeletionPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec![format!("p2d/delete_device/g/{}/#", self.0.gateway_key)]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        self.0.handle_platform_message(channel, payload).await;
    }
}
