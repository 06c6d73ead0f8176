//! The reregistration service: acks the platform's request, wipes the local
//! device repository, then asks every attached subdevice to resubmit its
//! own registration.

use async_trait::async_trait;
use gw_persistence::DeviceRepository;
use gw_protocol::codec::registration;
use gw_protocol::model::DeviceKey;
use gw_publisher::Publisher;
use gw_router::Handler;
use std::sync::Arc;
use tracing::error;
use tracing::info;

pub struct ReregistrationService {
    gateway_key: DeviceKey,
    repository: Arc<DeviceRepository>,
    platform_publisher: Arc<Publisher>,
    device_publisher: Option<Arc<Publisher>>,
}

impl ReregistrationService {
    pub fn new(
        gateway_key: DeviceKey,
        repository: Arc<DeviceRepository>,
        platform_publisher: Arc<Publisher>,
        device_publisher: Option<Arc<Publisher>>,
    ) -> Arc<Self> {
        Arc::new(ReregistrationService {
            gateway_key,
            repository,
            platform_publisher,
            device_publisher,
        })
    }

    pub async fn handle_platform_request(&self, _channel: &str, _payload: &[u8]) {
        info!(gateway = %self.gateway_key, "reregistration requested; acking and wiping local devices");
        self.platform_publisher
            .add_message(registration::encode_reregister_ack(&self.gateway_key))
            .await;

        for key in self.repository.find_all_keys() {
            if let Err(err) = self.repository.remove(&key) {
                error!(%key, %err, "failed to remove device during reregistration wipe");
            }
        }

        if let Some(device_publisher) = &self.device_publisher {
            device_publisher
                .add_message(registration::encode_reregister_broadcast())
                .await;
        }
    }
}

pub struct ReregistrationPlatformHandler(pub Arc<ReregistrationService>);

#[async_trait]
impl Handler for ReregistrationPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec![format!(
            "p2d/reregister_device/g/{}/#",
            self.0.gateway_key
        )]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        self.0.handle_platform_request(channel, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_mqtt::Message;
    use gw_mqtt::MqttError;
    use gw_mqtt::MqttTransport;
    use gw_persistence::Discipline;
    use gw_persistence::OutboundQueue;
    use parking_lot::Mutex;
    use gw_protocol::model::Device;
    use std::time::Duration;
    use tempfile::tempdir;

    struct RecordingTransport {
        published: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MqttTransport for RecordingTransport {
        fn is_connected(&self) -> bool {
            true
        }
        async fn connect(&self) -> Result<(), MqttError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        async fn subscribe(&self, _pattern: &str) -> Result<(), MqttError> {
            Ok(())
        }
        async fn publish(&self, message: &Message) -> Result<(), MqttError> {
            self.published.lock().push(message.clone());
            Ok(())
        }
    }

    fn publisher(dir: &std::path::Path) -> (Arc<Publisher>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport { published: Mutex::new(Vec::new()) });
        let persistence = Arc::new(OutboundQueue::open(dir, Discipline::Fifo, None).unwrap());
        (
            Arc::new(Publisher::new(
                "test",
                transport.clone(),
                persistence,
                Duration::from_secs(30),
                Duration::from_millis(10),
            )),
            transport,
        )
    }

    fn device(key: &str) -> Device {
        Device {
            key: key.to_string(),
            name: format!("device-{key}"),
            ..Default::default()
        }
    }

    /// Repository emptied, one platform ack, one device-side broadcast with
    /// no key.
    #[tokio::test]
    async fn reregistration_acks_wipes_repository_and_broadcasts() {
        let repo_dir = tempdir().unwrap();
        let platform_dir = tempdir().unwrap();
        let device_dir = tempdir().unwrap();
        let repository = Arc::new(DeviceRepository::open(repo_dir.path()).unwrap());
        repository.save(device("GATEWAY_KEY")).unwrap();
        repository.save(device("K1")).unwrap();
        repository.save(device("K2")).unwrap();

        let (platform_publisher, platform_transport) = publisher(platform_dir.path());
        let (device_publisher, device_transport) = publisher(device_dir.path());
        let svc = ReregistrationService::new(
            DeviceKey::new("GATEWAY_KEY").unwrap(),
            repository.clone(),
            platform_publisher,
            Some(device_publisher),
        );

        svc.handle_platform_request("p2d/reregister_device/g/GATEWAY_KEY", &[]).await;

        assert_eq!(repository.find_all_keys().len(), 0);

        let platform_published = platform_transport.published.lock().clone();
        assert_eq!(platform_published.len(), 1);
        assert_eq!(platform_published[0].channel, "d2p/reregister_device/g/GATEWAY_KEY");

        let device_published = device_transport.published.lock().clone();
        assert_eq!(device_published.len(), 1);
        assert_eq!(device_published[0].channel, "p2d/reregister_device/d/");
    }
}
