//! The status service: polls subdevice status on connect, relays
//! self-reported status upstream, and turns last-will notices (per-device
//! or broker-level) into `OFFLINE` reports.

use async_trait::async_trait;
use gw_persistence::DeviceRepository;
use gw_protocol::codec::status;
use gw_protocol::model::DeviceKey;
use gw_protocol::model::DeviceStatus;
use gw_publisher::Publisher;
use gw_router::Handler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct StatusService {
    gateway_key: DeviceKey,
    repository: Arc<DeviceRepository>,
    platform_publisher: Arc<Publisher>,
    device_publisher: Option<Arc<Publisher>>,
    last_known: Mutex<HashMap<String, DeviceStatus>>,
    poll_interval: Duration,
}

impl StatusService {
    pub fn new(
        gateway_key: DeviceKey,
        repository: Arc<DeviceRepository>,
        platform_publisher: Arc<Publisher>,
        device_publisher: Option<Arc<Publisher>>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(StatusService {
            gateway_key,
            repository,
            platform_publisher,
            device_publisher,
            last_known: Mutex::new(HashMap::new()),
            poll_interval,
        })
    }

    fn other_device_keys(&self) -> Vec<DeviceKey> {
        self.repository
            .find_all_keys()
            .into_iter()
            .filter(|key| key != self.gateway_key.as_str())
            .filter_map(DeviceKey::new)
            .collect()
    }

    /// Called once the local broker connection is (re-)established: polls
    /// every known subdevice for its current status.
    pub async fn poll_all(&self) {
        let Some(device_publisher) = &self.device_publisher else {
            return;
        };
        for device in self.other_device_keys() {
            device_publisher
                .add_message(status::encode_status_request_to_device(&device))
                .await;
        }
    }

    /// Platform asking the gateway to poll one specific subdevice:
    /// `p2d/subdevice_status_request/g/<gw>/d/<dev>`.
    pub async fn handle_platform_poll_request(&self, channel: &str) {
        let Some(device_publisher) = &self.device_publisher else {
            return;
        };
        let Some(device) = gw_protocol::channel::extract_device_key(channel) else {
            debug!(%channel, "status request carries no device key");
            return;
        };
        device_publisher
            .add_message(status::encode_status_request_to_device(&device))
            .await;
    }

    /// A subdevice's self-reported status on `status/d/<dev>`.
    pub async fn handle_device_status(&self, channel: &str, payload: &[u8]) {
        match status::decode_status_report(channel, payload) {
            Ok((device, state)) => self.report(&device, state).await,
            Err(err) => debug!(%channel, %err, "malformed status report; dropping"),
        }
    }

    pub async fn handle_per_device_lastwill(&self, channel: &str) {
        match status::decode_per_device_lastwill(channel) {
            Ok(device) => self.report(&device, DeviceStatus::Offline).await,
            Err(err) => debug!(%channel, %err, "malformed per-device lastwill; dropping"),
        }
    }

    pub async fn handle_broker_lastwill(&self, payload: &[u8]) {
        match status::decode_broker_lastwill(payload) {
            Ok(keys) => {
                for device in keys {
                    self.report(&device, DeviceStatus::Offline).await;
                }
            }
            Err(err) => debug!(%err, "malformed broker lastwill; dropping"),
        }
    }

    /// The local broker connection itself dropped: every known subdevice is
    /// unreachable, so fan all of them out as offline.
    pub async fn handle_local_connection_lost(&self) {
        for device in self.other_device_keys() {
            self.report(&device, DeviceStatus::Offline).await;
        }
    }

    async fn report(&self, device: &DeviceKey, state: DeviceStatus) {
        self.last_known.lock().insert(device.as_str().to_string(), state);
        self.platform_publisher
            .add_message(status::encode_subdevice_status_update(&self.gateway_key, device, state))
            .await;
    }

    /// Spawns the periodic re-poll + keep-alive ping loop.
    pub fn spawn_periodic(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.poll_interval);
            loop {
                interval.tick().await;
                service.poll_all().await;
                service
                    .platform_publisher
                    .add_message(status::encode_ping(&service.gateway_key))
                    .await;
            }
        });
    }
}

pub struct StatusLocalHandler(pub Arc<StatusService>);

#[async_trait]
impl Handler for StatusLocalHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["status/d/+".to_string(), "lastwill".to_string(), "lastwill/+".to_string()]
    }

    async fn on_message(&self, channel: &str, payload: &[u8]) {
        if channel == "lastwill" {
            self.0.handle_broker_lastwill(payload).await;
        } else if channel.starts_with("lastwill/") {
            self.0.handle_per_device_lastwill(channel).await;
        } else {
            self.0.handle_device_status(channel, payload).await;
        }
    }
}

pub struct StatusPlatformHandler(pub Arc<StatusService>);

#[async_trait]
impl Handler for StatusPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec![format!(
            "p2d/subdevice_status_request/g/{}/d/#",
            self.0.gateway_key
        )]
    }

    async fn on_message(&self, channel: &str, _payload: &[u8]) {
        self.0.handle_platform_poll_request(channel).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_persistence::Discipline;
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
        async fn publish(&self, _message: &gw_mqtt::Message) -> Result<(), gw_mqtt::MqttError> {
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

    #[tokio::test]
    async fn lastwill_for_known_device_reports_offline() {
        let platform_dir = tempdir().unwrap();
        let repo_dir = tempdir().unwrap();
        let gw = DeviceKey::new("GW").unwrap();
        let repository = DeviceRepository::open(repo_dir.path()).unwrap();
        let service = StatusService::new(
            gw,
            Arc::new(repository),
            fake_publisher(&platform_dir),
            None,
            Duration::from_secs(60),
        );
        service.handle_per_device_lastwill("lastwill/DEV").await;
        assert_eq!(
            service.last_known.lock().get("DEV").copied(),
            Some(DeviceStatus::Offline)
        );
    }

    #[tokio::test]
    async fn broker_level_lastwill_reports_every_listed_key() {
        let platform_dir = tempdir().unwrap();
        let repo_dir = tempdir().unwrap();
        let gw = DeviceKey::new("GW").unwrap();
        let repository = DeviceRepository::open(repo_dir.path()).unwrap();
        let service = StatusService::new(
            gw,
            Arc::new(repository),
            fake_publisher(&platform_dir),
            None,
            Duration::from_secs(60),
        );
        service.handle_broker_lastwill(br#"["A","B"]"#).await;
        let known = service.last_known.lock();
        assert_eq!(known.get("A").copied(), Some(DeviceStatus::Offline));
        assert_eq!(known.get("B").copied(), Some(DeviceStatus::Offline));
    }
}
