//! The stateless half of component F's translators: readings, events,
//! actuator status/commands and configuration get/set never need a
//! stateful service the way registration or file transfer do — relaying
//! them is just `gw_protocol::channel`'s prefix rewrite applied to an
//! already-encoded message, so the gateway facade wires it directly rather
//! than standing up a dedicated crate for it.

use async_trait::async_trait;
use gw_protocol::channel;
use gw_protocol::model::DeviceKey;
use gw_publisher::Publisher;
use gw_router::Handler;
use std::sync::Arc;
use tracing::debug;

/// `d2p/{sensor_reading,events,actuator_status,configuration_get}/...` on
/// the local broker: strip nothing, just insert `g/<gw>/` before the
/// device segment and forward upstream unchanged.
pub struct DataRelayLocalHandler {
    pub gateway_key: DeviceKey,
    pub platform_publisher: Arc<Publisher>,
}

#[async_trait]
impl Handler for DataRelayLocalHandler {
    fn patterns(&self) -> Vec<String> {
        vec![
            "d2p/sensor_reading/#".to_string(),
            "d2p/events/#".to_string(),
            "d2p/actuator_status/#".to_string(),
            "d2p/configuration_get/#".to_string(),
        ]
    }

    async fn on_message(&self, incoming_channel: &str, payload: &[u8]) {
        match channel::route_device_to_platform(incoming_channel, &self.gateway_key) {
            Ok(rewritten) => {
                self.platform_publisher
                    .add_message(gw_mqtt::Message::new(rewritten, payload.to_vec()))
                    .await;
            }
            Err(err) => debug!(channel = %incoming_channel, %err, "dropping unroutable device message"),
        }
    }
}

/// `p2d/{actuator_set,actuator_get,configuration_set}/g/<gw>/...` from the
/// platform: remove the `g/<gw>/` segment and forward down to the
/// addressed subdevice unchanged.
pub struct DataRelayPlatformHandler {
    pub gateway_key: DeviceKey,
    pub device_publisher: Option<Arc<Publisher>>,
}

#[async_trait]
impl Handler for DataRelayPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec![
            format!("p2d/actuator_set/g/{}/#", self.gateway_key),
            format!("p2d/actuator_get/g/{}/#", self.gateway_key),
            format!("p2d/configuration_set/g/{}/#", self.gateway_key),
        ]
    }

    async fn on_message(&self, incoming_channel: &str, payload: &[u8]) {
        let Some(device_publisher) = &self.device_publisher else {
            debug!(channel = %incoming_channel, "no local broker attached; dropping platform command");
            return;
        };
        match channel::route_platform_to_device(incoming_channel, &self.gateway_key) {
            Ok(rewritten) => {
                device_publisher
                    .add_message(gw_mqtt::Message::new(rewritten, payload.to_vec()))
                    .await;
            }
            Err(err) => debug!(channel = %incoming_channel, %err, "dropping unroutable platform message"),
        }
    }
}

/// The platform's keep-alive acknowledgement: nothing to do beyond
/// observing that the channel is alive.
pub struct PongPlatformHandler;

#[async_trait]
impl Handler for PongPlatformHandler {
    fn patterns(&self) -> Vec<String> {
        vec!["pong/#".to_string()]
    }

    async fn on_message(&self, channel: &str, _payload: &[u8]) {
        debug!(%channel, "keep-alive pong received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_persistence::Discipline;
    use gw_persistence::OutboundQueue;
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
    async fn local_reading_is_rewritten_with_gateway_prefix() {
        let dir = tempdir().unwrap();
        let publisher = fake_publisher(&dir);
        let handler = DataRelayLocalHandler {
            gateway_key: DeviceKey::new("GW").unwrap(),
            platform_publisher: publisher.clone(),
        };
        handler
            .on_message("d2p/sensor_reading/d/dev-1/r/temperature", br#"{"value":21.5}"#)
            .await;

        let reopened = OutboundQueue::open(dir.path(), Discipline::Fifo, None).unwrap();
        let queued = reopened.front().expect("message was persisted");
        assert_eq!(queued.channel, "d2p/sensor_reading/g/GW/d/dev-1/r/temperature");
    }
}
