use crate::channel::Message;
use crate::error::MqttError;
use async_trait::async_trait;

/// The abstract transport contract: connect, subscribe, publish and
/// connection state, all bounded by an internal timeout. [`crate::Transport`]
/// is the real `rumqttc`-backed implementation; [`gw_publisher`](../gw_publisher)
/// and the router are written against this trait so their reconnect/drain
/// logic can be exercised against an in-process fake instead of a live
/// broker.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn connect(&self) -> Result<(), MqttError>;
    async fn disconnect(&self);
    async fn subscribe(&self, pattern: &str) -> Result<(), MqttError>;
    async fn publish(&self, message: &Message) -> Result<(), MqttError>;
}

#[async_trait]
impl MqttTransport for crate::Transport {
    fn is_connected(&self) -> bool {
        crate::Transport::is_connected(self)
    }

    async fn connect(&self) -> Result<(), MqttError> {
        crate::Transport::connect(self).await
    }

    async fn disconnect(&self) {
        crate::Transport::disconnect(self).await
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), MqttError> {
        crate::Transport::subscribe(self, pattern).await
    }

    async fn publish(&self, message: &Message) -> Result<(), MqttError> {
        crate::Transport::publish(self, message).await
    }
}
