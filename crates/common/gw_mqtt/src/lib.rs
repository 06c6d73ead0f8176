//! Blocking-style transport abstraction over an MQTT broker connection.
//!
//! This crate owns component B of the gateway: a single [`Transport`] type
//! wrapping one `rumqttc` client/event-loop pair, with bounded-timeout
//! `connect`/`publish`/`subscribe` calls and an `on_message` callback
//! installed before `connect`. The gateway process holds two independent
//! instances: one for the platform broker, one for the local broker.

mod channel;
mod contract;
mod error;
mod transport;

pub use channel::Message;
pub use channel::Payload;
pub use contract::MqttTransport;
pub use error::MqttError;
pub use transport::Credentials;
pub use transport::Transport;
pub use transport::TransportConfig;
