//! Channel constants, the MQTT wildcard matcher, channel-prefix rewriting,
//! the core data model, and the JSON/binary codecs for each message family
//! (components A and F of the gateway specification).

pub mod channel;
pub mod codec;
pub mod error;
pub mod model;

pub use error::ProtocolError;
pub use gw_mqtt::Message;
