/// The payload bytes of a [`Message`]. Textual payloads are UTF-8 JSON;
/// binary payloads (file chunks) are opaque.
pub type Payload = Vec<u8>;

/// The wire envelope exchanged with a broker: a topic string and a payload.
///
/// This is deliberately the only message type shared between the transport
/// layer and `gw_protocol`: every translator in `gw_protocol` produces and
/// consumes `gw_mqtt::Message` rather than redefining its own envelope type
/// per crate.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub channel: String,
    pub payload: Payload,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Message {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}
