use thiserror::Error;

/// Errors raised while decoding an inbound message. These are always
/// "protocol errors": the owning service logs them and drops the message,
/// they are never propagated as local failures.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProtocolError {
    #[error("channel '{0}' does not match any known pattern for this message family")]
    UnrecognizedChannel(String),

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("channel '{0}' carries no device key")]
    MissingDeviceKey(String),

    #[error("channel '{0}' has no gateway prefix to remove")]
    NotGatewayAddressed(String),

    #[error("channel '{0}' has no device segment to prefix")]
    NotDeviceAddressed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(err.to_string())
    }
}
