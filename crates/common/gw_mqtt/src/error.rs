use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("could not connect to broker at {host}:{port} within the connect timeout")]
    ConnectTimeout { host: String, port: u16 },

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("could not load TLS trust store at {path}: {source}")]
    TrustStore {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("publish of {bytes} bytes on '{channel}' timed out")]
    PublishTimeout { channel: String, bytes: usize },

    #[error("subscribe to '{pattern}' timed out")]
    SubscribeTimeout { pattern: String },

    #[error("transport is not connected")]
    NotConnected,
}
