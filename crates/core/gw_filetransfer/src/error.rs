use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileTransferError {
    #[error("persistence error: {0}")]
    Persistence(#[from] gw_persistence::PersistenceError),

    #[error("protocol error: {0}")]
    Protocol(#[from] gw_protocol::error::ProtocolError),

    #[error("i/o error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download request error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("malformed download URL '{0}'")]
    MalformedUrl(String),
}
