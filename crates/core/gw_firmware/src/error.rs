use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("i/o error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("installer rejected '{path}': {reason}")]
    InstallFailed { path: String, reason: String },
}
