//! Component H of the gateway specification: chunked file upload, URL
//! download, and file inventory management.

pub mod downloader;
pub mod error;
pub mod service;
pub mod state;

pub use downloader::ReqwestDownloader;
pub use downloader::UrlDownloader;
pub use error::FileTransferError;
pub use service::FileTransferLocalHandler;
pub use service::FileTransferPlatformHandler;
pub use service::FileTransferService;
pub use service::DEFAULT_MAX_FILE_SIZE;
pub use service::DEFAULT_MAX_PACKET_SIZE;
pub use state::FileTransferState;
