//! Component I of the gateway specification: firmware install orchestration,
//! abort forwarding, status relay and the post-reboot install-result check.

pub mod error;
pub mod installer;
pub mod service;

pub use error::FirmwareError;
pub use installer::FirmwareInstaller;
pub use service::FirmwareLocalHandler;
pub use service::FirmwarePlatformHandler;
pub use service::FirmwareService;
