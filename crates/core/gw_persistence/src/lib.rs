//! Component C of the gateway specification: the bounded outbound-message
//! queue, the device repository, the file repository and the
//! existing-device list.

pub mod device_repo;
pub mod error;
pub mod existing_devices;
pub mod file_repo;
pub mod outbound;

pub use device_repo::DeviceRepository;
pub use error::PersistenceError;
pub use existing_devices::ExistingDeviceList;
pub use file_repo::FileRepository;
pub use file_repo::FilesystemFileRepository;
pub use outbound::Discipline;
pub use outbound::OutboundQueue;
