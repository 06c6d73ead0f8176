//! The gateway-local installer seam, kept as a trait so the gateway facade
//! can supply a real OS-level installer while tests substitute a fake.

use crate::error::FirmwareError;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait FirmwareInstaller: Send + Sync {
    async fn install(&self, path: &Path) -> Result<(), FirmwareError>;
}
