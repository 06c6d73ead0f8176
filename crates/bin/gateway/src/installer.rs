//! The concrete gateway-local firmware installer: invokes an external
//! script with the downloaded firmware file as its sole argument, following
//! `plugin_sm::Plugin`'s pattern of shelling out to an installer binary
//! rather than hand-rolling platform-specific install logic in-process.

use async_trait::async_trait;
use gw_firmware::FirmwareError;
use gw_firmware::FirmwareInstaller;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;

pub struct ScriptFirmwareInstaller {
    script_path: PathBuf,
}

impl ScriptFirmwareInstaller {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        ScriptFirmwareInstaller {
            script_path: script_path.into(),
        }
    }
}

#[async_trait]
impl FirmwareInstaller for ScriptFirmwareInstaller {
    async fn install(&self, path: &Path) -> Result<(), FirmwareError> {
        debug!(script = %self.script_path.display(), file = %path.display(), "running firmware install script");
        let output = tokio::process::Command::new(&self.script_path)
            .arg(path)
            .output()
            .await
            .map_err(|source| FirmwareError::Io {
                path: self.script_path.display().to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(FirmwareError::InstallFailed {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
