//! The existing-device list: an append-only set of keys ever successfully
//! registered, persisted as a single JSON document (`existingDevices.json`,
//! `{"deviceKeys":[...]}`). Drives re-registration after a gateway re-bind.

use crate::error::PersistenceError;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "deviceKeys")]
    device_keys: BTreeSet<String>,
}

pub struct ExistingDeviceList {
    path: PathBuf,
    keys: Mutex<BTreeSet<String>>,
}

impl ExistingDeviceList {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let document = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_slice(&bytes)?
        } else {
            Document::default()
        };
        Ok(ExistingDeviceList {
            path,
            keys: Mutex::new(document.device_keys),
        })
    }

    fn persist(&self, keys: &BTreeSet<String>) -> Result<(), PersistenceError> {
        let document = Document {
            device_keys: keys.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        std::fs::write(&self.path, bytes).map_err(|source| PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Adds `key` if absent and rewrites the document. A no-op (and no
    /// write) if `key` is already present, keeping the list append-only in
    /// effect even though the backing file is rewritten in full each time.
    pub fn add(&self, key: &str) -> Result<(), PersistenceError> {
        let mut keys = self.keys.lock();
        if keys.insert(key.to_string()) {
            self.persist(&keys)?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn all(&self) -> Vec<String> {
        self.keys.lock().iter().cloned().collect()
    }
}
