//! The device repository: one JSON document per device, directory-backed,
//! durable across restarts the same way every other on-disk store in this
//! gateway persists what it owns.

use crate::error::PersistenceError;
use gw_protocol::model::Device;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;

fn device_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

/// `save`/`update`/`remove`/`findByKey`/`findAllKeys`/`containsKey`.
/// Concurrent readers are allowed; writes are serialized by the lock.
pub struct DeviceRepository {
    dir: PathBuf,
    cache: RwLock<BTreeMap<String, Device>>,
}

impl DeviceRepository {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let mut cache = BTreeMap::new();
        for entry in fs::read_dir(&dir).map_err(|source| PersistenceError::Io {
            path: dir.display().to_string(),
            source,
        })? {
            let entry = entry.map_err(|source| PersistenceError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let device: Device = serde_json::from_slice(&bytes)?;
            cache.insert(device.key.clone(), device);
        }

        Ok(DeviceRepository {
            dir,
            cache: RwLock::new(cache),
        })
    }

    fn persist(&self, device: &Device) -> Result<(), PersistenceError> {
        let path = device_file(&self.dir, &device.key);
        let bytes = serde_json::to_vec_pretty(device)?;
        fs::write(&path, bytes).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, device: Device) -> Result<(), PersistenceError> {
        self.persist(&device)?;
        debug!(key = %device.key, "device saved");
        self.cache.write().insert(device.key.clone(), device);
        Ok(())
    }

    pub fn update(&self, device: Device) -> Result<(), PersistenceError> {
        self.save(device)
    }

    pub fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = device_file(&self.dir, key);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        self.cache.write().remove(key);
        debug!(key, "device removed");
        Ok(())
    }

    pub fn find_by_key(&self, key: &str) -> Option<Device> {
        self.cache.read().get(key).cloned()
    }

    pub fn find_all_keys(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cache.read().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn device(key: &str) -> Device {
        Device {
            key: key.to_string(),
            name: format!("device-{key}"),
            template_reference: "default".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn save_then_find_round_trips() {
        let dir = tempdir().unwrap();
        let repo = DeviceRepository::open(dir.path()).unwrap();
        repo.save(device("D1")).unwrap();
        assert!(repo.contains_key("D1"));
        assert_eq!(repo.find_by_key("D1").unwrap().name, "device-D1");
    }

    #[test]
    fn remove_deletes_from_cache_and_disk() {
        let dir = tempdir().unwrap();
        let repo = DeviceRepository::open(dir.path()).unwrap();
        repo.save(device("D1")).unwrap();
        repo.remove("D1").unwrap();
        assert!(!repo.contains_key("D1"));
        assert!(!device_file(dir.path(), "D1").exists());
    }

    #[test]
    fn durable_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let repo = DeviceRepository::open(dir.path()).unwrap();
            repo.save(device("D1")).unwrap();
            repo.save(device("D2")).unwrap();
        }
        let reopened = DeviceRepository::open(dir.path()).unwrap();
        assert_eq!(reopened.find_all_keys().len(), 2);
    }
}
