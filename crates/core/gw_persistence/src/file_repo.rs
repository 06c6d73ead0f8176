//! The file repository: either filesystem-backed (hashes computed on demand
//! from the directory listing) or SQLite-table-backed (`name unique, hash,
//! path`), selected at startup by the gateway facade.

use crate::error::PersistenceError;
use gw_protocol::model::FileInfo;
use std::path::Path;
use std::path::PathBuf;

/// `getInfo`/`listNames`/`store`/`remove`/`removeAll`/`contains`. Both
/// implementations are mutex-protected internally; callers do not need to
/// synchronize.
pub trait FileRepository: Send + Sync {
    fn get_info(&self, name: &str) -> Result<Option<FileInfo>, PersistenceError>;
    fn list_names(&self) -> Result<Vec<String>, PersistenceError>;
    fn list_infos(&self) -> Result<Vec<FileInfo>, PersistenceError>;
    fn store(&self, info: FileInfo) -> Result<(), PersistenceError>;
    fn remove(&self, name: &str) -> Result<(), PersistenceError>;
    fn remove_all(&self) -> Result<(), PersistenceError>;
    fn contains(&self, name: &str) -> Result<bool, PersistenceError>;
}

/// Files live directly under `directory`; `getInfo` computes SHA-256 on
/// demand rather than caching a hash, so the on-disk bytes are always the
/// source of truth. Construction fails if `directory` does not already
/// exist.
pub struct FilesystemFileRepository {
    directory: PathBuf,
}

impl FilesystemFileRepository {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(PersistenceError::MissingDirectory {
                path: directory.display().to_string(),
            });
        }
        Ok(FilesystemFileRepository { directory })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn hash_of(path: &Path) -> Result<String, PersistenceError> {
        let bytes = std::fs::read(path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(sha256::digest(bytes.as_slice()))
    }
}

impl FileRepository for FilesystemFileRepository {
    fn get_info(&self, name: &str) -> Result<Option<FileInfo>, PersistenceError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }
        let size = std::fs::metadata(&path)
            .map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?
            .len();
        let hash_hex = Self::hash_of(&path)?;
        Ok(Some(FileInfo {
            name: name.to_string(),
            size,
            hash_hex,
        }))
    }

    fn list_names(&self) -> Result<Vec<String>, PersistenceError> {
        let mut names = Vec::new();
        for entry in walkdir::WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_infos(&self) -> Result<Vec<FileInfo>, PersistenceError> {
        self.list_names()?
            .into_iter()
            .filter_map(|name| self.get_info(&name).transpose())
            .collect()
    }

    /// A no-op: the file's bytes (and their hash) already live on disk; the
    /// repository has nothing separate to write.
    fn store(&self, _info: FileInfo) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|source| PersistenceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<(), PersistenceError> {
        for name in self.list_names()? {
            self.remove(&name)?;
        }
        Ok(())
    }

    fn contains(&self, name: &str) -> Result<bool, PersistenceError> {
        Ok(self.path_for(name).is_file())
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite_repo {
    use super::*;
    use parking_lot::Mutex;
    use rusqlite::params;
    use rusqlite::Connection;

    /// `(name unique, hash, path)` table-backed repository, an optional
    /// SQLite-backed alternative to [`super::FilesystemFileRepository`].
    pub struct SqliteFileRepository {
        connection: Mutex<Connection>,
    }

    impl SqliteFileRepository {
        pub fn open(db_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
            let connection = Connection::open(db_path)?;
            connection.execute(
                "CREATE TABLE IF NOT EXISTS files (
                    name TEXT PRIMARY KEY,
                    hash TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    path TEXT NOT NULL
                )",
                [],
            )?;
            Ok(SqliteFileRepository {
                connection: Mutex::new(connection),
            })
        }
    }

    impl FileRepository for SqliteFileRepository {
        fn get_info(&self, name: &str) -> Result<Option<FileInfo>, PersistenceError> {
            let connection = self.connection.lock();
            let mut statement = connection.prepare("SELECT name, size, hash FROM files WHERE name = ?1")?;
            let mut rows = statement.query(params![name])?;
            if let Some(row) = rows.next()? {
                Ok(Some(FileInfo {
                    name: row.get(0)?,
                    size: row.get::<_, i64>(1)? as u64,
                    hash_hex: row.get(2)?,
                }))
            } else {
                Ok(None)
            }
        }

        fn list_names(&self) -> Result<Vec<String>, PersistenceError> {
            let connection = self.connection.lock();
            let mut statement = connection.prepare("SELECT name FROM files ORDER BY name")?;
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        }

        fn list_infos(&self) -> Result<Vec<FileInfo>, PersistenceError> {
            let connection = self.connection.lock();
            let mut statement = connection.prepare("SELECT name, size, hash FROM files ORDER BY name")?;
            let infos = statement
                .query_map([], |row| {
                    Ok(FileInfo {
                        name: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        hash_hex: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(infos)
        }

        fn store(&self, info: FileInfo) -> Result<(), PersistenceError> {
            let connection = self.connection.lock();
            connection.execute(
                "INSERT INTO files (name, hash, size, path) VALUES (?1, ?2, ?3, ?1)
                 ON CONFLICT(name) DO UPDATE SET hash = excluded.hash, size = excluded.size",
                params![info.name, info.hash_hex, info.size as i64],
            )?;
            Ok(())
        }

        fn remove(&self, name: &str) -> Result<(), PersistenceError> {
            self.connection.lock().execute("DELETE FROM files WHERE name = ?1", params![name])?;
            Ok(())
        }

        fn remove_all(&self) -> Result<(), PersistenceError> {
            self.connection.lock().execute("DELETE FROM files", [])?;
            Ok(())
        }

        fn contains(&self, name: &str) -> Result<bool, PersistenceError> {
            Ok(self.get_info(name)?.is_some())
        }
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite_repo::SqliteFileRepository;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn construction_fails_without_directory() {
        let missing = PathBuf::from("/nonexistent/path/for/gateway/tests");
        assert!(FilesystemFileRepository::open(missing).is_err());
    }

    #[test]
    fn hash_and_size_computed_on_demand() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("fw.bin"), b"firmware bytes").unwrap();
        let repo = FilesystemFileRepository::open(dir.path()).unwrap();

        assert!(repo.contains("fw.bin").unwrap());
        let info = repo.get_info("fw.bin").unwrap().unwrap();
        assert_eq!(info.size, 14);
        assert_eq!(info.hash_hex, sha256::digest(b"firmware bytes".as_slice()));
    }

    #[test]
    fn remove_all_clears_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"1").unwrap();
        std::fs::write(dir.path().join("b"), b"2").unwrap();
        let repo = FilesystemFileRepository::open(dir.path()).unwrap();
        repo.remove_all().unwrap();
        assert!(repo.list_names().unwrap().is_empty());
    }
}
