//! Filesystem cold storage.
//!
//! Layout: `<root>/<tier>/<hex(id)>/<version>.json.gz`. Writes go to a
//! temporary file that is fsynced and then renamed into place, so a crash
//! never leaves a partial object under a real key.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ArchiveObject, ColdObjectInfo, ColdObjectKey, ColdStorage};
use findings_core::{ColdTier, Error, Result};

const OBJECT_SUFFIX: &str = ".json.gz";

/// Cold storage rooted at a local or mounted directory.
#[derive(Debug, Clone)]
pub struct FilesystemColdStorage {
    root: PathBuf,
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::cold_storage(format!("{} {}: {}", action, path.display(), e))
}

impl FilesystemColdStorage {
    /// Open the storage root, creating the tier directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let storage = Self { root: root.into() };
        for tier in ColdTier::ALL {
            let dir = storage.root.join(tier.as_str());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_err("create", &dir, e))?;
        }
        debug!(root = %storage.root.display(), "Opened filesystem cold storage");
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(root: &Path, tier: ColdTier, key: &ColdObjectKey) -> PathBuf {
        root.join(tier.as_str())
            .join(key.id_hex())
            .join(format!("{}{}", key.version(), OBJECT_SUFFIX))
    }

    /// Current tier and path of `key`, if stored.
    fn locate(root: &Path, key: &ColdObjectKey) -> Option<(ColdTier, PathBuf)> {
        ColdTier::ALL
            .into_iter()
            .map(|tier| (tier, Self::object_path(root, tier, key)))
            .find(|(_, path)| path.is_file())
    }

    fn write_durable(path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::cold_storage(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir).map_err(|e| io_err("create", dir, e))?;

        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object")
        ));
        let mut file = fs::File::create(&tmp).map_err(|e| io_err("create", &tmp, e))?;
        file.write_all(bytes).map_err(|e| io_err("write", &tmp, e))?;
        file.sync_all().map_err(|e| io_err("sync", &tmp, e))?;
        drop(file);

        fs::rename(&tmp, path).map_err(|e| io_err("rename", path, e))?;
        Self::sync_dir(dir)
    }

    /// Persist the entries of `dir`, so a rename into it survives a crash.
    fn sync_dir(dir: &Path) -> Result<()> {
        let handle = fs::File::open(dir).map_err(|e| io_err("open", dir, e))?;
        handle.sync_all().map_err(|e| io_err("sync", dir, e))
    }

    fn list_blocking(root: &Path) -> Result<Vec<ColdObjectInfo>> {
        let mut objects = Vec::new();

        for tier in ColdTier::ALL {
            let tier_dir = root.join(tier.as_str());
            let Ok(id_dirs) = fs::read_dir(&tier_dir) else {
                continue;
            };
            for id_dir in id_dirs.flatten() {
                let id_hex = id_dir.file_name().to_string_lossy().into_owned();
                let Ok(files) = fs::read_dir(id_dir.path()) else {
                    continue;
                };
                for file in files.flatten() {
                    let name = file.file_name().to_string_lossy().into_owned();
                    let Some(version) = name.strip_suffix(OBJECT_SUFFIX) else {
                        continue;
                    };
                    let Some(key) = ColdObjectKey::parse(&format!("{}/{}", id_hex, version))
                    else {
                        continue;
                    };
                    let path = file.path();
                    let bytes = fs::read(&path).map_err(|e| io_err("read", &path, e))?;
                    match ArchiveObject::decode(&bytes) {
                        Ok(object) => objects.push(ColdObjectInfo {
                            key,
                            tier,
                            archived_at: object.archived_at,
                        }),
                        Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cold object"),
                    }
                }
            }
        }

        Ok(objects)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(root))
            .await
            .map_err(|e| Error::internal(format!("cold storage task failed: {}", e)))?
    }
}

#[async_trait]
impl ColdStorage for FilesystemColdStorage {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, key: &ColdObjectKey, object: &ArchiveObject) -> Result<()> {
        let bytes = object.encode()?;
        let key = key.clone();
        self.blocking(move |root| {
            let tier = Self::locate(&root, &key).map_or(ColdTier::Standard, |(tier, _)| tier);
            Self::write_durable(&Self::object_path(&root, tier, &key), &bytes)
        })
        .await
    }

    async fn exists(&self, key: &ColdObjectKey) -> Result<bool> {
        let key = key.clone();
        self.blocking(move |root| Ok(Self::locate(&root, &key).is_some()))
            .await
    }

    async fn get(&self, key: &ColdObjectKey) -> Result<Option<ArchiveObject>> {
        let key = key.clone();
        self.blocking(move |root| {
            let Some((_, path)) = Self::locate(&root, &key) else {
                return Ok(None);
            };
            let bytes = fs::read(&path).map_err(|e| io_err("read", &path, e))?;
            ArchiveObject::decode(&bytes).map(Some)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ColdObjectInfo>> {
        self.blocking(|root| Self::list_blocking(&root)).await
    }

    async fn transition(&self, key: &ColdObjectKey, tier: ColdTier) -> Result<()> {
        let key = key.clone();
        self.blocking(move |root| {
            let (_, from) = Self::locate(&root, &key)
                .ok_or_else(|| Error::cold_storage(format!("object {} not found", key)))?;
            let to = Self::object_path(&root, tier, &key);
            let dir = to
                .parent()
                .ok_or_else(|| Error::cold_storage(format!("no parent for {}", to.display())))?;
            fs::create_dir_all(dir).map_err(|e| io_err("create", dir, e))?;
            fs::rename(&from, &to).map_err(|e| io_err("rename", &from, e))?;
            Self::sync_dir(dir)?;
            if let Some(dir) = from.parent() {
                // Only succeeds once the id directory is empty.
                let _ = fs::remove_dir(dir);
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &ColdObjectKey) -> Result<()> {
        let key = key.clone();
        self.blocking(move |root| {
            if let Some((_, path)) = Self::locate(&root, &key) {
                fs::remove_file(&path).map_err(|e| io_err("remove", &path, e))?;
                if let Some(dir) = path.parent() {
                    let _ = fs::remove_dir(dir);
                }
            }
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let root = self.root.clone();
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|e| io_err("stat", &root, e))?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(Error::cold_storage(format!(
                "{} is not a directory",
                root.display()
            )))
        }
    }
}
