//! Directory-backed versioned store
//!
//! Each key is a file under the root directory. The version tag is the
//! SHA-256 of the file content, so any out-of-band edit also invalidates
//! outstanding tags. A tokio Mutex serializes create/update so the
//! compare-and-swap is atomic within the process, and every write goes
//! through a temp file + rename so readers never observe partial content.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::{StoreFuture, StoredObject, VersionTag, VersionedStore, validate_key};

pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::Io(format!("creating store root {}: {e}", root.display())))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn read_path(path: &Path) -> Result<Option<StoredObject>> {
        match tokio::fs::read(path).await {
            Ok(content) => {
                let version = content_version(&content);
                Ok(Some(StoredObject { content, version }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(format!("reading {}: {e}", path.display()))),
        }
    }
}

impl VersionedStore for FileStore {
    fn id(&self) -> &str {
        "file"
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<StoredObject>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            Self::read_path(&path).await
        })
    }

    fn create<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        _message: &'a str,
    ) -> StoreFuture<'a, VersionTag> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let _guard = self.write_lock.lock().await;

            if Self::read_path(&path).await?.is_some() {
                return Err(Error::Conflict(format!("{key} already exists")));
            }

            write_atomic(&path, &content).await?;
            debug!(key, "created");
            Ok(content_version(&content))
        })
    }

    fn update<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        version: &'a VersionTag,
        _message: &'a str,
    ) -> StoreFuture<'a, VersionTag> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let _guard = self.write_lock.lock().await;

            let current = Self::read_path(&path)
                .await?
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            if &current.version != version {
                return Err(Error::Conflict(format!(
                    "{key} is at version {}, update was based on {version}",
                    current.version
                )));
            }

            write_atomic(&path, &content).await?;
            debug!(key, "updated");
            Ok(content_version(&content))
        })
    }
}

/// Version tag for a piece of content: lowercase hex SHA-256.
pub fn content_version(content: &[u8]) -> VersionTag {
    let digest = Sha256::digest(content);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    VersionTag::new(hex)
}

/// Write a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since token files hold bearer tokens.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|e| Error::Io(format!("writing temp file: {e}")))?;

    if let Err(e) = finish_atomic(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

async fn finish_atomic(tmp_path: &Path, path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp file: {e}")))
}
