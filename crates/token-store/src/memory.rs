//! In-process store for tests and dry runs
//!
//! Versions are a per-key counter (`v1`, `v2`, ...). Write attempts are
//! counted so callers can assert that an operation performed no write, and
//! writes can be made to fail on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::{StoreFuture, StoredObject, VersionTag, VersionedStore, validate_key};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    write_attempts: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a key without version checks.
    pub async fn put(&self, key: &str, content: impl Into<Vec<u8>>) {
        let mut entries = self.entries.lock().await;
        let next = entries.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        entries.insert(key.to_string(), (content.into(), next));
    }

    /// Number of create/update calls received, successful or not.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::Relaxed)
    }

    /// Make every subsequent create/update fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn begin_write(&self) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::Io("write rejected by store".into()));
        }
        Ok(())
    }
}

fn tag(version: u64) -> VersionTag {
    VersionTag::new(format!("v{version}"))
}

impl VersionedStore for MemoryStore {
    fn id(&self) -> &str {
        "memory"
    }

    fn read<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<StoredObject>> {
        Box::pin(async move {
            validate_key(key)?;
            let entries = self.entries.lock().await;
            Ok(entries.get(key).map(|(content, version)| StoredObject {
                content: content.clone(),
                version: tag(*version),
            }))
        })
    }

    fn create<'a>(
        &'a self,
        key: &'a str,
        content: Vec<u8>,
        _message: &'a str,
    ) -> StoreFuture<'a, VersionTag> {
        Box::pin(async move {
            validate_key(key)?;
            self.begin_write()?;
            let mut entries = self.entries.lock().await;
            if entries.contains_key(key) {
                return Err(Error::Conflict(format!("{key} already exists")));
            }
            entries.insert(key.to_string(), (content, 1));
            Ok(tag(1))
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
            validate_key(key)?;
            self.begin_write()?;
            let mut entries = self.entries.lock().await;
            let current = entries
                .get(key)
                .map(|(_, v)| *v)
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            if &tag(current) != version {
                return Err(Error::Conflict(format!(
                    "{key} is at v{current}, update was based on {version}"
                )));
            }
            let next = current + 1;
            entries.insert(key.to_string(), (content, next));
            Ok(tag(next))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn versions_advance_on_update() {
        let store = MemoryStore::new();
        let v1 = store.create("k.json", b"a".to_vec(), "").await.unwrap();
        assert_eq!(v1.as_str(), "v1");
        let v2 = store.update("k.json", b"b".to_vec(), &v1, "").await.unwrap();
        assert_eq!(v2.as_str(), "v2");
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let v1 = store.create("k.json", b"a".to_vec(), "").await.unwrap();
        store.put("k.json", "changed elsewhere").await;

        let err = store
            .update("k.json", b"b".to_vec(), &v1, "")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn failing_writes_leave_content_untouched() {
        let store = MemoryStore::new();
        store.put("k.json", "original").await;
        store.set_fail_writes(true);

        let current = store.read("k.json").await.unwrap().unwrap();
        let err = store
            .update("k.json", b"new".to_vec(), &current.version, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(
            store.read("k.json").await.unwrap().unwrap().content,
            b"original"
        );
    }
}
