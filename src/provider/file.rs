//! JSON file-backed whitelist
//!
//! Entries survive process restarts. Every mutation rewrites the whole
//! file via temp file + rename so a crash never leaves it half-written.

use crate::error::{GuardError, Result};
use crate::provider::WhitelistStore;
use crate::types::{WhitelistEntry, WhitelistKind};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct FileWhitelistStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileWhitelistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<WhitelistEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            GuardError::Config(format!(
                "Failed to read whitelist file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_str(&json).map_err(|e| {
            GuardError::Config(format!(
                "Failed to parse whitelist file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, entries: &[WhitelistEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GuardError::Config(format!(
                    "Failed to create whitelist directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            GuardError::Config(format!(
                "Failed to write whitelist file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            GuardError::Config(format!(
                "Failed to rename whitelist file {} → {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            count = entries.len(),
            "Whitelist saved"
        );
        Ok(())
    }
}

#[async_trait]
impl WhitelistStore for FileWhitelistStore {
    async fn add(&self, entry: WhitelistEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.retain(|e| !e.matches(&entry.space_id, entry.kind, &entry.target_id));
        entries.push(entry);
        self.save(&entries).await
    }

    async fn remove(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|e| !e.matches(space_id, kind, target_id));
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries).await?;
        Ok(true)
    }

    async fn list(&self, space_id: &str) -> Result<Vec<WhitelistEntry>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.space_id == space_id)
            .collect())
    }

    async fn is_active(&self, space_id: &str, kind: WhitelistKind, target_id: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .load()
            .await?
            .iter()
            .any(|e| e.matches(space_id, kind, target_id) && e.is_effective(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.json");

        let store = FileWhitelistStore::new(&path);
        store
            .add(WhitelistEntry::new("s1", WhitelistKind::User, "u1", "owner"))
            .await
            .unwrap();
        store
            .add(WhitelistEntry::new("s1", WhitelistKind::Role, "r1", "owner"))
            .await
            .unwrap();

        let reopened = FileWhitelistStore::new(&path);
        assert_eq!(reopened.list("s1").await.unwrap().len(), 2);
        assert!(reopened.is_active("s1", WhitelistKind::User, "u1").await.unwrap());

        // Human-readable JSON
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"targetId\": \"u1\""));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWhitelistStore::new(dir.path().join("absent.json"));
        assert!(store.list("s1").await.unwrap().is_empty());
        assert!(!store.is_active("s1", WhitelistKind::User, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_and_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/whitelist.json");
        let store = FileWhitelistStore::new(&path);

        store
            .add(WhitelistEntry::new("s1", WhitelistKind::Action, "role_delete", "owner"))
            .await
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        assert!(store
            .remove("s1", WhitelistKind::Action, "role_delete")
            .await
            .unwrap());
        assert!(!store
            .remove("s1", WhitelistKind::Action, "role_delete")
            .await
            .unwrap());
        assert!(store.list("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileWhitelistStore::new(&path);
        assert!(matches!(store.list("s1").await, Err(GuardError::Config(_))));
    }
}
