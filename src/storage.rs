//! Durable per-user storage
//!
//! Layout: `<root>/user_<id>/<feature>/...`. Feature handlers keep their
//! accumulator state here as JSON so it survives session eviction and
//! restarts.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::BotResult;
use crate::mode::UserId;
use crate::users::Feature;

#[derive(Debug, Clone)]
pub struct UserStorage {
    root: PathBuf,
}

impl UserStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user_dir(&self, user_id: UserId) -> PathBuf {
        self.root.join(format!("user_{}", user_id))
    }

    pub fn feature_dir(&self, user_id: UserId, feature: Feature) -> PathBuf {
        self.user_dir(user_id).join(feature.as_str())
    }

    /// Create (if needed) and return the user's directory for `feature`
    pub async fn ensure_user_feature_dir(
        &self,
        user_id: UserId,
        feature: Feature,
    ) -> BotResult<PathBuf> {
        let dir = self.feature_dir(user_id, feature);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Load a JSON state blob, or `T::default()` when none was saved yet
    pub async fn load_json<T>(&self, user_id: UserId, feature: Feature, name: &str) -> BotResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.feature_dir(user_id, feature).join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a JSON state blob through a temp file and rename
    pub async fn save_json<T>(
        &self,
        user_id: UserId,
        feature: Feature,
        name: &str,
        value: &T,
    ) -> BotResult<PathBuf>
    where
        T: Serialize,
    {
        let dir = self.ensure_user_feature_dir(user_id, feature).await?;
        let path = dir.join(name);
        let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Remove a state blob; missing files are fine
    pub async fn remove(&self, user_id: UserId, feature: Feature, name: &str) -> BotResult<()> {
        let path = self.feature_dir(user_id, feature).join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Count regular files in a feature dir, ignoring JSON state and temp files
    pub async fn count_media_files(&self, user_id: UserId, feature: Feature) -> BotResult<usize> {
        let dir = self.feature_dir(user_id, feature);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name.ends_with(".json") {
                continue;
            }
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Per-user async locks serializing read-modify-write of a state blob
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries only the map still references are idle: no holder, no waiter
            locks.retain(|id, l| *id == user_id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Strip path separators and control characters from a user-facing name
pub fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    let mut name: String = trimmed.chars().take(120).collect();
    if name.is_empty() {
        name = "file".to_string();
    }
    name
}
