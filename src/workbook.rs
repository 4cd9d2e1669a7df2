//! Workbook sheets
//!
//! Photos are collected into named sheets. At most one sheet is open at a
//! time; queued photos land in the sheet that was open when they arrived,
//! even if it was closed before the queue reached them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{BotError, BotResult};
use crate::mode::UserId;
use crate::storage::{sanitize_file_name, UserLocks, UserStorage};
use crate::users::Feature;

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetPhoto {
    pub file_name: String,
    pub added_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// Directory under `workbook/` holding the sheet's photos
    pub dir: String,
    #[serde(default)]
    pub photos: Vec<SheetPhoto>,
    pub opened_at: i64,
    #[serde(default)]
    pub closed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbookState {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
    #[serde(default)]
    pub active: Option<Sheet>,
}

impl WorkbookState {
    pub fn open_sheet(&mut self, name: &str) -> BotResult<&Sheet> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::invalid("Give the sheet a name: /sheet <name>"));
        }
        if let Some(active) = &self.active {
            return Err(BotError::invalid(format!(
                "Sheet {} is still open with {} photo(s). Close it with /closesheet first.",
                active.name,
                active.photos.len()
            )));
        }
        let dir = sanitize_file_name(name);
        if self.sheets.iter().any(|s| s.dir == dir) {
            return Err(BotError::invalid(format!(
                "A sheet named {} already exists.",
                name
            )));
        }

        Ok(&*self.active.insert(Sheet {
            name: name.to_string(),
            dir,
            photos: Vec::new(),
            opened_at: chrono::Utc::now().timestamp(),
            closed_at: None,
        }))
    }

    /// Close the open sheet. An empty sheet is discarded, not saved,
    /// unless queued photos for it may still arrive.
    pub fn close_sheet(&mut self, photos_in_flight: bool) -> BotResult<Sheet> {
        let mut sheet = self
            .active
            .take()
            .ok_or_else(|| BotError::invalid("No sheet is open."))?;
        sheet.closed_at = Some(chrono::Utc::now().timestamp());
        if !sheet.photos.is_empty() || photos_in_flight {
            self.sheets.push(sheet.clone());
        }
        Ok(sheet)
    }

    /// Directory of the open sheet, for routing a new photo
    pub fn active_dir(&self) -> BotResult<&str> {
        self.active
            .as_ref()
            .map(|s| s.dir.as_str())
            .ok_or_else(|| BotError::invalid("No sheet is open. Start one with /sheet <name>."))
    }

    /// Append a stored photo to the sheet living in `dir`.
    /// Returns the sheet's photo count.
    pub fn record_photo(&mut self, dir: &str, file_name: &str) -> BotResult<usize> {
        let sheet = self
            .active
            .iter_mut()
            .chain(self.sheets.iter_mut())
            .find(|s| s.dir == dir)
            .ok_or_else(|| BotError::invalid(format!("Sheet {} no longer exists.", dir)))?;
        sheet.photos.push(SheetPhoto {
            file_name: file_name.to_string(),
            added_at: chrono::Utc::now().timestamp(),
        });
        Ok(sheet.photos.len())
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        match &self.active {
            Some(s) => out.push_str(&format!("Open sheet: {} ({} photos)", s.name, s.photos.len())),
            None => out.push_str("No open sheet"),
        }
        if self.sheets.is_empty() {
            out.push_str("\nNo saved sheets yet");
        } else {
            for s in &self.sheets {
                out.push_str(&format!("\n- {} ({} photos)", s.name, s.photos.len()));
            }
        }
        out
    }
}

/// Persistent per-user workbook state
pub struct WorkbookStore {
    storage: UserStorage,
    locks: UserLocks,
}

impl WorkbookStore {
    pub fn new(storage: UserStorage) -> Self {
        Self {
            storage,
            locks: UserLocks::default(),
        }
    }

    pub async fn load(&self, user_id: UserId) -> BotResult<WorkbookState> {
        self.storage
            .load_json(user_id, Feature::Workbook, STATE_FILE)
            .await
    }

    pub async fn update<T, F>(&self, user_id: UserId, f: F) -> BotResult<T>
    where
        F: FnOnce(&mut WorkbookState) -> BotResult<T>,
    {
        let _guard = self.locks.lock(user_id).await;
        let mut state = self.load(user_id).await?;
        let out = f(&mut state)?;
        self.storage
            .save_json(user_id, Feature::Workbook, STATE_FILE, &state)
            .await?;
        Ok(out)
    }

    /// Where a photo for sheet `dir` is stored
    pub fn photo_path(&self, user_id: UserId, dir: &str, file_name: &str) -> PathBuf {
        self.storage
            .feature_dir(user_id, Feature::Workbook)
            .join(dir)
            .join(file_name)
    }
}
