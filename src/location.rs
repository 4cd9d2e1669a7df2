//! Location log: every fix received in location mode is appended to
//! `<user>/location/points.json`.

use serde::{Deserialize, Serialize};

use crate::error::BotResult;
use crate::kml::Coordinate;
use crate::mode::UserId;
use crate::storage::{UserLocks, UserStorage};
use crate::users::Feature;

const LOG_FILE: &str = "points.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub recorded_at: i64,
}

pub struct LocationLog {
    storage: UserStorage,
    locks: UserLocks,
}

impl LocationLog {
    pub fn new(storage: UserStorage) -> Self {
        Self {
            storage,
            locks: UserLocks::default(),
        }
    }

    /// Append a fix; returns how many fixes the user now has
    pub async fn append(&self, user_id: UserId, coordinate: Coordinate) -> BotResult<usize> {
        let _guard = self.locks.lock(user_id).await;
        let mut fixes: Vec<LocationFix> = self
            .storage
            .load_json(user_id, Feature::Location, LOG_FILE)
            .await?;
        fixes.push(LocationFix {
            coordinate,
            recorded_at: chrono::Utc::now().timestamp(),
        });
        self.storage
            .save_json(user_id, Feature::Location, LOG_FILE, &fixes)
            .await?;
        Ok(fixes.len())
    }

    pub async fn load(&self, user_id: UserId) -> BotResult<Vec<LocationFix>> {
        self.storage
            .load_json(user_id, Feature::Location, LOG_FILE)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let log = LocationLog::new(UserStorage::new(tmp.path()));

        assert_eq!(log.append(8, Coordinate::new(-7.25, 112.77)).await.unwrap(), 1);
        assert_eq!(log.append(8, Coordinate::new(-7.26, 112.78)).await.unwrap(), 2);

        let fixes = log.load(8).await.unwrap();
        assert_eq!(fixes[0].coordinate, Coordinate::new(-7.25, 112.77));
        assert_eq!(fixes[1].coordinate.latitude, -7.26);
        assert!(log.load(9).await.unwrap().is_empty());
    }
}
