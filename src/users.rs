//! User and Entitlement Directory
//!
//! Registered users, their roles and per-user feature grants, plus the
//! global on/off switch for each feature. Backed by SQLite.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::error::BotResult;
use crate::mode::UserId;

/// Feature that can be enabled globally and granted per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Ocr,
    Geotags,
    Kml,
    Workbook,
    Archive,
    Location,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Ocr,
        Feature::Geotags,
        Feature::Kml,
        Feature::Workbook,
        Feature::Archive,
        Feature::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Geotags => "geotags",
            Self::Kml => "kml",
            Self::Workbook => "workbook",
            Self::Archive => "archive",
            Self::Location => "location",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == needle)
            .ok_or_else(|| format!("Unknown feature: {}", s.trim()))
    }
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    fn from_db(s: &str) -> Self {
        if s == "admin" {
            Self::Admin
        } else {
            Self::User
        }
    }
}

/// Resolved user, attached to the request context after the gate passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub is_active: bool,
    pub role: Role,
    pub granted_features: Vec<Feature>,
    pub created_at: i64,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.granted_features.contains(&feature)
    }
}

/// Lookup interface consumed by the entitlement gate
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a user; `Ok(None)` when the user is unknown
    async fn resolve_user(&self, user_id: UserId) -> BotResult<Option<UserRecord>>;

    /// Whether a feature is switched on globally
    async fn is_feature_enabled(&self, feature: Feature) -> BotResult<bool>;

    /// Cheap availability signal; an unhealthy directory is treated as deny
    fn is_healthy(&self) -> bool {
        true
    }
}

/// SQLite-backed user directory
pub struct SqliteUserDirectory {
    conn: Mutex<Connection>,
}

impl SqliteUserDirectory {
    /// Create or open the user database
    pub fn open(db_path: &Path) -> BotResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let dir = Self::from_connection(conn)?;
        info!("User directory opened: {}", db_path.display());
        Ok(dir)
    }

    pub fn open_in_memory() -> BotResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BotResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                active INTEGER NOT NULL DEFAULT 0,
                role TEXT NOT NULL DEFAULT 'user' CHECK(role IN ('user', 'admin')),
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS features (
                name TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS user_features (
                user_id INTEGER NOT NULL,
                feature TEXT NOT NULL,
                PRIMARY KEY (user_id, feature)
            );
            "#,
        )?;

        for feature in Feature::ALL {
            conn.execute(
                "INSERT OR IGNORE INTO features (name, enabled) VALUES (?1, 1)",
                params![feature.as_str()],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert an inactive user awaiting admin activation.
    /// Returns false when the user already exists.
    pub fn register(&self, user_id: UserId, username: Option<&str>) -> BotResult<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (user_id, username, active, role, created_at)
             VALUES (?1, ?2, 0, 'user', ?3)",
            params![user_id, username, chrono::Utc::now().timestamp()],
        )?;
        Ok(inserted > 0)
    }

    /// Make sure `user_id` exists as an active admin
    pub fn seed_admin(&self, user_id: UserId) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (user_id, active, role, created_at) VALUES (?1, 1, 'admin', ?2)
             ON CONFLICT(user_id) DO UPDATE SET active = 1, role = 'admin'",
            params![user_id, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Returns false when the user does not exist
    pub fn set_active(&self, user_id: UserId, active: bool) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE users SET active = ?2 WHERE user_id = ?1",
            params![user_id, active],
        )?;
        Ok(n > 0)
    }

    pub fn set_role(&self, user_id: UserId, role: Role) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE users SET role = ?2 WHERE user_id = ?1",
            params![user_id, role.as_str()],
        )?;
        Ok(n > 0)
    }

    pub fn grant(&self, user_id: UserId, feature: Feature) -> BotResult<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM users WHERE user_id = ?1",
                params![user_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(false);
        }
        conn.execute(
            "INSERT OR IGNORE INTO user_features (user_id, feature) VALUES (?1, ?2)",
            params![user_id, feature.as_str()],
        )?;
        Ok(true)
    }

    /// Returns whether a grant was removed
    pub fn revoke(&self, user_id: UserId, feature: Feature) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM user_features WHERE user_id = ?1 AND feature = ?2",
            params![user_id, feature.as_str()],
        )?;
        Ok(n > 0)
    }

    pub fn set_feature_enabled(&self, feature: Feature, enabled: bool) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE features SET enabled = ?2 WHERE name = ?1",
            params![feature.as_str(), enabled],
        )?;
        Ok(())
    }

    pub fn enabled_features(&self) -> BotResult<Vec<Feature>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM features WHERE enabled = 1 ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
    }

    pub fn get(&self, user_id: UserId) -> BotResult<Option<UserRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_id, username, active, role, created_at FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        is_active: row.get(2)?,
                        role: Role::from_db(&row.get::<_, String>(3)?),
                        granted_features: Vec::new(),
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(mut user) = row else {
            return Ok(None);
        };
        user.granted_features = Self::grants(&conn, user_id)?;
        Ok(Some(user))
    }

    pub fn list_users(&self) -> BotResult<Vec<UserRecord>> {
        let ids: Vec<UserId> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT user_id FROM users ORDER BY created_at, user_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(user) = self.get(id)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    fn grants(conn: &Connection, user_id: UserId) -> BotResult<Vec<Feature>> {
        let mut stmt =
            conn.prepare("SELECT feature FROM user_features WHERE user_id = ?1 ORDER BY feature")?;
        let names = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn resolve_user(&self, user_id: UserId) -> BotResult<Option<UserRecord>> {
        self.get(user_id)
    }

    async fn is_feature_enabled(&self, feature: Feature) -> BotResult<bool> {
        let conn = self.conn.lock();
        let enabled = conn
            .query_row(
                "SELECT enabled FROM features WHERE name = ?1",
                params![feature.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }
}
