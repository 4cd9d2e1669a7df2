//! Activity / Audit Logging
//!
//! `record()` never blocks and never fails the calling operation. Events go
//! into a bounded buffer; when it is full the oldest event is dropped. A
//! background writer drains the buffer into an [`ActivityStore`].

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BotResult;
use crate::mode::{Mode, UserId};

/// One audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: UserId,
    pub action: String,
    pub mode: Mode,
    pub success: bool,
    pub details: Option<String>,
    pub timestamp: i64,
}

/// Durable destination for activity events
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn write(&self, events: &[ActivityEvent]) -> BotResult<()>;
}

/// Bounded, drop-oldest activity buffer
pub struct ActivitySink {
    buffer: Mutex<VecDeque<ActivityEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl ActivitySink {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Record an action, fire-and-forget
    pub fn record(
        &self,
        user_id: UserId,
        action: &str,
        mode: Mode,
        success: bool,
        details: Option<String>,
    ) {
        let event = ActivityEvent {
            user_id,
            action: action.to_string(),
            mode,
            success,
            details,
            timestamp: chrono::Utc::now().timestamp(),
        };

        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Activity buffer full, {} events dropped so far", dropped);
                }
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Events dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Take everything buffered so far
    pub fn drain(&self) -> Vec<ActivityEvent> {
        self.buffer.lock().drain(..).collect()
    }

    /// Start the background writer
    pub fn spawn_writer(self: &Arc<Self>, store: Arc<dyn ActivityStore>) -> ActivityWriterHandle {
        let sink = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            info!("Activity writer started (capacity {})", sink.capacity);
            loop {
                tokio::select! {
                    _ = sink.notify.notified() => sink.flush_to(store.as_ref()).await,
                    _ = stop.notified() => {
                        sink.flush_to(store.as_ref()).await;
                        break;
                    }
                }
            }
            info!("Activity writer stopped ({} events dropped)", sink.dropped());
        });

        ActivityWriterHandle { shutdown, handle }
    }

    async fn flush_to(&self, store: &dyn ActivityStore) {
        let batch = self.drain();
        if batch.is_empty() {
            return;
        }
        match store.write(&batch).await {
            Ok(()) => debug!("Wrote {} activity events", batch.len()),
            Err(e) => warn!("Failed to write {} activity events: {}", batch.len(), e),
        }
    }
}

/// Handle to the background writer
pub struct ActivityWriterHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ActivityWriterHandle {
    /// Flush what is buffered and stop
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

/// SQLite activity table
pub struct SqliteActivityLog {
    conn: Mutex<Connection>,
}

impl SqliteActivityLog {
    pub fn open(db_path: &Path) -> BotResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> BotResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> BotResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                mode TEXT NOT NULL,
                success INTEGER NOT NULL,
                details TEXT,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_user_time ON activity(user_id, timestamp);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent events for a user, newest first
    pub fn recent(&self, user_id: UserId, limit: usize) -> BotResult<Vec<ActivityEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_id, action, mode, success, details, timestamp FROM activity
             WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let mode: String = row.get(2)?;
                Ok(ActivityEvent {
                    user_id: row.get(0)?,
                    action: row.get(1)?,
                    mode: Mode::ALL
                        .into_iter()
                        .find(|m| m.as_str() == mode)
                        .unwrap_or_default(),
                    success: row.get(3)?,
                    details: row.get(4)?,
                    timestamp: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityLog {
    async fn write(&self, events: &[ActivityEvent]) -> BotResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for e in events {
            tx.execute(
                "INSERT INTO activity (user_id, action, mode, success, details, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![e.user_id, e.action, e.mode.as_str(), e.success, e.details, e.timestamp],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl ActivityStore for FailingStore {
        async fn write(&self, _events: &[ActivityEvent]) -> BotResult<()> {
            Err(BotError::TransientDependency("audit db down".into()))
        }
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let sink = ActivitySink::new(3);
        for i in 0..5 {
            sink.record(i, "photo", Mode::Workbook, true, None);
        }
        assert_eq!(sink.dropped(), 2);

        let users: Vec<UserId> = sink.drain().iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![2, 3, 4]);
        assert_eq!(sink.pending(), 0);
    }

    #[tokio::test]
    async fn test_writer_persists_events() {
        let sink = ActivitySink::new(16);
        let log = Arc::new(SqliteActivityLog::open_in_memory().unwrap());
        let writer = sink.spawn_writer(log.clone());

        sink.record(1, "/kml", Mode::Kml, true, None);
        sink.record(1, "location", Mode::Kml, false, Some("no active line".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.shutdown().await;

        let recent = log.recent(1, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "location");
        assert!(!recent[0].success);
        assert_eq!(recent[1].mode, Mode::Kml);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let sink = ActivitySink::new(4);
        let writer = sink.spawn_writer(Arc::new(FailingStore));

        sink.record(9, "/ocr", Mode::Ocr, true, None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.record(9, "/reset", Mode::Idle, true, None);
        writer.shutdown().await;

        assert_eq!(sink.pending(), 0);
    }
}
