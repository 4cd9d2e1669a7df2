//! Per-user Mode Store
//!
//! Remembers which feature a user is "inside" between messages. The store is
//! a liveness and routing signal only: sessions are evicted after an idle
//! threshold and evicted state is gone. Features that accumulate data they
//! cannot lose persist it through [`crate::storage::UserStorage`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::users::Feature;

/// Stable platform user identifier
pub type UserId = i64;

/// Mode-scoped payload; patches merge key by key
pub type ModeState = serde_json::Map<String, serde_json::Value>;

/// The single active feature context for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    Ocr,
    Archive,
    Location,
    Geotags,
    Kml,
    Workbook,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::Idle,
        Mode::Ocr,
        Mode::Archive,
        Mode::Location,
        Mode::Geotags,
        Mode::Kml,
        Mode::Workbook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ocr => "ocr",
            Self::Archive => "archive",
            Self::Location => "location",
            Self::Geotags => "geotags",
            Self::Kml => "kml",
            Self::Workbook => "workbook",
        }
    }

    /// Feature entitlement required to enter this mode
    pub fn feature(&self) -> Option<Feature> {
        match self {
            Self::Idle => None,
            Self::Ocr => Some(Feature::Ocr),
            Self::Archive => Some(Feature::Archive),
            Self::Location => Some(Feature::Location),
            Self::Geotags => Some(Feature::Geotags),
            Self::Kml => Some(Feature::Kml),
            Self::Workbook => Some(Feature::Workbook),
        }
    }

    /// Modes whose photos go through the ingestion queue
    pub fn consumes_queue(&self) -> bool {
        matches!(self, Self::Archive | Self::Workbook)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode store configuration
#[derive(Debug, Clone)]
pub struct ModeStoreConfig {
    /// Sessions idle longer than this are evicted (default: 24h)
    pub idle_ttl: Duration,
    /// Interval of the background sweep (default: 30 min)
    pub sweep_interval: Duration,
}

impl Default for ModeStoreConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    mode: Mode,
    state: ModeState,
    created_at: chrono::DateTime<chrono::Utc>,
    last_activity_at: Instant,
}

impl Session {
    fn new(mode: Mode, state: ModeState) -> Self {
        Self {
            mode,
            state,
            created_at: chrono::Utc::now(),
            last_activity_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity_at) > ttl
    }
}

/// Read-only view of a session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub mode: Mode,
    pub state: ModeState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub idle_for: Duration,
}

/// In-memory mode store, one instance per bot process
pub struct ModeStore {
    sessions: Mutex<HashMap<UserId, Session>>,
    config: ModeStoreConfig,
}

impl ModeStore {
    pub fn new(config: ModeStoreConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(ModeStoreConfig::default())
    }

    /// Current mode; `Idle` when there is no live session
    pub fn get_mode(&self, user_id: UserId) -> Mode {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&user_id) {
            Some(session) if session.is_expired(self.config.idle_ttl, now) => {
                sessions.remove(&user_id);
                debug!("Session for user {} expired on lookup", user_id);
                Mode::Idle
            }
            Some(session) => {
                session.last_activity_at = now;
                session.mode
            }
            None => Mode::Idle,
        }
    }

    /// Replace the mode and reset its state. Returns the previous mode.
    pub fn set_mode(&self, user_id: UserId, mode: Mode, initial: Option<ModeState>) -> Mode {
        let state = initial.unwrap_or_default();
        let mut sessions = self.sessions.lock();
        let previous = match sessions.get_mut(&user_id) {
            Some(session) => {
                let previous = session.mode;
                session.mode = mode;
                session.state = state;
                session.last_activity_at = Instant::now();
                previous
            }
            None => {
                sessions.insert(user_id, Session::new(mode, state));
                Mode::Idle
            }
        };
        debug!("User {} mode {} -> {}", user_id, previous, mode);
        previous
    }

    /// Remove the session. Returns the mode that was active, if any.
    pub fn clear_mode(&self, user_id: UserId) -> Option<Mode> {
        self.sessions.lock().remove(&user_id).map(|s| s.mode)
    }

    /// Merge `patch` into the mode state without changing the mode.
    /// Returns false when the user has no session.
    pub fn update_state(&self, user_id: UserId, patch: ModeState) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&user_id) {
            Some(session) => {
                session.state.extend(patch);
                session.last_activity_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Clone of the mode state (empty without a session)
    pub fn state(&self, user_id: UserId) -> ModeState {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&user_id) {
            Some(session) => {
                session.last_activity_at = Instant::now();
                session.state.clone()
            }
            None => ModeState::new(),
        }
    }

    pub fn session(&self, user_id: UserId) -> Option<SessionInfo> {
        let now = Instant::now();
        self.sessions.lock().get(&user_id).map(|s| SessionInfo {
            user_id,
            mode: s.mode,
            state: s.state.clone(),
            created_at: s.created_at,
            idle_for: now.saturating_duration_since(s.last_activity_at),
        })
    }

    /// Evict idle sessions. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.idle_ttl;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(ttl, now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live (unexpired) session exists; does not refresh it
    pub fn has_session(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        self.sessions
            .lock()
            .get(&user_id)
            .is_some_and(|s| !s.is_expired(self.config.idle_ttl, now))
    }

    /// Start the periodic eviction sweep
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        self.spawn_sweeper_with(|| {})
    }

    /// Like [`spawn_sweeper`](Self::spawn_sweeper), running `after_sweep`
    /// once per tick so per-user state kept elsewhere can follow evictions
    pub fn spawn_sweeper_with<F>(self: &Arc<Self>, after_sweep: F) -> SweeperHandle
    where
        F: Fn() + Send + 'static,
    {
        let store = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        // tokio::time::interval panics on zero
        let interval = self.config.sweep_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            info!("Session sweeper started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.sweep();
                        if evicted > 0 {
                            info!("Evicted {} idle sessions ({} remaining)", evicted, store.len());
                        }
                        after_sweep();
                    }
                    _ = stop.notified() => break,
                }
            }
            info!("Session sweeper stopped");
        });

        SweeperHandle { shutdown, handle }
    }
}

/// Handle to a running sweep task
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_of(pairs: &[(&str, serde_json::Value)]) -> ModeState {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_unknown_user_is_idle() {
        let store = ModeStore::with_defaults();
        assert_eq!(store.get_mode(42), Mode::Idle);
        assert!(store.is_empty());
    }

    #[test]
    fn test_switching_modes_resets_state() {
        let store = ModeStore::with_defaults();
        store.set_mode(1, Mode::Kml, Some(state_of(&[("points", json!(3))])));
        assert_eq!(store.state(1).get("points"), Some(&json!(3)));

        store.set_mode(1, Mode::Workbook, None);
        assert!(store.state(1).is_empty());

        store.set_mode(1, Mode::Kml, None);
        assert_eq!(store.get_mode(1), Mode::Kml);
        assert!(store.state(1).is_empty(), "stale KML state survived a mode switch");
    }

    #[test]
    fn test_set_mode_returns_previous() {
        let store = ModeStore::with_defaults();
        assert_eq!(store.set_mode(1, Mode::Ocr, None), Mode::Idle);
        assert_eq!(store.set_mode(1, Mode::Archive, None), Mode::Ocr);
        assert_eq!(store.clear_mode(1), Some(Mode::Archive));
        assert_eq!(store.clear_mode(1), None);
    }

    #[test]
    fn test_update_state_merges_without_mode_change() {
        let store = ModeStore::with_defaults();
        assert!(!store.update_state(7, state_of(&[("a", json!(1))])));

        store.set_mode(7, Mode::Workbook, Some(state_of(&[("sheet", json!("A"))])));
        assert!(store.update_state(7, state_of(&[("count", json!(2))])));
        assert!(store.update_state(7, state_of(&[("sheet", json!("B"))])));

        let state = store.state(7);
        assert_eq!(store.get_mode(7), Mode::Workbook);
        assert_eq!(state.get("sheet"), Some(&json!("B")));
        assert_eq!(state.get("count"), Some(&json!(2)));
    }

    #[test]
    fn test_idle_session_evicted_on_lookup() {
        let store = ModeStore::new(ModeStoreConfig {
            idle_ttl: Duration::from_millis(20),
            sweep_interval: Duration::from_secs(60),
        });
        store.set_mode(5, Mode::Location, None);
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(store.get_mode(5), Mode::Idle);
        assert!(store.session(5).is_none());
    }

    #[test]
    fn test_sweep_only_removes_idle_sessions() {
        let store = ModeStore::new(ModeStoreConfig {
            idle_ttl: Duration::from_millis(40),
            sweep_interval: Duration::from_secs(60),
        });
        store.set_mode(1, Mode::Kml, None);
        std::thread::sleep(Duration::from_millis(60));
        store.set_mode(2, Mode::Ocr, None);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.get_mode(1), Mode::Idle);
        assert_eq!(store.get_mode(2), Mode::Ocr);
    }

    #[test]
    fn test_independent_instances() {
        let a = ModeStore::with_defaults();
        let b = ModeStore::with_defaults();
        a.set_mode(1, Mode::Kml, None);
        assert_eq!(b.get_mode(1), Mode::Idle);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_shuts_down() {
        let store = ModeStore::new(ModeStoreConfig {
            idle_ttl: Duration::from_millis(10),
            sweep_interval: Duration::from_millis(20),
        });
        store.set_mode(9, Mode::Archive, None);

        let sweeper = store.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_hook_and_zero_interval() {
        let store = ModeStore::new(ModeStoreConfig {
            idle_ttl: Duration::from_millis(10),
            sweep_interval: Duration::ZERO,
        });
        store.set_mode(4, Mode::Workbook, None);
        assert!(store.has_session(4));

        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        let sweeper = store.spawn_sweeper_with(move || {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        sweeper.shutdown().await;

        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
        assert!(!store.has_session(4));
    }

    #[test]
    fn test_queue_consuming_modes() {
        let consuming: Vec<Mode> = Mode::ALL.into_iter().filter(|m| m.consumes_queue()).collect();
        assert_eq!(consuming, vec![Mode::Archive, Mode::Workbook]);
        assert!(Mode::Idle.feature().is_none());
        assert_eq!(Mode::Kml.feature(), Some(Feature::Kml));
    }
}
