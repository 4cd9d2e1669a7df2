//! End-to-end bot flows without a Telegram connection
//!
//! Wires `BotCore` with the real acquisition service (relay dir + HTTP
//! fallback), SQLite directory and activity log, and drives it with
//! inbound events the way the dispatcher does.

use async_trait::async_trait;
use axum::{routing::get, Router};
use fieldbot::{
    AcquireConfig, ActivitySink, BotCore, BotResult, Coordinate, CoreDeps, EventKind, Feature,
    FileAcquisition, InboundEvent, MediaApi, Mode, ModeStore, Notifier, QueueConfig,
    SqliteActivityLog, SqliteUserDirectory, UserId, UserStorage,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "42:flow";
const ADMIN: UserId = 100;
const SURVEYOR: UserId = 200;
const OTHER: UserId = 300;

/// Refs starting with "local" exist in the relay dir, "net" only over HTTP,
/// anything else is gone everywhere.
struct RelayApi {
    http: String,
}

#[async_trait]
impl MediaApi for RelayApi {
    async fn get_file_metadata(&self, media_ref: &str) -> BotResult<String> {
        Ok(format!("/srv/relay/{}/photos/{}.jpg", TOKEN, media_ref))
    }

    async fn resolve_download_url(&self, media_ref: &str) -> BotResult<String> {
        let route = if media_ref.starts_with("net") { "ok" } else { "gone" };
        Ok(format!("{}/{}", self.http, route))
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<(UserId, String)>>);

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, user_id: UserId, text: &str) -> BotResult<()> {
        self.0.lock().push((user_id, text.to_string()));
        Ok(())
    }
}

impl Outbox {
    fn to(&self, user_id: UserId) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

struct Env {
    core: BotCore,
    outbox: Arc<Outbox>,
    activity: Arc<ActivitySink>,
    data: TempDir,
    relay: TempDir,
}

impl Env {
    async fn new() -> Self {
        let app = Router::new().route("/ok", get(|| async { vec![7u8; 1024] }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let data = TempDir::new().unwrap();
        let relay = TempDir::new().unwrap();
        std::fs::create_dir_all(relay.path().join(TOKEN).join("photos")).unwrap();

        let directory = Arc::new(SqliteUserDirectory::open(&data.path().join("bot.db")).unwrap());
        directory.seed_admin(ADMIN).unwrap();
        for user in [SURVEYOR, OTHER] {
            directory.register(user, None).unwrap();
            directory.set_active(user, true).unwrap();
            directory.grant(user, Feature::Workbook).unwrap();
            directory.grant(user, Feature::Kml).unwrap();
        }

        let acquirer = Arc::new(FileAcquisition::new(
            Arc::new(RelayApi {
                http: format!("http://{}", addr),
            }),
            AcquireConfig {
                local_data_dir: Some(relay.path().to_path_buf()),
                bot_token: TOKEN.to_string(),
                download_timeout: Duration::from_secs(5),
            },
        ));

        let outbox = Arc::new(Outbox::default());
        let activity = ActivitySink::new(1024);
        let core = BotCore::new(CoreDeps {
            modes: ModeStore::with_defaults(),
            directory,
            acquirer,
            notifier: outbox.clone(),
            storage: UserStorage::new(data.path().join("users")),
            activity: activity.clone(),
            queue: QueueConfig::default(),
            admins: vec![ADMIN],
        });

        Self {
            core,
            outbox,
            activity,
            data,
            relay,
        }
    }

    fn put_relay_file(&self, media_ref: &str) {
        let path = self
            .relay
            .path()
            .join(TOKEN)
            .join("photos")
            .join(format!("{}.jpg", media_ref));
        std::fs::write(path, b"relay-jpeg").unwrap();
    }

    async fn say(&self, user_id: UserId, kind: EventKind) -> Option<String> {
        self.core
            .handle(InboundEvent {
                user_id,
                username: None,
                kind,
            })
            .await
            .text
    }

    async fn command(&self, user_id: UserId, text: &str) -> String {
        self.say(user_id, EventKind::Text(text.to_string()))
            .await
            .unwrap_or_default()
    }

    async fn photo(&self, user_id: UserId, media_ref: &str) -> Option<String> {
        self.say(
            user_id,
            EventKind::Photo {
                media_ref: media_ref.to_string(),
                unique_id: media_ref.to_string(),
            },
        )
        .await
    }

    /// Wait until the user's queue is idle with `handled` items behind it
    async fn drained(&self, user_id: UserId, handled: u64) {
        for _ in 0..1000 {
            let stats = self.core.queue().stats(user_id);
            if !stats.is_draining && stats.processed + stats.errors == handled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("queue for {} never drained", user_id);
    }
}

#[tokio::test]
async fn test_twenty_five_photo_workbook_batch() {
    let env = Env::new().await;
    env.command(SURVEYOR, "/workbook").await;
    env.command(SURVEYOR, "/sheet Gardu Induk").await;

    // 20 in the relay, 3 only over HTTP, 2 missing everywhere
    let mut refs = Vec::new();
    for i in 0..25 {
        let media_ref = match i {
            7 | 19 => format!("gone{}", i),
            3 | 11 | 22 => format!("net{}", i),
            _ => {
                let r = format!("local{}", i);
                env.put_relay_file(&r);
                r
            }
        };
        refs.push(media_ref);
    }
    for r in &refs {
        assert_eq!(env.photo(SURVEYOR, r).await, None);
    }

    env.drained(SURVEYOR, 25).await;

    let messages = env.outbox.to(SURVEYOR);
    let summary = messages
        .iter()
        .rev()
        .find(|m| m.starts_with("Done"))
        .expect("completion summary");
    assert_eq!(
        summary,
        "Done: 23 of 25 photos processed, 2 of 25 failed. Please resend the failed ones."
    );

    let reply = env.command(SURVEYOR, "/closesheet").await;
    assert_eq!(reply, "Sheet Gardu Induk closed with 23 photo(s).");

    let sheet_dir = env.data.path().join("users/user_200/workbook/Gardu Induk");
    let mut names: Vec<String> = std::fs::read_dir(sheet_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(names.len(), 23);
    assert!(names.iter().any(|n| n.ends_with("_net3.jpg")));
}

#[tokio::test]
async fn test_users_queues_are_independent() {
    let env = Env::new().await;
    for user in [SURVEYOR, OTHER] {
        env.command(user, "/workbook").await;
        env.command(user, &format!("/sheet s{}", user)).await;
    }

    // SURVEYOR's photos all fail, OTHER's succeed
    for i in 0..6 {
        env.photo(SURVEYOR, &format!("gone{}", i)).await;
    }
    env.put_relay_file("local-o1");
    env.photo(OTHER, "local-o1").await;

    env.drained(OTHER, 1).await;
    let other = env.outbox.to(OTHER);
    assert_eq!(other.last().unwrap(), "Done: all 1 photos processed.");

    env.drained(SURVEYOR, 6).await;
    let stats = env.core.queue().stats(SURVEYOR);
    assert_eq!((stats.processed, stats.errors), (0, 6));
}

#[tokio::test]
async fn test_reset_mid_batch_stops_draining() {
    let env = Env::new().await;
    env.command(SURVEYOR, "/workbook").await;
    env.command(SURVEYOR, "/sheet Tower").await;
    for i in 0..15 {
        let r = format!("local-r{}", i);
        env.put_relay_file(&r);
        env.photo(SURVEYOR, &r).await;
    }

    let reply = env.command(SURVEYOR, "/reset").await;
    assert!(reply.starts_with("Mode cleared"), "{}", reply);
    assert_eq!(env.core.modes().get_mode(SURVEYOR), Mode::Idle);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = env.core.queue().stats(SURVEYOR);
    assert_eq!(stats.pending, 0);
    assert!(!stats.is_draining);

    // Photos after the reset are not queued
    let reply = env.photo(SURVEYOR, "local-r0").await.unwrap();
    assert!(reply.contains("Choose a feature first"));
}

#[tokio::test]
async fn test_kml_state_survives_session_eviction() {
    let env = Env::new().await;
    env.command(SURVEYOR, "/kml").await;
    env.command(SURVEYOR, "/addpoint \"Home\"").await;
    let reply = env
        .say(SURVEYOR, EventKind::Location(Coordinate::new(-7.25, 112.77)))
        .await
        .unwrap();
    assert!(reply.starts_with("Point Home saved"));

    // Session lost; durable KML state is not
    env.core.modes().clear_mode(SURVEYOR);
    assert_eq!(env.core.modes().get_mode(SURVEYOR), Mode::Idle);

    let status = env.command(SURVEYOR, "/kmlstatus").await;
    assert!(status.starts_with("KML: 1 point(s), 0 line(s)"), "{}", status);
}

#[tokio::test]
async fn test_core_activity_reaches_sqlite() {
    let env = Env::new().await;
    let log = Arc::new(SqliteActivityLog::open(&env.data.path().join("activity.db")).unwrap());
    let writer = env.activity.spawn_writer(log.clone());

    env.command(SURVEYOR, "/kml").await;
    env.command(SURVEYOR, "/endline").await;
    env.command(OTHER, "/grant 1 kml").await;
    writer.shutdown().await;

    let recent = log.recent(SURVEYOR, 5).unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|e| e.mode == Mode::Kml));
    assert!(recent.iter().any(|e| e.action == "/endline" && !e.success));
    assert!(recent.iter().any(|e| e.success));

    // Rejections are recorded too
    let other = log.recent(OTHER, 5).unwrap();
    assert_eq!(other.len(), 1);
    assert!(!other[0].success);
}
