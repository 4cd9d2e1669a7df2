//! File acquisition against a real HTTP server
//!
//! A local axum server plays the Bot API file endpoint so the network path
//! runs end to end: local copy failure, fallback, empty bodies, timeouts.

use async_trait::async_trait;
use axum::{routing::get, Router};
use fieldbot::acquire::AcquirePath;
use fieldbot::{AcquireConfig, BotError, BotResult, FileAcquisition, MediaAcquirer, MediaApi};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "123456:test-token";

async fn spawn_file_server() -> SocketAddr {
    let app = Router::new()
        .route("/photo.jpg", get(|| async { vec![0xFFu8; 4096] }))
        .route("/empty.jpg", get(|| async { Vec::<u8>::new() }))
        .route(
            "/slow.jpg",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                vec![1u8; 16]
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Media API whose relay path and download URL are fixed per test
struct FixedApi {
    relay_path: String,
    url: String,
}

#[async_trait]
impl MediaApi for FixedApi {
    async fn get_file_metadata(&self, _media_ref: &str) -> BotResult<String> {
        Ok(self.relay_path.clone())
    }

    async fn resolve_download_url(&self, _media_ref: &str) -> BotResult<String> {
        Ok(self.url.clone())
    }
}

fn acquisition(relay: Option<&Path>, relay_path: &str, url: String) -> FileAcquisition {
    FileAcquisition::new(
        Arc::new(FixedApi {
            relay_path: relay_path.to_string(),
            url,
        }),
        AcquireConfig {
            local_data_dir: relay.map(Path::to_path_buf),
            bot_token: TOKEN.to_string(),
            download_timeout: Duration::from_millis(500),
        },
    )
}

#[tokio::test]
async fn test_missing_local_file_falls_back_to_network() {
    let addr = spawn_file_server().await;
    let relay = TempDir::new().unwrap();
    std::fs::create_dir_all(relay.path().join(TOKEN).join("photos")).unwrap();
    let out = TempDir::new().unwrap();

    let svc = acquisition(
        Some(relay.path()),
        &format!("/var/lib/telegram-bot-api/{}/photos/missing.jpg", TOKEN),
        format!("http://{}/photo.jpg", addr),
    );
    assert!(svc.has_local_fast_path());

    let target = out.path().join("user_1/archive/photo.jpg");
    let acquired = svc.acquire("file-1", &target).await.unwrap();

    assert_eq!(acquired.via, AcquirePath::Network);
    assert_eq!(acquired.bytes, 4096);
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 4096);
}

#[tokio::test]
async fn test_network_only_without_relay() {
    let addr = spawn_file_server().await;
    let out = TempDir::new().unwrap();
    let svc = acquisition(None, "photos/file_9.jpg", format!("http://{}/photo.jpg", addr));
    assert!(!svc.has_local_fast_path());

    let acquired = svc
        .acquire("file-9", &out.path().join("photo.jpg"))
        .await
        .unwrap();
    assert_eq!(acquired.via, AcquirePath::Network);
}

#[tokio::test]
async fn test_empty_download_is_a_failure() {
    let addr = spawn_file_server().await;
    let out = TempDir::new().unwrap();
    let target = out.path().join("photo.jpg");
    let svc = acquisition(None, "photos/x.jpg", format!("http://{}/empty.jpg", addr));

    let err = svc.acquire("file-2", &target).await.unwrap_err();
    assert!(err.to_string().contains("empty"), "{}", err);
    assert!(!target.exists());
}

#[tokio::test]
async fn test_http_error_status() {
    let addr = spawn_file_server().await;
    let out = TempDir::new().unwrap();
    let svc = acquisition(None, "photos/x.jpg", format!("http://{}/nope.jpg", addr));

    let err = svc
        .acquire("file-3", &out.path().join("photo.jpg"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{}", err);
}

#[tokio::test]
async fn test_download_timeout_is_bounded() {
    let addr = spawn_file_server().await;
    let out = TempDir::new().unwrap();
    let svc = acquisition(None, "photos/x.jpg", format!("http://{}/slow.jpg", addr));

    let started = std::time::Instant::now();
    let err = svc
        .acquire("file-4", &out.path().join("photo.jpg"))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(err.to_string().contains("timed out"), "{}", err);
}

#[tokio::test]
async fn test_both_paths_failing_never_leaks_token() {
    let relay = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let svc = acquisition(
        Some(relay.path()),
        "photos/missing.jpg",
        format!("http://127.0.0.1:9/file/bot{}/photos/missing.jpg", TOKEN),
    );

    let err = svc
        .acquire("file-5", &out.path().join("photo.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::MediaAcquisitionFailed { .. }));
    let text = err.to_string();
    assert!(text.contains("local copy"), "{}", text);
    assert!(text.contains("download"), "{}", text);
    assert!(!text.contains(TOKEN), "{}", text);
}
