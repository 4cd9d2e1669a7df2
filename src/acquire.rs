//! File Acquisition Service
//!
//! Materializes a platform media reference as a file on local storage.
//!
//! 1. **Local copy**: when the Bot API relay shares our filesystem, the file
//!    already sits under `<relay_dir>/<bot_token>/...`; copy it directly.
//! 2. **Network**: resolve a download URL and stream the body to disk.
//!
//! Either way the result must exist and be non-empty. A failed local copy
//! falls back to the network path instead of surfacing an error.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};

/// Platform media API used by the acquisition service
#[async_trait]
pub trait MediaApi: Send + Sync {
    /// Relay-side path of the file (absolute for a local relay)
    async fn get_file_metadata(&self, media_ref: &str) -> BotResult<String>;

    /// Temporary URL the file can be downloaded from
    async fn resolve_download_url(&self, media_ref: &str) -> BotResult<String>;
}

/// Something that can pull media into local storage
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(&self, media_ref: &str, target: &Path) -> BotResult<Acquired>;
}

#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Relay data directory; the fast path is enabled only if it exists
    pub local_data_dir: Option<PathBuf>,
    /// Bot token, names the relay's per-bot subdirectory
    pub bot_token: String,
    /// Bound on a single network download
    pub download_timeout: Duration,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            local_data_dir: None,
            bot_token: String::new(),
            download_timeout: Duration::from_secs(30),
        }
    }
}

/// Which path produced the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePath {
    LocalCopy,
    Network,
}

#[derive(Debug, Clone)]
pub struct Acquired {
    pub path: PathBuf,
    pub bytes: u64,
    pub via: AcquirePath,
}

pub struct FileAcquisition {
    api: Arc<dyn MediaApi>,
    http: reqwest::Client,
    local_root: Option<PathBuf>,
    bot_token: String,
    download_timeout: Duration,
}

impl FileAcquisition {
    pub fn new(api: Arc<dyn MediaApi>, config: AcquireConfig) -> Self {
        let local_root = config.local_data_dir.filter(|dir| dir.is_dir());
        match &local_root {
            Some(dir) => info!("Local relay storage detected at {}", dir.display()),
            None => info!("No shared relay storage, media will be downloaded"),
        }

        Self {
            api,
            http: reqwest::Client::new(),
            local_root,
            bot_token: config.bot_token,
            download_timeout: config.download_timeout,
        }
    }

    pub fn has_local_fast_path(&self) -> bool {
        self.local_root.is_some()
    }

    /// Map a relay file path onto our view of the relay directory.
    ///
    /// The relay reports paths under its own data dir, which may be mounted
    /// elsewhere here, so everything after the `<bot_token>` component is
    /// re-rooted under `local_root/<bot_token>`.
    pub fn resolve_local_path(&self, relay_path: &str) -> Option<PathBuf> {
        let root = self.local_root.as_ref()?;
        let path = Path::new(relay_path);

        if !self.bot_token.is_empty() {
            let components: Vec<Component<'_>> = path.components().collect();
            if let Some(pos) = components
                .iter()
                .position(|c| c.as_os_str() == self.bot_token.as_str())
            {
                let mut resolved = root.join(&self.bot_token);
                for c in &components[pos + 1..] {
                    if let Component::Normal(part) = c {
                        resolved.push(part);
                    }
                }
                return Some(resolved);
            }
        }

        if path.is_absolute() {
            return path.starts_with(root).then(|| path.to_path_buf());
        }

        let mut resolved = root.join(&self.bot_token);
        for c in path.components() {
            if let Component::Normal(part) = c {
                resolved.push(part);
            }
        }
        Some(resolved)
    }

    async fn copy_local(&self, media_ref: &str, target: &Path) -> BotResult<u64> {
        let relay_path = self.api.get_file_metadata(media_ref).await?;
        let source = self.resolve_local_path(&relay_path).ok_or_else(|| {
            BotError::acquisition(media_ref, format!("{} is outside relay storage", relay_path))
        })?;
        tokio::fs::copy(&source, target).await?;
        verify_non_empty(media_ref, target).await
    }

    async fn download(&self, media_ref: &str, target: &Path) -> BotResult<u64> {
        let url = self.api.resolve_download_url(media_ref).await?;
        let result =
            tokio::time::timeout(self.download_timeout, self.stream_to(&url, target)).await;
        match result {
            Ok(Ok(())) => verify_non_empty(media_ref, target).await,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(target).await;
                Err(e)
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(target).await;
                Err(BotError::acquisition(
                    media_ref,
                    format!("download timed out after {:?}", self.download_timeout),
                ))
            }
        }
    }

    async fn stream_to(&self, url: &str, target: &Path) -> BotResult<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| {
                BotError::acquisition("download", redact(&e.to_string(), &self.bot_token))
            })?;
        if !response.status().is_success() {
            return Err(BotError::acquisition(
                "download",
                format!("HTTP {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                BotError::acquisition("download", redact(&e.to_string(), &self.bot_token))
            })?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaAcquirer for FileAcquisition {
    async fn acquire(&self, media_ref: &str, target: &Path) -> BotResult<Acquired> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut local_error = None;
        if self.local_root.is_some() {
            match self.copy_local(media_ref, target).await {
                Ok(bytes) => {
                    debug!("Copied {} from relay storage ({} bytes)", media_ref, bytes);
                    return Ok(Acquired {
                        path: target.to_path_buf(),
                        bytes,
                        via: AcquirePath::LocalCopy,
                    });
                }
                Err(e) => {
                    warn!("Local copy of {} failed, falling back to download: {}", media_ref, e);
                    let _ = tokio::fs::remove_file(target).await;
                    local_error = Some(e.to_string());
                }
            }
        }

        match self.download(media_ref, target).await {
            Ok(bytes) => {
                debug!("Downloaded {} ({} bytes)", media_ref, bytes);
                Ok(Acquired {
                    path: target.to_path_buf(),
                    bytes,
                    via: AcquirePath::Network,
                })
            }
            Err(e) => {
                let reason = match local_error {
                    Some(local) => format!("local copy: {}; download: {}", local, e),
                    None => format!("download: {}", e),
                };
                Err(BotError::acquisition(media_ref, reason))
            }
        }
    }
}

/// Treat missing or zero-byte output as failure
async fn verify_non_empty(media_ref: &str, target: &Path) -> BotResult<u64> {
    let len = match tokio::fs::metadata(target).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(BotError::acquisition(media_ref, "destination file missing")),
    };
    if len == 0 {
        let _ = tokio::fs::remove_file(target).await;
        return Err(BotError::acquisition(media_ref, "destination file is empty"));
    }
    Ok(len)
}

/// Download URLs embed the bot token; keep it out of logs and errors
fn redact(text: &str, token: &str) -> String {
    if token.is_empty() {
        text.to_string()
    } else {
        text.replace(token, "[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TOKEN: &str = "123:abc";

    struct StaticApi {
        relay_path: String,
        url: String,
    }

    #[async_trait]
    impl MediaApi for StaticApi {
        async fn get_file_metadata(&self, _media_ref: &str) -> BotResult<String> {
            Ok(self.relay_path.clone())
        }

        async fn resolve_download_url(&self, _media_ref: &str) -> BotResult<String> {
            Ok(self.url.clone())
        }
    }

    fn service(local: Option<&Path>, relay_path: &str) -> FileAcquisition {
        FileAcquisition::new(
            Arc::new(StaticApi {
                relay_path: relay_path.to_string(),
                url: "http://127.0.0.1:9/unreachable".to_string(),
            }),
            AcquireConfig {
                local_data_dir: local.map(Path::to_path_buf),
                bot_token: TOKEN.to_string(),
                download_timeout: Duration::from_secs(2),
            },
        )
    }

    #[test]
    fn test_missing_relay_dir_disables_fast_path() {
        let svc = service(Some(Path::new("/definitely/not/here")), "photos/a.jpg");
        assert!(!svc.has_local_fast_path());
        assert!(svc.resolve_local_path("photos/a.jpg").is_none());
    }

    #[test]
    fn test_resolve_rebases_token_subdirectory() {
        let relay = TempDir::new().unwrap();
        let svc = service(Some(relay.path()), "");

        let resolved = svc
            .resolve_local_path("/var/lib/telegram-bot-api/123:abc/photos/file_3.jpg")
            .unwrap();
        assert_eq!(resolved, relay.path().join(TOKEN).join("photos/file_3.jpg"));

        let relative = svc.resolve_local_path("photos/file_4.jpg").unwrap();
        assert_eq!(relative, relay.path().join(TOKEN).join("photos/file_4.jpg"));

        assert!(svc.resolve_local_path("/etc/passwd").is_none());
    }

    #[tokio::test]
    async fn test_local_copy_fast_path() {
        let relay = TempDir::new().unwrap();
        let photos = relay.path().join(TOKEN).join("photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("file_1.jpg"), b"jpeg-bytes").unwrap();

        let out = TempDir::new().unwrap();
        let target = out.path().join("user_1/workbook/photo.jpg");
        let svc = service(Some(relay.path()), "/srv/relay/123:abc/photos/file_1.jpg");

        let acquired = svc.acquire("file-id-1", &target).await.unwrap();
        assert_eq!(acquired.via, AcquirePath::LocalCopy);
        assert_eq!(acquired.bytes, 10);
        assert_eq!(std::fs::read(&target).unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_empty_local_file_is_rejected() {
        let relay = TempDir::new().unwrap();
        let photos = relay.path().join(TOKEN).join("photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("empty.jpg"), b"").unwrap();

        let out = TempDir::new().unwrap();
        let target = out.path().join("photo.jpg");
        let svc = service(Some(relay.path()), "photos/empty.jpg");

        let err = svc.acquire("file-id-2", &target).await.unwrap_err();
        assert!(matches!(err, BotError::MediaAcquisitionFailed { .. }));
        let text = err.to_string();
        assert!(text.contains("local copy"), "{}", text);
        assert!(!target.exists());
    }

    #[test]
    fn test_redact_token() {
        assert_eq!(
            redact("GET https://api/file/bot123:abc/x failed", TOKEN),
            "GET https://api/file/bot[REDACTED]/x failed"
        );
    }
}
