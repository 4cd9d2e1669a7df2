//! Telegram front end
//!
//! Translates teloxide updates into [`InboundEvent`]s for the core and sends
//! the replies back. Also provides the platform media API and the outbound
//! notifier the core is built on.
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{InputFile, Update},
};

use crate::acquire::{FileAcquisition, MediaApi};
use crate::activity::{ActivitySink, SqliteActivityLog};
use crate::config::Config;
use crate::error::{BotError, BotResult};
use crate::handler::{BotCore, CoreDeps, EventKind, InboundEvent, Notifier};
use crate::kml::Coordinate;
use crate::mode::{ModeStore, UserId};
use crate::storage::UserStorage;
use crate::users::SqliteUserDirectory;

/// `getFile` plus the Bot API file download URL
pub struct TelegramMediaApi {
    bot: Bot,
    api_url: String,
    token: String,
}

impl TelegramMediaApi {
    pub fn new(bot: Bot, api_url: &str, token: &str) -> Self {
        Self {
            bot,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn file_path(&self, media_ref: &str) -> BotResult<String> {
        let file = self
            .bot
            .get_file(media_ref)
            .await
            .map_err(|e| {
                BotError::acquisition(media_ref, format!("getFile failed: {}", e))
            })?;
        Ok(file.path)
    }
}

#[async_trait]
impl MediaApi for TelegramMediaApi {
    async fn get_file_metadata(&self, media_ref: &str) -> BotResult<String> {
        self.file_path(media_ref).await
    }

    async fn resolve_download_url(&self, media_ref: &str) -> BotResult<String> {
        let path = self.file_path(media_ref).await?;
        Ok(format!("{}/file/bot{}/{}", self.api_url, self.token, path))
    }
}

/// Private chats share the user's id, so users are addressed by chat id
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: UserId, text: &str) -> BotResult<()> {
        self.bot
            .send_message(ChatId(user_id), text)
            .await
            .map_err(|e| BotError::TransientDependency(format!("sendMessage: {}", e)))?;
        Ok(())
    }
}

/// Run the bot until Ctrl-C, then stop background tasks
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let mut bot = Bot::new(config.bot_token.clone());
    if config.api_url != "https://api.telegram.org" {
        let url = reqwest::Url::parse(&config.api_url)
            .with_context(|| format!("invalid TELEGRAM_API_URL {}", config.api_url))?;
        bot = bot.set_api_url(url);
        tracing::info!("Using Bot API server at {}", config.api_url);
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let directory = Arc::new(
        SqliteUserDirectory::open(&config.db_path).context("opening user directory")?,
    );
    for admin in &config.admins {
        directory.seed_admin(*admin)?;
    }
    tracing::info!("Seeded {} admin(s)", config.admins.len());

    let activity_log =
        Arc::new(SqliteActivityLog::open(&config.db_path).context("opening activity log")?);
    let activity = ActivitySink::new(config.activity_buffer);
    let activity_writer = activity.spawn_writer(activity_log);

    let modes = ModeStore::new(config.sessions.clone());

    let media_api = Arc::new(TelegramMediaApi::new(
        bot.clone(),
        &config.api_url,
        &config.bot_token,
    ));
    let acquirer = Arc::new(FileAcquisition::new(media_api, config.acquire.clone()));

    let core = Arc::new(BotCore::new(CoreDeps {
        modes,
        directory,
        acquirer,
        notifier: Arc::new(TelegramNotifier::new(bot.clone())),
        storage: UserStorage::new(&config.data_dir),
        activity,
        queue: config.queue.clone(),
        admins: config.admins.clone(),
    }));

    // Queue state of evicted users goes with their session
    let sweeper = {
        let sessions = Arc::clone(core.modes());
        let core = Arc::clone(&core);
        sessions.spawn_sweeper_with(move || {
            core.prune_idle();
        })
    };

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![core])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped, shutting down background tasks");
    sweeper.shutdown().await;
    activity_writer.shutdown().await;
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, core: Arc<BotCore>) -> ResponseResult<()> {
    let Some(event) = inbound_event(&msg) else {
        tracing::debug!("Ignoring message {} without sender or content", msg.id.0);
        return Ok(());
    };
    tracing::info!(
        ">>> Message received: user={}, chat={}, kind={}",
        event.user_id,
        msg.chat.id.0,
        event_label(&event.kind)
    );

    let reply = core.handle(event).await;

    if let Some(text) = reply.text {
        bot.send_message(msg.chat.id, text).await?;
    }
    if let Some(path) = reply.document {
        bot.send_document(msg.chat.id, InputFile::file(path)).await?;
    }
    Ok(())
}

fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let kind = if let Some(text) = msg.text() {
        EventKind::Text(text.to_string())
    } else if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        // Largest size comes last
        EventKind::Photo {
            media_ref: photo.file.id.clone(),
            unique_id: photo.file.unique_id.clone(),
        }
    } else if let Some(doc) = msg.document().filter(|d| {
        d.mime_type
            .as_ref()
            .is_some_and(|m| m.essence_str().starts_with("image/"))
    }) {
        // Photos sent "as file" keep full resolution
        EventKind::Photo {
            media_ref: doc.file.id.clone(),
            unique_id: doc.file.unique_id.clone(),
        }
    } else if let Some(location) = msg.location() {
        EventKind::Location(Coordinate::new(location.latitude, location.longitude))
    } else {
        return None;
    };

    Some(InboundEvent {
        user_id: user.id.0 as UserId,
        username: user.username.clone(),
        kind,
    })
}

fn event_label(kind: &EventKind) -> String {
    match kind {
        EventKind::Text(text) => format!("{:?}", text.chars().take(50).collect::<String>()),
        EventKind::Photo { .. } => "<photo>".to_string(),
        EventKind::Location(c) => format!("<location {:.5},{:.5}>", c.latitude, c.longitude),
    }
}
