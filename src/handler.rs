//! Event dispatch
//!
//! Inbound event -> entitlement gate -> mode dispatch. Commands may change
//! the user's mode or act on a feature's accumulator directly; photos and
//! locations are routed by the current mode through an exhaustive match, so
//! adding a mode forces every routing table below to handle it.

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::acquire::MediaAcquirer;
use crate::activity::ActivitySink;
use crate::commands::Command;
use crate::error::{BotError, BotResult};
use crate::kml::{Coordinate, KmlStore, PointOutcome};
use crate::location::LocationLog;
use crate::mode::{Mode, ModeState, ModeStore, UserId};
use crate::permissions::{Access, EntitlementGate, RequestContext};
use crate::queue::{
    IngestionQueue, ProgressNotice, ProgressSink, QueueConfig, QueueTask, TaskExecutor,
};
use crate::storage::{sanitize_file_name, UserStorage};
use crate::users::{Feature, SqliteUserDirectory, UserDirectory};
use crate::workbook::WorkbookStore;

/// Outbound messages that are not a direct reply (progress, admin notices)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: UserId, text: &str) -> BotResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Text(String),
    Photo { media_ref: String, unique_id: String },
    Location(Coordinate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub username: Option<String>,
    pub kind: EventKind,
}

/// Reply to an inbound event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: Option<String>,
    /// File to send along, e.g. a KML export
    pub document: Option<PathBuf>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            document: None,
        }
    }

    /// Queued photos are acknowledged only through progress notices
    pub fn silent() -> Self {
        Self::default()
    }
}

/// Forwards queue progress to the user's chat
struct NotifyProgress(Arc<dyn Notifier>);

#[async_trait]
impl ProgressSink for NotifyProgress {
    async fn notify(&self, user_id: UserId, notice: ProgressNotice) {
        if let Err(e) = self.0.send(user_id, &notice.message()).await {
            warn!("Failed to send progress to user {}: {}", user_id, e);
        }
    }
}

/// Per-item completion for queue-consuming modes
struct FeatureExecutor {
    acquirer: Arc<dyn MediaAcquirer>,
    storage: UserStorage,
    workbooks: Arc<WorkbookStore>,
}

#[async_trait]
impl TaskExecutor for FeatureExecutor {
    async fn execute(&self, task: &QueueTask) -> BotResult<()> {
        match task.consumer {
            Mode::Workbook => {
                let (dir, file_name) = task.target_name.split_once('/').ok_or_else(|| {
                    BotError::invalid(format!("Malformed workbook target {}", task.target_name))
                })?;
                let path = self.workbooks.photo_path(task.owner, dir, file_name);
                self.acquirer.acquire(&task.media_ref, &path).await?;
                let count = self
                    .workbooks
                    .update(task.owner, |wb| wb.record_photo(dir, file_name))
                    .await?;
                debug!("Sheet {} of user {} now has {} photos", dir, task.owner, count);
                Ok(())
            }
            Mode::Archive => {
                let dir = self
                    .storage
                    .ensure_user_feature_dir(task.owner, Feature::Archive)
                    .await?;
                self.acquirer
                    .acquire(&task.media_ref, &dir.join(&task.target_name))
                    .await?;
                Ok(())
            }
            Mode::Idle | Mode::Ocr | Mode::Location | Mode::Geotags | Mode::Kml => Err(
                BotError::invalid(format!("{} mode does not take queued photos", task.consumer)),
            ),
        }
    }
}

/// Collaborators wired in by the binary (or a test)
pub struct CoreDeps {
    pub modes: Arc<ModeStore>,
    pub directory: Arc<SqliteUserDirectory>,
    pub acquirer: Arc<dyn MediaAcquirer>,
    pub notifier: Arc<dyn Notifier>,
    pub storage: UserStorage,
    pub activity: Arc<ActivitySink>,
    pub queue: QueueConfig,
    pub admins: Vec<UserId>,
}

pub struct BotCore {
    modes: Arc<ModeStore>,
    gate: EntitlementGate,
    directory: Arc<SqliteUserDirectory>,
    queue: Arc<IngestionQueue>,
    acquirer: Arc<dyn MediaAcquirer>,
    storage: UserStorage,
    kml: KmlStore,
    workbooks: Arc<WorkbookStore>,
    locations: LocationLog,
    activity: Arc<ActivitySink>,
    notifier: Arc<dyn Notifier>,
    admins: Vec<UserId>,
}

impl BotCore {
    pub fn new(deps: CoreDeps) -> Self {
        let workbooks = Arc::new(WorkbookStore::new(deps.storage.clone()));
        let executor = Arc::new(FeatureExecutor {
            acquirer: Arc::clone(&deps.acquirer),
            storage: deps.storage.clone(),
            workbooks: Arc::clone(&workbooks),
        });
        let queue = IngestionQueue::new(
            executor,
            Arc::new(NotifyProgress(Arc::clone(&deps.notifier))),
            deps.queue,
        );
        let lookup: Arc<dyn UserDirectory> = deps.directory.clone();

        Self {
            modes: deps.modes,
            gate: EntitlementGate::new(lookup),
            directory: deps.directory,
            queue,
            acquirer: deps.acquirer,
            kml: KmlStore::new(deps.storage.clone()),
            locations: LocationLog::new(deps.storage.clone()),
            storage: deps.storage,
            workbooks,
            activity: deps.activity,
            notifier: deps.notifier,
            admins: deps.admins,
        }
    }

    pub fn modes(&self) -> &Arc<ModeStore> {
        &self.modes
    }

    pub fn queue(&self) -> &Arc<IngestionQueue> {
        &self.queue
    }

    /// Drop idle queue state of users whose session is gone
    pub fn prune_idle(&self) -> usize {
        let pruned = self.queue.prune(|user| self.modes.has_session(user));
        if pruned > 0 {
            debug!("Pruned {} idle ingestion queues", pruned);
        }
        pruned
    }

    /// Handle one inbound event; always records an activity entry
    pub async fn handle(&self, event: InboundEvent) -> Reply {
        let user_id = event.user_id;
        let (action, result) = match event.kind {
            EventKind::Text(text) => match Command::parse(&text) {
                None => ("text", Ok(self.text_hint(user_id))),
                Some(Err(e)) => ("command", Err(BotError::invalid(e.0))),
                Some(Ok(cmd)) => (
                    cmd.name(),
                    self.run_command(user_id, event.username.as_deref(), cmd)
                        .await,
                ),
            },
            EventKind::Photo {
                media_ref,
                unique_id,
            } => ("photo", self.on_photo(user_id, &media_ref, &unique_id).await),
            EventKind::Location(coordinate) => {
                ("location", self.on_location(user_id, coordinate).await)
            }
        };

        let mode = self.modes.get_mode(user_id);
        match result {
            Ok(reply) => {
                self.activity.record(user_id, action, mode, true, None);
                reply
            }
            Err(e) => {
                if e.is_rejection() {
                    debug!("Rejected {} from user {}: {}", action, user_id, e);
                } else {
                    warn!("{} from user {} failed: {}", action, user_id, e);
                }
                self.activity
                    .record(user_id, action, mode, false, Some(e.to_string()));
                Reply::text(e.user_message())
            }
        }
    }

    fn text_hint(&self, user_id: UserId) -> Reply {
        let hint = match self.modes.get_mode(user_id) {
            Mode::Idle => "Choose a feature to start. Send /help for the list of commands.",
            Mode::Ocr | Mode::Geotags | Mode::Archive => {
                "Send photos, or /reset to leave this mode."
            }
            Mode::Workbook => "Send photos for the open sheet, or /sheets to see your sheets.",
            Mode::Kml => "Share a location to add a point. /kmlstatus shows what you have.",
            Mode::Location => "Share your location to record it, or /reset to stop.",
        };
        Reply::text(hint)
    }

    async fn run_command(
        &self,
        user_id: UserId,
        username: Option<&str>,
        cmd: Command,
    ) -> BotResult<Reply> {
        let ctx = self.gate.authorize(user_id, cmd.access()).await?;

        if let Some(required) = cmd.required_mode() {
            let current = self.modes.get_mode(user_id);
            if current != required {
                return Err(BotError::invalid(format!(
                    "{} only works in {} mode (you are in {} mode). Send /{} first.",
                    cmd.name(),
                    required,
                    current,
                    required
                )));
            }
        }

        match cmd {
            Command::Start => Ok(Reply::text(self.welcome(&ctx))),
            Command::Help => Ok(Reply::text(help_text(&ctx))),
            Command::Register => self.register(&ctx, username).await,
            Command::Status => Ok(Reply::text(self.status(user_id))),
            Command::Reset => {
                let dropped = self.reset(user_id);
                let mut text = "Mode cleared, back to idle.".to_string();
                if dropped > 0 {
                    text.push_str(&format!(" {} queued photo(s) were dropped.", dropped));
                }
                Ok(Reply::text(text))
            }
            Command::Enter(mode) => self.enter_mode(user_id, mode).await,

            Command::AddPoint(Some(name)) => {
                self.kml
                    .update(user_id, |acc| {
                        acc.queue_next_name(&name);
                        Ok(())
                    })
                    .await?;
                Ok(Reply::text(format!(
                    "Next point will be named {}. Share a location to place it.",
                    name
                )))
            }
            Command::AddPoint(None) => {
                let acc = self.kml.load(user_id).await?;
                Ok(Reply::text(match &acc.active_line {
                    Some(line) => format!("Share a location to extend line {}.", line.name),
                    None => "Share a location to add a point.".to_string(),
                }))
            }
            Command::StartLine(name) => {
                self.kml.update(user_id, |acc| acc.start_line(&name)).await?;
                Ok(Reply::text(format!(
                    "Line {} started. Share locations along it, then /endline.",
                    name
                )))
            }
            Command::EndLine => {
                let line = self.kml.update(user_id, |acc| acc.end_line()).await?;
                Ok(Reply::text(format!(
                    "Line {} saved with {} points.",
                    line.name,
                    line.points.len()
                )))
            }
            Command::CancelLine => {
                let line = self.kml.update(user_id, |acc| acc.cancel_line()).await?;
                Ok(Reply::text(format!(
                    "Line {} discarded ({} points).",
                    line.name,
                    line.points.len()
                )))
            }
            Command::DefaultName(name) => {
                self.kml
                    .update(user_id, |acc| {
                        acc.set_default_name(name.as_deref());
                        Ok(())
                    })
                    .await?;
                Ok(Reply::text(match name {
                    Some(name) => format!("Unnamed points will be called {}.", name),
                    None => "Default point name cleared.".to_string(),
                }))
            }
            Command::KmlStatus => Ok(Reply::text(self.kml.load(user_id).await?.summary())),
            Command::KmlExport => {
                let acc = self.kml.load(user_id).await?;
                if acc.points.is_empty() && acc.lines.is_empty() {
                    return Err(BotError::invalid(
                        "Nothing to export yet. Add points or finish a line first.",
                    ));
                }
                let path = self
                    .kml
                    .export(user_id)
                    .await
                    .map_err(|e| BotError::Storage(std::io::Error::other(format!("{:#}", e))))?;
                Ok(Reply {
                    text: Some(format!(
                        "Exported {} point(s) and {} line(s).",
                        acc.points.len(),
                        acc.lines.len()
                    )),
                    document: Some(path),
                })
            }
            Command::KmlClear => {
                self.kml.clear(user_id).await?;
                Ok(Reply::text("KML points and lines cleared."))
            }

            Command::Sheet(name) => {
                let sheet = self
                    .workbooks
                    .update(user_id, |wb| wb.open_sheet(&name).map(|s| s.name.clone()))
                    .await?;
                Ok(Reply::text(format!(
                    "Sheet {} opened. Send photos; I will report progress as they are stored.",
                    sheet
                )))
            }
            Command::CloseSheet => {
                // The worker may hold this sheet's last photo even with nothing pending
                let in_flight = self.queue.stats(user_id).is_draining;
                let sheet = self
                    .workbooks
                    .update(user_id, |wb| wb.close_sheet(in_flight))
                    .await?;
                let text = if in_flight {
                    format!(
                        "Sheet {} closed with {} photo(s) so far. Photos still in the queue will be added to it.",
                        sheet.name,
                        sheet.photos.len()
                    )
                } else if sheet.photos.is_empty() {
                    format!("Sheet {} was empty and has been discarded.", sheet.name)
                } else {
                    format!("Sheet {} closed with {} photo(s).", sheet.name, sheet.photos.len())
                };
                Ok(Reply::text(text))
            }
            Command::Sheets => Ok(Reply::text(self.workbooks.load(user_id).await?.summary())),

            Command::Done => {
                let stored = self
                    .storage
                    .count_media_files(user_id, Feature::Archive)
                    .await?;
                let stats = self.queue.stats(user_id);
                let mut text = format!("Archive holds {} file(s).", stored);
                if stats.pending > 0 {
                    text.push_str(&format!(" {} photo(s) are still queued.", stats.pending));
                }
                if stats.errors > 0 {
                    text.push_str(&format!(" {} photo(s) failed to download.", stats.errors));
                }
                Ok(Reply::text(text))
            }

            Command::Grant { user_id: target, feature } => {
                if !self.directory.grant(target, feature)? {
                    return Err(BotError::invalid(format!("Unknown user {}.", target)));
                }
                self.gate.invalidate(target).await;
                info!("User {} granted {} to {}", user_id, feature, target);
                self.notify(
                    target,
                    &format!("You now have access to {}. Send /{} to start.", feature, feature),
                )
                .await;
                Ok(Reply::text(format!("Granted {} to user {}.", feature, target)))
            }
            Command::Revoke { user_id: target, feature } => {
                if !self.directory.revoke(target, feature)? {
                    return Err(BotError::invalid(format!(
                        "User {} does not have {}.",
                        target, feature
                    )));
                }
                self.gate.invalidate(target).await;
                if self.modes.session(target).and_then(|s| s.mode.feature()) == Some(feature) {
                    self.reset(target);
                }
                info!("User {} revoked {} from {}", user_id, feature, target);
                Ok(Reply::text(format!("Revoked {} from user {}.", feature, target)))
            }
            Command::Activate(target) => {
                if !self.directory.set_active(target, true)? {
                    return Err(BotError::invalid(format!("Unknown user {}.", target)));
                }
                self.gate.invalidate(target).await;
                self.notify(target, "Your account has been activated. Send /help to get started.")
                    .await;
                Ok(Reply::text(format!("User {} activated.", target)))
            }
            Command::Users => {
                let users = self.directory.list_users()?;
                if users.is_empty() {
                    return Ok(Reply::text("No registered users."));
                }
                let lines: Vec<String> = users
                    .iter()
                    .map(|u| {
                        let features: Vec<&str> =
                            u.granted_features.iter().map(|f| f.as_str()).collect();
                        format!(
                            "{} {} [{}{}] {}",
                            u.user_id,
                            u.username.as_deref().unwrap_or("-"),
                            u.role.as_str(),
                            if u.is_active { "" } else { ", inactive" },
                            if features.is_empty() {
                                "no features".to_string()
                            } else {
                                features.join(", ")
                            }
                        )
                    })
                    .collect();
                Ok(Reply::text(lines.join("\n")))
            }
            Command::Enable(feature) => {
                self.directory.set_feature_enabled(feature, true)?;
                Ok(Reply::text(format!("Feature {} enabled.", feature)))
            }
            Command::Disable(feature) => {
                self.directory.set_feature_enabled(feature, false)?;
                Ok(Reply::text(format!("Feature {} disabled.", feature)))
            }
        }
    }

    fn welcome(&self, ctx: &RequestContext) -> String {
        match &ctx.user {
            Some(user) if user.is_active => format!(
                "Welcome back, {}. You are in {} mode. Send /help for commands.",
                ctx.display_name(),
                self.modes.get_mode(ctx.user_id)
            ),
            Some(_) => "Your registration is waiting for an admin to activate it.".to_string(),
            None => "Welcome! This bot collects field photos, locations and KML tracks.\n\
                     Send /register to request access."
                .to_string(),
        }
    }

    async fn register(&self, ctx: &RequestContext, username: Option<&str>) -> BotResult<Reply> {
        if let Some(user) = &ctx.user {
            return Ok(Reply::text(if user.is_active {
                "You are already registered."
            } else {
                "You are already registered; an admin still needs to activate your account."
            }));
        }

        if !self.directory.register(ctx.user_id, username)? {
            return Ok(Reply::text("You are already registered."));
        }
        info!("New registration from user {}", ctx.user_id);
        let notice = format!(
            "New registration: {} ({}). Activate with /activate {}",
            username.unwrap_or("-"),
            ctx.user_id,
            ctx.user_id
        );
        for admin in &self.admins {
            self.notify(*admin, &notice).await;
        }
        Ok(Reply::text(
            "Registration received. An admin will activate your account.",
        ))
    }

    fn status(&self, user_id: UserId) -> String {
        let stats = self.queue.stats(user_id);
        let mut out = match self.modes.session(user_id) {
            Some(s) => format!("Mode: {} (idle for {}s)", s.mode, s.idle_for.as_secs()),
            None => "Mode: idle".to_string(),
        };
        if stats.consumer.is_some() || stats.is_draining {
            out.push_str(&format!(
                "\nQueue: {} pending, {} processed, {} failed{}",
                stats.pending,
                stats.processed,
                stats.errors,
                if stats.is_draining { " (working)" } else { "" }
            ));
        }
        out
    }

    /// Leave the current mode; pending queue items are dropped, an
    /// in-flight item still finishes. Returns dropped item count.
    fn reset(&self, user_id: UserId) -> usize {
        let dropped = self.queue.clear(user_id);
        if let Some(previous) = self.modes.clear_mode(user_id) {
            debug!("User {} left {} mode", user_id, previous);
        }
        dropped
    }

    async fn enter_mode(&self, user_id: UserId, mode: Mode) -> BotResult<Reply> {
        let mut initial = ModeState::new();
        initial.insert("entered_at".into(), json!(chrono::Utc::now().timestamp()));
        let previous = self.modes.set_mode(user_id, mode, Some(initial));

        if previous.consumes_queue() && previous != mode {
            self.queue.clear(user_id);
        }
        if mode.consumes_queue() {
            self.queue.open(user_id, mode);
        }
        info!("User {} entered {} mode", user_id, mode);

        let text = match mode {
            Mode::Idle => "Back to idle.".to_string(),
            Mode::Ocr => "OCR mode. Send photos of the documents to read.".to_string(),
            Mode::Geotags => "Geotags mode. Send photos to tag with their location.".to_string(),
            Mode::Archive => {
                "Archive mode. Send photos; send /done to see how many are stored.".to_string()
            }
            Mode::Location => "Location mode. Share your location to record it.".to_string(),
            Mode::Kml => format!(
                "KML mode. Share locations to add points, /startline <name> to trace a line.\n{}",
                self.kml.load(user_id).await?.summary()
            ),
            Mode::Workbook => format!(
                "Workbook mode. Open a sheet with /sheet <name>, then send photos.\n{}",
                self.workbooks.load(user_id).await?.summary()
            ),
        };
        Ok(Reply::text(text))
    }

    async fn on_photo(
        &self,
        user_id: UserId,
        media_ref: &str,
        unique_id: &str,
    ) -> BotResult<Reply> {
        let mode = self.modes.get_mode(user_id);
        self.authorize_for_mode(user_id, mode).await?;
        let file_name = photo_file_name(unique_id);

        match mode {
            Mode::Idle => Err(BotError::invalid(
                "Choose a feature first, e.g. /workbook or /archive. Send /help for the list.",
            )),
            Mode::Ocr | Mode::Geotags => {
                self.store_direct(user_id, mode, media_ref, &file_name).await
            }
            Mode::Archive => {
                self.queue
                    .enqueue(QueueTask::new(user_id, mode, media_ref, &file_name))?;
                Ok(Reply::silent())
            }
            Mode::Workbook => {
                let dir = self.workbooks.load(user_id).await?.active_dir()?.to_string();
                self.queue.enqueue(QueueTask::new(
                    user_id,
                    mode,
                    media_ref,
                    &format!("{}/{}", dir, file_name),
                ))?;
                Ok(Reply::silent())
            }
            Mode::Kml | Mode::Location => Err(BotError::invalid(format!(
                "{} mode records locations, not photos. Share a location or /reset.",
                mode
            ))),
        }
    }

    async fn on_location(&self, user_id: UserId, coordinate: Coordinate) -> BotResult<Reply> {
        let mode = self.modes.get_mode(user_id);
        self.authorize_for_mode(user_id, mode).await?;

        match mode {
            Mode::Idle => Err(BotError::invalid(
                "Choose /kml or /location first to record locations.",
            )),
            Mode::Kml => {
                let outcome = self
                    .kml
                    .update(user_id, |acc| Ok(acc.add_point(coordinate, None)))
                    .await?;
                Ok(Reply::text(match outcome {
                    PointOutcome::Standalone(point) => format!(
                        "Point {} saved at {:.6}, {:.6}.",
                        point.name, point.coordinate.latitude, point.coordinate.longitude
                    ),
                    PointOutcome::Vertex { line, count } => {
                        format!("Added point {} to line {}.", count, line)
                    }
                }))
            }
            Mode::Location => {
                let count = self.locations.append(user_id, coordinate).await?;
                Ok(Reply::text(format!("Location recorded ({} so far).", count)))
            }
            Mode::Ocr | Mode::Archive | Mode::Geotags | Mode::Workbook => {
                Err(BotError::invalid(format!(
                    "{} mode takes photos, not locations. Send /kml or /location to record locations.",
                    mode
                )))
            }
        }
    }

    /// Media events are gated on the feature of the mode they land in
    async fn authorize_for_mode(&self, user_id: UserId, mode: Mode) -> BotResult<RequestContext> {
        let access = mode.feature().map(Access::Feature).unwrap_or(Access::Registered);
        self.gate.authorize(user_id, access).await
    }

    /// OCR and Geotags store each photo right away
    async fn store_direct(
        &self,
        user_id: UserId,
        mode: Mode,
        media_ref: &str,
        file_name: &str,
    ) -> BotResult<Reply> {
        let feature = mode
            .feature()
            .ok_or_else(|| BotError::invalid("Choose a feature first."))?;
        let dir = self.storage.ensure_user_feature_dir(user_id, feature).await?;
        let acquired = self.acquirer.acquire(media_ref, &dir.join(file_name)).await?;

        let count = self
            .modes
            .state(user_id)
            .get("photos")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        let mut patch = ModeState::new();
        patch.insert("photos".into(), json!(count));
        patch.insert("last_file".into(), json!(file_name));
        self.modes.update_state(user_id, patch);

        Ok(Reply::text(format!(
            "Saved {} ({} KB). {} photo(s) this session.",
            file_name,
            acquired.bytes.div_ceil(1024),
            count
        )))
    }

    async fn notify(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.notifier.send(user_id, text).await {
            warn!("Failed to notify user {}: {}", user_id, e);
        }
    }
}

fn help_text(ctx: &RequestContext) -> String {
    let mut out = String::from("Commands:\n/start /help /register /status /reset");
    let Some(user) = ctx.user.as_ref().filter(|u| u.is_active) else {
        return out;
    };

    for feature in &user.granted_features {
        let line = match feature {
            Feature::Ocr => "/ocr - read text from photos",
            Feature::Geotags => "/geotags - store geotagged photos",
            Feature::Archive => "/archive - collect photos, /done to finish",
            Feature::Location => "/location - record shared locations",
            Feature::Kml => {
                "/kml - points and lines: /addpoint [\"name\"], /startline <name>, /endline, \
                 /cancelline, /defaultname [name], /kmlstatus, /kmlexport, /kmlclear"
            }
            Feature::Workbook => {
                "/workbook - photo sheets: /sheet <name>, /closesheet, /sheets"
            }
        };
        out.push('\n');
        out.push_str(line);
    }

    if user.is_admin() {
        out.push_str(
            "\nAdmin: /users, /activate <id>, /grant <id> <feature>, /revoke <id> <feature>, \
             /enable <feature>, /disable <feature>",
        );
    }
    out
}

fn photo_file_name(unique_id: &str) -> String {
    format!(
        "photo_{}_{}.jpg",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        sanitize_file_name(unique_id)
    )
}
