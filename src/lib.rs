//! fieldbot
//!
//! Telegram bot for field survey work: photo collection into workbook
//! sheets and archives, OCR and geotag intake, location logging and KML
//! point/line capture.
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► telegram (teloxide) ──► handler::BotCore
//!                                        │
//!                                        ├── permissions (guard chain, moka cache)
//!                                        ├── mode        (per-user session store)
//!                                        ├── queue       (per-user ingestion queue)
//!                                        │     └── acquire (local copy / download)
//!                                        ├── kml, workbook, location (accumulators)
//!                                        ├── storage     (per-user JSON + media)
//!                                        └── activity    (bounded audit sink → SQLite)
//! ```

pub mod acquire;
pub mod activity;
pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod kml;
pub mod location;
pub mod mode;
pub mod permissions;
pub mod queue;
pub mod storage;
pub mod telegram;
pub mod users;
pub mod workbook;

pub use acquire::{AcquireConfig, Acquired, FileAcquisition, MediaAcquirer, MediaApi};
pub use activity::{ActivityEvent, ActivitySink, ActivityStore, SqliteActivityLog};
pub use commands::Command;
pub use config::Config;
pub use error::{BotError, BotResult};
pub use handler::{BotCore, CoreDeps, EventKind, InboundEvent, Notifier, Reply};
pub use kml::{Coordinate, KmlAccumulator, KmlStore};
pub use mode::{Mode, ModeState, ModeStore, ModeStoreConfig, UserId};
pub use permissions::{Access, EntitlementGate, RequestContext};
pub use queue::{
    IngestionQueue, ProgressNotice, ProgressSink, QueueConfig, QueueStats, QueueTask, TaskExecutor,
};
pub use storage::UserStorage;
pub use users::{Feature, Role, SqliteUserDirectory, UserDirectory, UserRecord};
pub use workbook::{WorkbookState, WorkbookStore};
