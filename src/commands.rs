//! Slash command parsing
//!
//! Commands are parsed up front into [`Command`] so that the gate can look
//! up the access requirement before any handler runs.

use crate::mode::{Mode, UserId};
use crate::permissions::Access;
use crate::users::Feature;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Public
    Start,
    Help,
    Register,

    // Any active user
    Status,
    Reset,

    /// Enter a feature mode (`/ocr`, `/kml`, ...)
    Enter(Mode),

    // KML
    AddPoint(Option<String>),
    StartLine(String),
    EndLine,
    CancelLine,
    DefaultName(Option<String>),
    KmlStatus,
    KmlExport,
    KmlClear,

    // Workbook
    Sheet(String),
    CloseSheet,
    Sheets,

    // Archive
    Done,

    // Admin
    Grant { user_id: UserId, feature: Feature },
    Revoke { user_id: UserId, feature: Feature },
    Activate(UserId),
    Users,
    Enable(Feature),
    Disable(Feature),
}

/// Parse failure, carries the text shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl Command {
    /// `None` if `text` is not a command at all
    pub fn parse(text: &str) -> Option<Result<Command, ParseError>> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let parts: Vec<&str> = text.splitn(2, char::is_whitespace).collect();
        // "/kml@field_bot" in group chats
        let cmd = parts[0].split('@').next().unwrap_or(parts[0]).to_lowercase();
        let args = parts.get(1).map(|a| a.trim()).unwrap_or("");

        let parsed = match cmd.as_str() {
            "/start" => Ok(Self::Start),
            "/help" => Ok(Self::Help),
            "/register" => Ok(Self::Register),
            "/status" => Ok(Self::Status),
            "/reset" | "/cancel" => Ok(Self::Reset),

            "/ocr" => Ok(Self::Enter(Mode::Ocr)),
            "/archive" => Ok(Self::Enter(Mode::Archive)),
            "/location" => Ok(Self::Enter(Mode::Location)),
            "/geotags" => Ok(Self::Enter(Mode::Geotags)),
            "/kml" => Ok(Self::Enter(Mode::Kml)),
            "/workbook" => Ok(Self::Enter(Mode::Workbook)),

            "/addpoint" => Ok(Self::AddPoint(optional(unquote(args)))),
            "/startline" => required(unquote(args), "/startline <name>").map(Self::StartLine),
            "/endline" => Ok(Self::EndLine),
            "/cancelline" => Ok(Self::CancelLine),
            "/defaultname" => Ok(Self::DefaultName(optional(unquote(args)))),
            "/kmlstatus" => Ok(Self::KmlStatus),
            "/kmlexport" => Ok(Self::KmlExport),
            "/kmlclear" => Ok(Self::KmlClear),

            "/sheet" => required(unquote(args), "/sheet <name>").map(Self::Sheet),
            "/closesheet" => Ok(Self::CloseSheet),
            "/sheets" => Ok(Self::Sheets),

            "/done" => Ok(Self::Done),

            "/grant" => user_and_feature(args, "/grant <user_id> <feature>")
                .map(|(user_id, feature)| Self::Grant { user_id, feature }),
            "/revoke" => user_and_feature(args, "/revoke <user_id> <feature>")
                .map(|(user_id, feature)| Self::Revoke { user_id, feature }),
            "/activate" => user_id(args, "/activate <user_id>").map(Self::Activate),
            "/users" => Ok(Self::Users),
            "/enable" => feature(args, "/enable <feature>").map(Self::Enable),
            "/disable" => feature(args, "/disable <feature>").map(Self::Disable),

            other => Err(ParseError(format!(
                "Unknown command {}. Send /help for the list of commands.",
                other
            ))),
        };
        Some(parsed)
    }

    /// Access requirement checked by the gate
    pub fn access(&self) -> Access {
        match self {
            Self::Start | Self::Help | Self::Register => Access::Public,
            Self::Status | Self::Reset => Access::Registered,
            Self::Enter(mode) => match mode.feature() {
                Some(f) => Access::Feature(f),
                None => Access::Registered,
            },
            Self::AddPoint(_)
            | Self::StartLine(_)
            | Self::EndLine
            | Self::CancelLine
            | Self::DefaultName(_)
            | Self::KmlStatus
            | Self::KmlExport
            | Self::KmlClear => Access::Feature(Feature::Kml),
            Self::Sheet(_) | Self::CloseSheet | Self::Sheets => Access::Feature(Feature::Workbook),
            Self::Done => Access::Feature(Feature::Archive),
            Self::Grant { .. }
            | Self::Revoke { .. }
            | Self::Activate(_)
            | Self::Users
            | Self::Enable(_)
            | Self::Disable(_) => Access::Admin,
        }
    }

    /// Mode the user must be in for the command to apply
    pub fn required_mode(&self) -> Option<Mode> {
        match self {
            Self::AddPoint(_)
            | Self::StartLine(_)
            | Self::EndLine
            | Self::CancelLine
            | Self::DefaultName(_) => Some(Mode::Kml),
            Self::Sheet(_) | Self::CloseSheet => Some(Mode::Workbook),
            Self::Done => Some(Mode::Archive),
            _ => None,
        }
    }

    /// Short name used in activity records
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::Help => "/help",
            Self::Register => "/register",
            Self::Status => "/status",
            Self::Reset => "/reset",
            Self::Enter(_) => "/enter",
            Self::AddPoint(_) => "/addpoint",
            Self::StartLine(_) => "/startline",
            Self::EndLine => "/endline",
            Self::CancelLine => "/cancelline",
            Self::DefaultName(_) => "/defaultname",
            Self::KmlStatus => "/kmlstatus",
            Self::KmlExport => "/kmlexport",
            Self::KmlClear => "/kmlclear",
            Self::Sheet(_) => "/sheet",
            Self::CloseSheet => "/closesheet",
            Self::Sheets => "/sheets",
            Self::Done => "/done",
            Self::Grant { .. } => "/grant",
            Self::Revoke { .. } => "/revoke",
            Self::Activate(_) => "/activate",
            Self::Users => "/users",
            Self::Enable(_) => "/enable",
            Self::Disable(_) => "/disable",
        }
    }
}

/// Strip one pair of surrounding straight or curly double quotes
fn unquote(arg: &str) -> &str {
    let arg = arg.trim();
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        if let Some(inner) = arg.strip_prefix(open).and_then(|a| a.strip_suffix(close)) {
            return inner.trim();
        }
    }
    arg
}

fn optional(arg: &str) -> Option<String> {
    (!arg.is_empty()).then(|| arg.to_string())
}

fn required(arg: &str, usage: &str) -> Result<String, ParseError> {
    optional(arg).ok_or_else(|| ParseError(format!("Usage: {}", usage)))
}

fn user_id(arg: &str, usage: &str) -> Result<UserId, ParseError> {
    arg.trim()
        .parse()
        .map_err(|_| ParseError(format!("Usage: {}", usage)))
}

fn feature(arg: &str, usage: &str) -> Result<Feature, ParseError> {
    arg.trim().parse().map_err(|e: String| {
        ParseError(format!("{}\nUsage: {}", e, usage))
    })
}

fn user_and_feature(args: &str, usage: &str) -> Result<(UserId, Feature), ParseError> {
    let mut parts = args.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(user), Some(f), None) => Ok((user_id(user, usage)?, feature(f, usage)?)),
        _ => Err(ParseError(format!("Usage: {}", usage))),
    }
}
