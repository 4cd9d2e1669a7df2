//! Error taxonomy for the bot core
//!
//! Rejections (authorization, state transitions) carry the exact text the
//! user sees. Infrastructure errors are fatal for one operation only.

/// Result alias used across the core
pub type BotResult<T> = std::result::Result<T, BotError>;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// A guard rejected the request
    #[error("Authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    /// Both acquisition paths failed or produced an empty file
    #[error("Media acquisition failed for {media_ref}: {reason}")]
    MediaAcquisitionFailed { media_ref: String, reason: String },

    /// Command not legal in the current accumulator state
    #[error("{0}")]
    InvalidStateTransition(String),

    /// Entitlement lookup or audit sink unreachable
    #[error("Dependency unavailable: {0}")]
    TransientDependency(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl BotError {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            reason: reason.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidStateTransition(message.into())
    }

    pub fn acquisition(media_ref: &str, reason: impl Into<String>) -> Self {
        Self::MediaAcquisitionFailed {
            media_ref: media_ref.to_string(),
            reason: reason.into(),
        }
    }

    /// Rejections the user caused, as opposed to faults on our side
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationDenied { .. } | Self::InvalidStateTransition(_)
        )
    }

    /// Text shown to the user for this error
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthorizationDenied { reason } => reason.clone(),
            Self::InvalidStateTransition(msg) => msg.clone(),
            Self::MediaAcquisitionFailed { .. } => {
                "Could not fetch that file from Telegram. Please send it again.".to_string()
            }
            Self::TransientDependency(_) => {
                "Service temporarily unavailable, please try again shortly.".to_string()
            }
            Self::Storage(_) | Self::Serialization(_) | Self::Database(_) => {
                "Internal storage error, the operation was not completed.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_user_visible() {
        let err = BotError::invalid("Already have an active line named Road");
        assert!(err.is_rejection());
        assert_eq!(err.user_message(), "Already have an active line named Road");

        let err = BotError::denied("You are not registered. Send /register first.");
        assert!(err.is_rejection());
        assert!(err.user_message().contains("/register"));
    }

    #[test]
    fn test_infrastructure_errors_hide_details() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/srv/data");
        let err = BotError::from(io);
        assert!(!err.is_rejection());
        assert!(!err.user_message().contains("/srv/data"));
    }
}
