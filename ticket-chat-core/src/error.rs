//! Error types for the ticket chat core library.
//!
//! Every operation of the session store, message log and OCR pipeline reports
//! failures through [`ChatError`]. Variants carry a stable code so operators can
//! grep logs for a whole category.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Validation | Malformed roles, participant maps, content and type mismatches |
//! | E2001-E2099 | Not found | Session, participant or message absent for the composite key |
//! | E3001-E3099 | Conflict | Duplicate participant, second initiator, last participant removal |
//! | E4001-E4099 | Infrastructure | Store or broker failures, failed compensation, orphaned rows |
//! | E9001-E9099 | General | Configuration and serialization errors |

use std::fmt;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::IssueParticipantKey;

/// The main error type for the ticket chat core library.
#[derive(Debug, Error)]
pub enum ChatError {
    // ========================================================================
    // Validation Errors (E1001-E1099)
    // ========================================================================
    /// Role string is not one of the participant roles
    #[error("[E1001] Invalid participant role: {0}")]
    InvalidRole(String),

    /// Participant map rejected at session creation
    #[error("[E1002] Invalid participants: {0}")]
    InvalidParticipants(String),

    /// Blank, oversized or otherwise malformed message content
    #[error("[E1003] Invalid message content: {0}")]
    InvalidContent(String),

    /// Operation is not allowed for the message's content type
    #[error("[E1004] Message {message_id} is {actual}, operation requires {expected}")]
    ContentTypeMismatch {
        message_id: Uuid,
        expected: String,
        actual: String,
    },

    /// Validation error (generic)
    #[error("[E1005] Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // Not Found Errors (E2001-E2099)
    // ========================================================================
    /// No session row for (project, issue, session)
    #[error("[E2001] Chat session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but does not list the participant
    #[error("[E2002] Participant {user_id} not found in session {session_id}")]
    ParticipantNotFound { user_id: Uuid, session_id: Uuid },

    /// No message row for (session, message)
    #[error("[E2003] Chat message not found: {0}")]
    MessageNotFound(String),

    // ========================================================================
    // Conflict Errors (E3001-E3099)
    // ========================================================================
    /// Participant is already part of the session
    #[error("[E3001] Participant {user_id} already exists in session {session_id}")]
    ParticipantAlreadyExists { user_id: Uuid, session_id: Uuid },

    /// Session already has an initiator
    #[error("[E3002] Session {session_id} already has an initiator ({initiator})")]
    InitiatorAlreadyAssigned { session_id: Uuid, initiator: Uuid },

    /// Removing the participant would leave the session empty
    #[error("[E3003] Participant {user_id} is the last participant of session {session_id}")]
    LastParticipant { user_id: Uuid, session_id: Uuid },

    // ========================================================================
    // Infrastructure Errors (E4001-E4099)
    // ========================================================================
    /// Store did not answer or rejected the request
    #[error("[E4001] Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A write in a multi-row operation failed and was rolled back
    #[error("[E4002] {operation} failed and was rolled back: {cause}")]
    StoreWriteFailed { operation: String, cause: String },

    /// A write failed and its rollback failed too
    #[error(
        "[E4003] {operation} failed ({cause}); rollback left {} orphaned participant row(s)",
        .orphans.len()
    )]
    CompensationFailed {
        operation: String,
        cause: String,
        orphans: Vec<IssueParticipantKey>,
    },

    /// Session row deleted but some participant index rows survived
    #[error(
        "[E4004] Session {session_id} deleted but {} participant index row(s) remain",
        .orphans.len()
    )]
    IndexCleanupFailed {
        session_id: Uuid,
        orphans: Vec<IssueParticipantKey>,
    },

    /// Event broker did not accept the event
    #[error("[E4005] Event broker unavailable: {0}")]
    BrokerUnavailable(String),

    // ========================================================================
    // General Errors (E9002-E9099)
    // ========================================================================
    /// Configuration error
    #[error("[E9002] Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for ticket chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<DatabaseError> for ChatError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidConfig(msg) => ChatError::Config(msg),
            DatabaseError::Mapping(msg) => ChatError::SerializationError(msg),
            other => ChatError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::Query(err).into()
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::BrokerUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(err: config::ConfigError) -> Self {
        ChatError::Config(err.to_string())
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl ChatError {
    /// Returns true for errors detected locally before any write.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidRole(_)
                | ChatError::InvalidParticipants(_)
                | ChatError::InvalidContent(_)
                | ChatError::ContentTypeMismatch { .. }
                | ChatError::Validation(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChatError::SessionNotFound(_)
                | ChatError::ParticipantNotFound { .. }
                | ChatError::MessageNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ChatError::ParticipantAlreadyExists { .. }
                | ChatError::InitiatorAlreadyAssigned { .. }
                | ChatError::LastParticipant { .. }
        )
    }

    /// Returns true for store and broker failures, including failed compensation.
    pub fn is_infrastructure_error(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_)
                | ChatError::StoreWriteFailed { .. }
                | ChatError::CompensationFailed { .. }
                | ChatError::IndexCleanupFailed { .. }
                | ChatError::BrokerUnavailable(_)
        )
    }

    /// Returns true if retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_)
                | ChatError::StoreWriteFailed { .. }
                | ChatError::BrokerUnavailable(_)
        )
    }

    /// Returns true if the failure left participant index rows behind.
    pub fn requires_manual_cleanup(&self) -> bool {
        matches!(
            self,
            ChatError::CompensationFailed { .. } | ChatError::IndexCleanupFailed { .. }
        )
    }

    /// Participant index rows left behind by this failure, if any.
    pub fn orphans(&self) -> &[IssueParticipantKey] {
        match self {
            ChatError::CompensationFailed { orphans, .. }
            | ChatError::IndexCleanupFailed { orphans, .. } => orphans,
            _ => &[],
        }
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::InvalidRole(_) => "E1001",
            ChatError::InvalidParticipants(_) => "E1002",
            ChatError::InvalidContent(_) => "E1003",
            ChatError::ContentTypeMismatch { .. } => "E1004",
            ChatError::Validation(_) => "E1005",
            ChatError::SessionNotFound(_) => "E2001",
            ChatError::ParticipantNotFound { .. } => "E2002",
            ChatError::MessageNotFound(_) => "E2003",
            ChatError::ParticipantAlreadyExists { .. } => "E3001",
            ChatError::InitiatorAlreadyAssigned { .. } => "E3002",
            ChatError::LastParticipant { .. } => "E3003",
            ChatError::StoreUnavailable(_) => "E4001",
            ChatError::StoreWriteFailed { .. } => "E4002",
            ChatError::CompensationFailed { .. } => "E4003",
            ChatError::IndexCleanupFailed { .. } => "E4004",
            ChatError::BrokerUnavailable(_) => "E4005",
            ChatError::Config(_) => "E9002",
            ChatError::SerializationError(_) => "E9003",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            ChatError::InvalidRole(_) => Some(
                "Use one of INITIATOR, HANDLER, OBSERVER, VIEWER, EDITOR, OWNER, SUPPORT",
            ),
            ChatError::StoreUnavailable(_) | ChatError::StoreWriteFailed { .. } => {
                Some("Check that the database is reachable and retry the operation")
            }
            ChatError::CompensationFailed { .. } | ChatError::IndexCleanupFailed { .. } => {
                Some("Run 'ticket-chat sessions repair --user <id>' for each orphaned row")
            }
            ChatError::BrokerUnavailable(_) => Some(
                "The message was stored; re-trigger OCR with 'ticket-chat ocr retrigger' once the broker is back",
            ),
            ChatError::Config(_) => Some("Check config/default.toml and TICKET_CHAT_* variables"),
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.requires_manual_cleanup() {
            for orphan in self.orphans() {
                error!(
                    error_code = %code,
                    user_id = %orphan.user_id,
                    issue_id = %orphan.issue_id,
                    session_id = %orphan.session_id,
                    "Orphaned participant index row requires cleanup"
                );
            }
        }

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with its suggestion and any orphaned rows.
pub struct CliErrorDisplay<'a> {
    error: &'a ChatError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a ChatError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        let orphans = self.error.orphans();
        if !orphans.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Orphaned participant index rows:")?;
            for orphan in orphans {
                writeln!(f, "    {}", orphan)?;
            }
        }

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan() -> IssueParticipantKey {
        IssueParticipantKey {
            user_id: Uuid::new_v4(),
            issue_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ChatError::InvalidRole("CAPTAIN".to_string());
        assert!(err.to_string().contains("E1001"));
        assert!(err.to_string().contains("CAPTAIN"));

        let err = ChatError::CompensationFailed {
            operation: "create_chat_session".to_string(),
            cause: "timeout".to_string(),
            orphans: vec![orphan(), orphan()],
        };
        assert!(err.to_string().contains("E4003"));
        assert!(err.to_string().contains("2 orphaned"));
    }

    #[test]
    fn test_error_categorization() {
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        assert!(ChatError::InvalidContent("blank".to_string()).is_validation_error());
        assert!(ChatError::ParticipantNotFound {
            user_id,
            session_id
        }
        .is_not_found());
        assert!(ChatError::ParticipantAlreadyExists {
            user_id,
            session_id
        }
        .is_conflict());
        assert!(ChatError::StoreUnavailable("down".to_string()).is_infrastructure_error());
        assert!(ChatError::BrokerUnavailable("down".to_string()).is_infrastructure_error());

        let not_found = ChatError::MessageNotFound("m".to_string());
        assert!(!not_found.is_conflict());
        assert!(!not_found.is_infrastructure_error());
    }

    #[test]
    fn test_compensation_failure_requires_cleanup() {
        let err = ChatError::CompensationFailed {
            operation: "create_chat_session".to_string(),
            cause: "timeout".to_string(),
            orphans: vec![orphan()],
        };
        assert!(err.requires_manual_cleanup());
        assert!(err.is_infrastructure_error());
        assert!(!err.is_transient());
        assert_eq!(err.orphans().len(), 1);

        let rolled_back = ChatError::StoreWriteFailed {
            operation: "create_chat_session".to_string(),
            cause: "timeout".to_string(),
        };
        assert!(!rolled_back.requires_manual_cleanup());
        assert!(rolled_back.is_transient());
        assert!(rolled_back.orphans().is_empty());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ChatError::Validation("x".to_string()).error_code(), "E1005");
        assert_eq!(ChatError::SessionNotFound("s".to_string()).error_code(), "E2001");
        assert_eq!(
            ChatError::InitiatorAlreadyAssigned {
                session_id: Uuid::new_v4(),
                initiator: Uuid::new_v4()
            }
            .error_code(),
            "E3002"
        );
        assert_eq!(
            ChatError::IndexCleanupFailed {
                session_id: Uuid::new_v4(),
                orphans: vec![]
            }
            .error_code(),
            "E4004"
        );
        assert_eq!(ChatError::Config("x".to_string()).error_code(), "E9002");
    }

    #[test]
    fn test_from_database_error() {
        let err: ChatError = DatabaseError::Unavailable("timeout".to_string()).into();
        assert!(matches!(err, ChatError::StoreUnavailable(_)));

        let err: ChatError = DatabaseError::Mapping("bad role".to_string()).into();
        assert!(matches!(err, ChatError::SerializationError(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_result: Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let chat_err: ChatError = json_result.unwrap_err().into();
        assert!(matches!(chat_err, ChatError::SerializationError(_)));
    }

    #[test]
    fn test_cli_error_display_lists_orphans() {
        let row = orphan();
        let err = ChatError::CompensationFailed {
            operation: "create_chat_session".to_string(),
            cause: "timeout".to_string(),
            orphans: vec![row.clone()],
        };
        let output = CliErrorDisplay::new(&err).to_string();

        assert!(output.contains(&row.user_id.to_string()));
        assert!(output.contains("Suggestion"));

        let quiet = CliErrorDisplay::new(&err).without_suggestion().to_string();
        assert!(!quiet.contains("Suggestion"));
    }
}
