//! Error types for the moderation core

use crate::types::ChatId;
use thiserror::Error;

/// Result type for moderation operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors surfaced by the hierarchy, policy, and console layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Referenced manager, link, or request does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Manager already holds its configured number of children
    #[error("Child limit reached for manager {manager} (limit={limit})")]
    LimitExceeded { manager: ChatId, limit: i64 },

    /// Child is linked under a different manager
    #[error("Chat {child} is already linked to manager {manager}")]
    AlreadyLinkedElsewhere { child: ChatId, manager: ChatId },

    /// Unlink request was already approved or denied
    #[error("Unlink request {0} is already resolved")]
    RequestAlreadyResolved(i64),

    /// Caller lacks authority over the scope
    #[error("Access denied")]
    Unauthorized,

    /// No user could be extracted from the operator's input
    #[error("Could not resolve a target user")]
    UnresolvedTarget,

    /// Platform call failed
    #[error("Platform action failed: {0}")]
    PlatformActionFailed(String),

    /// Target is the bot itself
    #[error("Refusing to act on the bot itself")]
    SelfTargetRejected,

    /// Link would create a second level of hierarchy
    #[error("Nested hierarchy rejected: {0}")]
    NestedHierarchy(String),

    /// Operator input failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for GuardError {
    fn from(e: rusqlite::Error) -> Self {
        GuardError::Store(e.to_string())
    }
}

impl From<r2d2::Error> for GuardError {
    fn from(e: r2d2::Error) -> Self {
        GuardError::Store(format!("Failed to get connection: {}", e))
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GuardError::LimitExceeded { manager: ChatId(-100), limit: 2 };
        assert_eq!(err.to_string(), "Child limit reached for manager -100 (limit=2)");

        let err = GuardError::AlreadyLinkedElsewhere { child: ChatId(-5), manager: ChatId(-7) };
        assert!(err.to_string().contains("-7"));
    }

    #[test]
    fn test_store_error_conversion() {
        let err: GuardError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, GuardError::Store(_)));
    }
}
