//! Platform client abstraction

use super::types::{OutboundMessage, PlatformChat};
use crate::errors::GuardError;
use crate::types::{ChatId, MemberStatus, UserId};
use async_trait::async_trait;
use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failures reported by the platform
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Too many requests: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<PlatformError> for GuardError {
    fn from(e: PlatformError) -> Self {
        GuardError::PlatformActionFailed(e.to_string())
    }
}

/// Operations the moderation core consumes from the messaging platform
///
/// Every call may fail or be rate limited; callers isolate failures per call.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user id
    async fn bot_user_id(&self) -> PlatformResult<UserId>;

    /// Deliver a message, returning the platform message id
    async fn send_message(&self, message: OutboundMessage) -> PlatformResult<i64>;

    async fn ban_member(&self, chat: ChatId, user: UserId) -> PlatformResult<()>;

    /// Lift a ban; with `only_if_banned` a present member is left untouched
    async fn unban_member(&self, chat: ChatId, user: UserId, only_if_banned: bool)
        -> PlatformResult<()>;

    async fn get_chat(&self, chat: ChatId) -> PlatformResult<PlatformChat>;

    /// Resolve a `@handle` to the user behind it
    async fn resolve_handle(&self, handle: &str) -> PlatformResult<UserId>;

    async fn member_status(&self, chat: ChatId, user: UserId) -> PlatformResult<MemberStatus>;

    /// Create an invite link usable by at most `member_limit` joins
    async fn create_invite_link(&self, chat: ChatId, member_limit: u32) -> PlatformResult<String>;

    /// Acknowledge a button press so the client stops its spinner
    async fn answer_button(&self, press_id: &str, text: Option<&str>) -> PlatformResult<()>;
}
