//! Target extraction from operator messages

use crate::platform::{ChatPlatform, EntityKind, InboundMessage};
use crate::types::{ChatId, UserId};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

fn numeric_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{5,})\b").expect("numeric id pattern"))
}

fn handle() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_]{5,})").expect("handle pattern"))
}

fn chat_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d{3,}").expect("chat id pattern"))
}

fn integer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+").expect("integer pattern"))
}

/// First signed integer of any length
pub fn parse_limit(text: &str) -> Option<i64> {
    integer().find(text).and_then(|m| m.as_str().parse().ok())
}

/// First signed integer of at least three digits
pub fn parse_chat_id(text: &str) -> Option<ChatId> {
    chat_id().find(text).and_then(|m| m.as_str().parse().ok())
}

#[derive(Clone)]
pub struct TargetResolver {
    platform: Arc<dyn ChatPlatform>,
}

impl TargetResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }

    /// Resolve the user a message points at
    ///
    /// Priority: replied-to author, user mention entity, handle mention
    /// entity (a failed lookup ends the search), first run of five or more
    /// digits, then a bare `@handle`.
    pub async fn resolve_user(&self, message: &InboundMessage) -> Option<UserId> {
        if let Some(author) = &message.reply_to_user {
            return Some(author.id);
        }

        let text = message.text();
        let mentioned = message.entities.iter().find_map(|e| match e.kind {
            EntityKind::TextMention { user } => Some(user),
            _ => None,
        });
        if mentioned.is_some() {
            return mentioned;
        }

        if let Some(entity) = message.entities.iter().find(|e| e.kind == EntityKind::Mention) {
            let handle = entity.slice(text)?;
            return self.lookup(&handle).await;
        }

        if let Some(id) = numeric_id().captures(text).and_then(|c| c[1].parse().ok()) {
            return Some(UserId(id));
        }

        let name = handle().captures(text)?.get(1)?.as_str().to_string();
        self.lookup(&format!("@{}", name)).await
    }

    async fn lookup(&self, handle: &str) -> Option<UserId> {
        match self.platform.resolve_handle(handle).await {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(handle, error = %e, "Handle lookup failed");
                None
            }
        }
    }
}
