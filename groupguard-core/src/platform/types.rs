//! Inbound and outbound platform payloads

use crate::types::{ChatId, ChatKind, MemberStatus, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformChat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
}

impl PlatformChat {
    pub fn group(id: i64, title: &str) -> Self {
        Self { id: ChatId(id), kind: ChatKind::Supergroup, title: Some(title.to_string()) }
    }

    pub fn private(user: UserId) -> Self {
        Self { id: user.private_chat(), kind: ChatKind::Private, title: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl PlatformUser {
    pub fn new(id: i64, first_name: &str) -> Self {
        Self {
            id: UserId(id),
            first_name: first_name.to_string(),
            last_name: None,
            username: None,
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// `@username`, or `-` when the user has none
    pub fn handle(&self) -> String {
        match &self.username {
            Some(u) if !u.is_empty() => format!("@{}", u),
            _ => "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// `@handle` typed as text; needs a lookup to become a user
    Mention,
    /// Mention of a user without a public handle, carrying the user directly
    TextMention { user: UserId },
    BotCommand,
    Other,
}

/// Annotated span of a message; offsets and lengths are in UTF-16 code units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl MessageEntity {
    /// The annotated slice of `text`
    pub fn slice(&self, text: &str) -> Option<String> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        units.get(self.offset..end).map(String::from_utf16_lossy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: i64,
    pub chat: PlatformChat,
    pub from: Option<PlatformUser>,
    pub text: Option<String>,
    pub entities: Vec<MessageEntity>,
    /// Author of the message this one replies to
    pub reply_to_user: Option<PlatformUser>,
}

impl InboundMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Command word of a `/command@bot args` message, lowercased and without the bot suffix
    pub fn command(&self) -> Option<String> {
        let first = self.text().split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Some(name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    pub id: String,
    pub from: PlatformUser,
    pub chat: PlatformChat,
    pub message_id: i64,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdate {
    pub chat: PlatformChat,
    pub user: PlatformUser,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
}

impl MembershipUpdate {
    /// Left/kicked to member in a group chat
    pub fn is_new_join(&self) -> bool {
        self.chat.kind.is_group()
            && self.old_status.is_absent()
            && self.new_status == MemberStatus::Member
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl ToString) -> Self {
        Self { label: label.into(), data: data.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub reply_to: Option<i64>,
    /// Inline keyboard, one inner vector per row
    pub buttons: Vec<Vec<Button>>,
}

impl OutboundMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self { chat_id, text: text.into(), reply_to: None, buttons: Vec::new() }
    }

    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_slice_utf16() {
        // The emoji occupies two UTF-16 units
        let text = "😀 add @someone";
        let entity = MessageEntity { kind: EntityKind::Mention, offset: 7, length: 8 };
        assert_eq!(entity.slice(text).as_deref(), Some("@someone"));

        let out_of_range = MessageEntity { kind: EntityKind::Mention, offset: 40, length: 3 };
        assert_eq!(out_of_range.slice(text), None);
    }

    #[test]
    fn test_command_parsing() {
        let mut msg = InboundMessage {
            message_id: 1,
            chat: PlatformChat::group(-1, "g"),
            from: None,
            text: Some("/Panel@guard_bot now".to_string()),
            entities: vec![],
            reply_to_user: None,
        };
        assert_eq!(msg.command().as_deref(), Some("panel"));

        msg.text = Some("panel".to_string());
        assert_eq!(msg.command(), None);
    }

    #[test]
    fn test_user_labels() {
        let mut user = PlatformUser::new(5, "Ada");
        assert_eq!(user.handle(), "-");
        user.last_name = Some("Lovelace".to_string());
        let user = user.with_username("ada");
        assert_eq!(user.display_name(), "Ada Lovelace");
        assert_eq!(user.handle(), "@ada");
    }

    #[test]
    fn test_new_join_filter() {
        let update = |old, new, kind| MembershipUpdate {
            chat: PlatformChat { id: ChatId(-1), kind, title: None },
            user: PlatformUser::new(9, "x"),
            old_status: old,
            new_status: new,
        };

        assert!(update(MemberStatus::Left, MemberStatus::Member, ChatKind::Group).is_new_join());
        assert!(update(MemberStatus::Kicked, MemberStatus::Member, ChatKind::Supergroup).is_new_join());
        assert!(!update(MemberStatus::Restricted, MemberStatus::Member, ChatKind::Group).is_new_join());
        assert!(!update(MemberStatus::Member, MemberStatus::Administrator, ChatKind::Group).is_new_join());
        assert!(!update(MemberStatus::Left, MemberStatus::Member, ChatKind::Channel).is_new_join());
    }
}
