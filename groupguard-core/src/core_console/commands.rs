//! Single-turn text commands typed in group chats

use crate::platform::InboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCommand {
    GuardOn,
    GuardOff,
    AddSafe,
    RemoveSafe,
    /// This chat only
    Ban,
    Unban,
    /// Whole scope
    GlobalBan,
    GlobalUnban,
    HubOn,
    HubOff,
    /// `/whoami`
    WhoAmI,
    /// `/limit N` in a manager chat
    SetLimit,
    /// `/link <child>` in a manager chat
    Link,
    /// `/unlink <child>`
    Unlink,
}

impl GroupCommand {
    /// Parse a group message; matching is case-insensitive on the first word
    pub fn parse(message: &InboundMessage) -> Option<Self> {
        if let Some(command) = message.command() {
            return match command.as_str() {
                "whoami" => Some(GroupCommand::WhoAmI),
                "limit" => Some(GroupCommand::SetLimit),
                "link" => Some(GroupCommand::Link),
                "unlink" => Some(GroupCommand::Unlink),
                _ => None,
            };
        }

        let text = message.text().trim().to_lowercase();
        let words: Vec<&str> = text.split_whitespace().collect();
        match words.as_slice() {
            ["on"] => Some(GroupCommand::GuardOn),
            ["off"] => Some(GroupCommand::GuardOff),
            ["hub", "on"] => Some(GroupCommand::HubOn),
            ["hub", "off"] => Some(GroupCommand::HubOff),
            [first, ..] => match *first {
                "add" => Some(GroupCommand::AddSafe),
                "remove" => Some(GroupCommand::RemoveSafe),
                "ban" => Some(GroupCommand::Ban),
                "unban" => Some(GroupCommand::Unban),
                "gban" => Some(GroupCommand::GlobalBan),
                "gunban" => Some(GroupCommand::GlobalUnban),
                _ => None,
            },
            [] => None,
        }
    }

    /// Commands that operate on a user target
    pub fn needs_user(&self) -> bool {
        matches!(
            self,
            GroupCommand::AddSafe
                | GroupCommand::RemoveSafe
                | GroupCommand::Ban
                | GroupCommand::Unban
                | GroupCommand::GlobalBan
                | GroupCommand::GlobalUnban
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformChat;

    fn parse(text: &str) -> Option<GroupCommand> {
        GroupCommand::parse(&InboundMessage {
            message_id: 1,
            chat: PlatformChat::group(-100, "Main"),
            from: None,
            text: Some(text.to_string()),
            entities: vec![],
            reply_to_user: None,
        })
    }

    #[test]
    fn test_plain_words() {
        assert_eq!(parse("ON"), Some(GroupCommand::GuardOn));
        assert_eq!(parse(" off "), Some(GroupCommand::GuardOff));
        assert_eq!(parse("Add @someone"), Some(GroupCommand::AddSafe));
        assert_eq!(parse("gban 123456"), Some(GroupCommand::GlobalBan));
        assert_eq!(parse("hub on"), Some(GroupCommand::HubOn));
        assert_eq!(parse("Hub Off"), Some(GroupCommand::HubOff));
    }

    #[test]
    fn test_chatter_is_ignored() {
        assert_eq!(parse("on my way"), None);
        assert_eq!(parse("banana"), None);
        assert_eq!(parse("addition"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("/panel"), None);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse("/whoami"), Some(GroupCommand::WhoAmI));
        assert_eq!(parse("/limit@guard_bot 5"), Some(GroupCommand::SetLimit));
        assert_eq!(parse("/link -1001"), Some(GroupCommand::Link));
        assert!(GroupCommand::Ban.needs_user());
        assert!(!GroupCommand::HubOn.needs_user());
    }
}
