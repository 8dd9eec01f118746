//! Button actions and their compact callback encoding
//!
//! Callback payloads are short `prefix:arg` strings so they fit the platform's
//! button data limit. Unknown payloads fail to parse and are answered with a
//! generic error by the console.

use crate::errors::GuardError;
use crate::types::{ChatId, UserId};
use std::fmt;
use std::str::FromStr;

/// Multi-turn flows that can be started from a button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    AddGlobalAdmin,
    AddManagerAdmin,
    AddSafe,
    RemoveSafe,
    GlobalBan,
    GlobalUnban,
    CreateManager,
    SetLimit,
    LinkChild,
    UnlinkChild,
    RequestUnlink,
}

impl FlowKind {
    pub const ALL: [FlowKind; 11] = [
        FlowKind::AddGlobalAdmin,
        FlowKind::AddManagerAdmin,
        FlowKind::AddSafe,
        FlowKind::RemoveSafe,
        FlowKind::GlobalBan,
        FlowKind::GlobalUnban,
        FlowKind::CreateManager,
        FlowKind::SetLimit,
        FlowKind::LinkChild,
        FlowKind::UnlinkChild,
        FlowKind::RequestUnlink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::AddGlobalAdmin => "gadmin",
            FlowKind::AddManagerAdmin => "madmin",
            FlowKind::AddSafe => "safe_add",
            FlowKind::RemoveSafe => "safe_rm",
            FlowKind::GlobalBan => "gban",
            FlowKind::GlobalUnban => "gunban",
            FlowKind::CreateManager => "mgr_new",
            FlowKind::SetLimit => "limit",
            FlowKind::LinkChild => "link",
            FlowKind::UnlinkChild => "unlink",
            FlowKind::RequestUnlink => "unlink_req",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Every button the console renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Home,
    Refresh,
    Back,
    Cancel,
    SelectContext,
    SetContext(ChatId),
    Manage,
    ManageAdmins,
    /// Drop one admin of the active management
    RemoveManagerAdmin(UserId),
    ManageHierarchy,
    Lists,
    GlobalLists,
    StartFlow(FlowKind),
    PickBanChat,
    PickUnbanChat,
    BanIn(ChatId),
    UnbanIn(ChatId),
    GuardOn,
    GuardOff,
    Invites,
    InviteManager,
    PickInviteChat,
    InviteChild(ChatId),
    InviteAllChildren,
    PendingRequests,
    OpenRequest(i64),
    Approve(i64),
    Deny(i64),
}

impl fmt::Display for ConsoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleAction::Home => f.write_str("home"),
            ConsoleAction::Refresh => f.write_str("refresh"),
            ConsoleAction::Back => f.write_str("back"),
            ConsoleAction::Cancel => f.write_str("cancel"),
            ConsoleAction::SelectContext => f.write_str("ctx:select"),
            ConsoleAction::SetContext(id) => write!(f, "ctx:set:{}", id),
            ConsoleAction::Manage => f.write_str("manage"),
            ConsoleAction::ManageAdmins => f.write_str("manage:admins"),
            ConsoleAction::RemoveManagerAdmin(id) => write!(f, "manage:admins_rm:{}", id),
            ConsoleAction::ManageHierarchy => f.write_str("manage:mgmt"),
            ConsoleAction::Lists => f.write_str("lists"),
            ConsoleAction::GlobalLists => f.write_str("lists:global"),
            ConsoleAction::StartFlow(kind) => write!(f, "flow:{}", kind.as_str()),
            ConsoleAction::PickBanChat => f.write_str("ban:pick"),
            ConsoleAction::PickUnbanChat => f.write_str("unban:pick"),
            ConsoleAction::BanIn(id) => write!(f, "ban:in:{}", id),
            ConsoleAction::UnbanIn(id) => write!(f, "unban:in:{}", id),
            ConsoleAction::GuardOn => f.write_str("guard:on"),
            ConsoleAction::GuardOff => f.write_str("guard:off"),
            ConsoleAction::Invites => f.write_str("invite"),
            ConsoleAction::InviteManager => f.write_str("invite:manager"),
            ConsoleAction::PickInviteChat => f.write_str("invite:pick"),
            ConsoleAction::InviteChild(id) => write!(f, "invite:child:{}", id),
            ConsoleAction::InviteAllChildren => f.write_str("invite:all"),
            ConsoleAction::PendingRequests => f.write_str("unlink:pending"),
            ConsoleAction::OpenRequest(id) => write!(f, "unlink:open:{}", id),
            ConsoleAction::Approve(id) => write!(f, "unlink:approve:{}", id),
            ConsoleAction::Deny(id) => write!(f, "unlink:deny:{}", id),
        }
    }
}

impl FromStr for ConsoleAction {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || GuardError::InvalidInput(format!("unknown button: {}", s));
        let chat = |arg: &str| arg.parse::<ChatId>().map_err(|_| bad());
        let request = |arg: &str| arg.parse::<i64>().map_err(|_| bad());
        let user = |arg: &str| arg.parse::<UserId>().map_err(|_| bad());

        let parts: Vec<&str> = s.split(':').collect();
        let action = match parts.as_slice() {
            ["home"] => ConsoleAction::Home,
            ["refresh"] => ConsoleAction::Refresh,
            ["back"] => ConsoleAction::Back,
            ["cancel"] => ConsoleAction::Cancel,
            ["ctx", "select"] => ConsoleAction::SelectContext,
            ["ctx", "set", id] => ConsoleAction::SetContext(chat(id)?),
            ["manage"] => ConsoleAction::Manage,
            ["manage", "admins"] => ConsoleAction::ManageAdmins,
            ["manage", "admins_rm", id] => ConsoleAction::RemoveManagerAdmin(user(id)?),
            ["manage", "mgmt"] => ConsoleAction::ManageHierarchy,
            ["lists"] => ConsoleAction::Lists,
            ["lists", "global"] => ConsoleAction::GlobalLists,
            ["flow", kind] => ConsoleAction::StartFlow(FlowKind::parse(kind).ok_or_else(bad)?),
            ["ban", "pick"] => ConsoleAction::PickBanChat,
            ["unban", "pick"] => ConsoleAction::PickUnbanChat,
            ["ban", "in", id] => ConsoleAction::BanIn(chat(id)?),
            ["unban", "in", id] => ConsoleAction::UnbanIn(chat(id)?),
            ["guard", "on"] => ConsoleAction::GuardOn,
            ["guard", "off"] => ConsoleAction::GuardOff,
            ["invite"] => ConsoleAction::Invites,
            ["invite", "manager"] => ConsoleAction::InviteManager,
            ["invite", "pick"] => ConsoleAction::PickInviteChat,
            ["invite", "child", id] => ConsoleAction::InviteChild(chat(id)?),
            ["invite", "all"] => ConsoleAction::InviteAllChildren,
            ["unlink", "pending"] => ConsoleAction::PendingRequests,
            ["unlink", "open", id] => ConsoleAction::OpenRequest(request(id)?),
            ["unlink", "approve", id] => ConsoleAction::Approve(request(id)?),
            ["unlink", "deny", id] => ConsoleAction::Deny(request(id)?),
            _ => return Err(bad()),
        };
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_covers_arguments() {
        let actions = [
            ConsoleAction::SetContext(ChatId(-1001234)),
            ConsoleAction::BanIn(ChatId(-5)),
            ConsoleAction::InviteChild(ChatId(-77)),
            ConsoleAction::Approve(12),
            ConsoleAction::RemoveManagerAdmin(UserId(424242)),
            ConsoleAction::StartFlow(FlowKind::RequestUnlink),
            ConsoleAction::Back,
        ];
        for action in actions {
            assert_eq!(action.to_string().parse::<ConsoleAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_every_flow_kind_parses() {
        for kind in FlowKind::ALL {
            assert_eq!(FlowKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("ctx:set:abc".parse::<ConsoleAction>().is_err());
        assert!("flow:unknown".parse::<ConsoleAction>().is_err());
        assert!("".parse::<ConsoleAction>().is_err());
        assert!("unlink:approve".parse::<ConsoleAction>().is_err());
        assert!("manage:admins_rm:x".parse::<ConsoleAction>().is_err());
    }

    #[test]
    fn test_payloads_stay_short() {
        let longest = ConsoleAction::InviteChild(ChatId(i64::MIN)).to_string();
        assert!(longest.len() <= 64);
    }
}
