//! Records persisted by the store

use crate::types::{ChatId, ChatKind, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A chat designated as the root of a hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerGroup {
    pub id: ChatId,
    pub title: Option<String>,
    /// Maximum number of children, 0 means unlimited
    pub child_limit: i64,
}

/// Association of a child chat with its manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub child_id: ChatId,
    pub manager_id: ChatId,
    pub linked_at: Timestamp,
}

/// Cached metadata of an observed chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub chat_id: ChatId,
    pub title: Option<String>,
    pub kind: ChatKind,
}

/// Ban bookkeeping row; `chat_id == None` is a global entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub user_id: UserId,
    pub chat_id: Option<ChatId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlinkStatus {
    Pending,
    Approved,
    Denied,
}

impl UnlinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlinkStatus::Pending => "pending",
            UnlinkStatus::Approved => "approved",
            UnlinkStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UnlinkStatus::Pending),
            "approved" => Some(UnlinkStatus::Approved),
            "denied" => Some(UnlinkStatus::Denied),
            _ => None,
        }
    }
}

impl fmt::Display for UnlinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request by a manager admin to detach a child, resolved by a super-operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub id: i64,
    pub manager_id: ChatId,
    pub child_id: ChatId,
    pub requested_by: UserId,
    pub created_at: Timestamp,
    pub status: UnlinkStatus,
}
