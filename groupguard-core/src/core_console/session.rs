//! Per-operator console sessions
//!
//! A session is keyed by user id and holds the active manager, the view
//! being shown, a bounded back-stack and at most one pending input. The
//! whole struct round-trips through the `console_sessions` table as JSON.

use crate::core_store::GuardSqlStore;
use crate::errors::GuardResult;
use crate::types::{ChatId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelRole {
    Owner,
    Admin,
}

/// What a chat picker is picking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickPurpose {
    Ban,
    Unban,
    Invite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum PanelView {
    Home,
    ManagerPicker,
    Manage,
    ManageAdmins,
    ManageHierarchy,
    Lists,
    GlobalLists,
    ChatPicker { purpose: PickPurpose },
    Invites,
    PendingRequests,
    Request { id: i64 },
}

/// Operation awaiting the operator's next message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    AddGlobalAdmin,
    AddManagerAdmin { manager: ChatId },
    AddSafe { manager: ChatId },
    RemoveSafe { manager: ChatId },
    BanOne { manager: ChatId, chat: ChatId },
    UnbanOne { manager: ChatId, chat: ChatId },
    GlobalBan { manager: ChatId },
    GlobalUnban { manager: ChatId },
    CreateManager,
    SetLimit { manager: ChatId },
    LinkChild { manager: ChatId },
    UnlinkChild { manager: ChatId },
    RequestUnlink { manager: ChatId },
}

impl PendingOp {
    /// Manager whose authorization gates this operation
    pub fn manager(&self) -> Option<ChatId> {
        match *self {
            PendingOp::AddGlobalAdmin | PendingOp::CreateManager => None,
            PendingOp::AddManagerAdmin { manager }
            | PendingOp::AddSafe { manager }
            | PendingOp::RemoveSafe { manager }
            | PendingOp::BanOne { manager, .. }
            | PendingOp::UnbanOne { manager, .. }
            | PendingOp::GlobalBan { manager }
            | PendingOp::GlobalUnban { manager }
            | PendingOp::SetLimit { manager }
            | PendingOp::LinkChild { manager }
            | PendingOp::UnlinkChild { manager }
            | PendingOp::RequestUnlink { manager } => Some(manager),
        }
    }

    /// Hierarchy operations take a chat id instead of a user target
    pub fn takes_chat_id(&self) -> bool {
        matches!(
            self,
            PendingOp::CreateManager
                | PendingOp::SetLimit { .. }
                | PendingOp::LinkChild { .. }
                | PendingOp::UnlinkChild { .. }
                | PendingOp::RequestUnlink { .. }
        )
    }

    /// Operations reserved for super-operators
    pub fn owner_only(&self) -> bool {
        matches!(
            self,
            PendingOp::AddGlobalAdmin
                | PendingOp::AddManagerAdmin { .. }
                | PendingOp::CreateManager
                | PendingOp::SetLimit { .. }
                | PendingOp::LinkChild { .. }
                | PendingOp::UnlinkChild { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInput {
    pub op: PendingOp,
    pub origin_chat: ChatId,
    pub origin_user: UserId,
}

impl PendingInput {
    /// Only the originating user, in the originating chat or their private chat
    pub fn admits(&self, user: UserId, chat: ChatId) -> bool {
        user == self.origin_user && (chat == self.origin_chat || chat == user.private_chat())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Idle,
    AwaitingInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSession {
    pub user_id: UserId,
    pub role: PanelRole,
    pub active_manager: Option<ChatId>,
    pub view: PanelView,
    #[serde(default)]
    pub nav_stack: VecDeque<PanelView>,
    #[serde(default)]
    pub pending: Option<PendingInput>,
}

impl OperatorSession {
    pub fn new(user_id: UserId, role: PanelRole, active_manager: Option<ChatId>) -> Self {
        Self {
            user_id,
            role,
            active_manager,
            view: PanelView::Home,
            nav_stack: VecDeque::new(),
            pending: None,
        }
    }

    pub fn state(&self) -> ConsoleState {
        if self.pending.is_some() {
            ConsoleState::AwaitingInput
        } else {
            ConsoleState::Idle
        }
    }

    /// Show `view`, remembering the current one; the oldest entry is dropped past `limit`
    pub fn navigate(&mut self, view: PanelView, limit: usize) {
        let current = std::mem::replace(&mut self.view, view);
        self.remember(current, limit);
    }

    /// Start a flow; any earlier pending input is replaced
    pub fn begin(&mut self, pending: PendingInput, limit: usize) {
        let current = self.view;
        self.remember(current, limit);
        self.pending = Some(pending);
    }

    /// Drop pending input and return to the previous view (home when empty)
    pub fn back(&mut self) -> PanelView {
        self.pending = None;
        self.view = self.nav_stack.pop_back().unwrap_or(PanelView::Home);
        self.view
    }

    pub fn cancel(&mut self) {
        self.pending = None;
        self.nav_stack.clear();
        self.view = PanelView::Home;
    }

    pub fn finish(&mut self) {
        self.pending = None;
    }

    fn remember(&mut self, view: PanelView, limit: usize) {
        self.nav_stack.push_back(view);
        while self.nav_stack.len() > limit {
            self.nav_stack.pop_front();
        }
    }
}

/// JSON persistence of sessions
#[derive(Clone)]
pub struct SessionStore {
    store: GuardSqlStore,
}

impl SessionStore {
    pub fn new(store: GuardSqlStore) -> Self {
        Self { store }
    }

    pub fn load(&self, user: UserId) -> GuardResult<Option<OperatorSession>> {
        match self.store.load_session(user)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, session: &OperatorSession) -> GuardResult<()> {
        let json = serde_json::to_string(session)?;
        self.store.save_session(session.user_id, &json)
    }

    pub fn clear(&self, user: UserId) -> GuardResult<()> {
        self.store.delete_session(user)
    }
}
