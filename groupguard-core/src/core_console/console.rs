//! Operator console: panel entry, button dispatch, pending flows, group commands
//!
//! Each inbound event runs to completion against the persisted session of its
//! sender. A session is Idle or AwaitingInput; the latter holds exactly one
//! `PendingInput` which the next admitted message completes.

use super::action::{ConsoleAction, FlowKind};
use super::commands::GroupCommand;
use super::session::{
    OperatorSession, PanelRole, PanelView, PendingInput, PendingOp, PickPurpose, SessionStore,
};
use super::target::{parse_chat_id, parse_limit, TargetResolver};
use crate::config::ConsoleConfig;
use crate::core_fanout::{FanoutOp, ScopeExecutor};
use crate::core_policy::{HubChange, PolicyEngine};
use crate::core_scope::{HierarchyManager, LinkOutcome};
use crate::core_store::GuardSqlStore;
use crate::errors::{GuardError, GuardResult};
use crate::metrics::{record_counter, CONSOLE_ACTIONS, CONSOLE_DENIED, CONSOLE_FLOWS_COMPLETED};
use crate::platform::{ButtonPress, ChatPlatform, InboundMessage, OutboundMessage};
use crate::types::{ChatId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

const UNRESOLVED_USER: &str = "User not found.\n\
    - Best: reply to one of their messages\n\
    - Or send their numeric id\n\
    - Or a real mention (not plain text)";

const UNRESOLVED_NUMBER: &str = "No valid number found. Send the number only.";

#[derive(Clone)]
pub struct Console {
    pub(super) store: GuardSqlStore,
    pub(super) hierarchy: HierarchyManager,
    pub(super) policy: PolicyEngine,
    pub(super) executor: ScopeExecutor,
    pub(super) platform: Arc<dyn ChatPlatform>,
    pub(super) targets: TargetResolver,
    pub(super) sessions: SessionStore,
    pub(super) config: ConsoleConfig,
}

impl Console {
    pub fn new(
        store: GuardSqlStore,
        policy: PolicyEngine,
        platform: Arc<dyn ChatPlatform>,
        config: ConsoleConfig,
    ) -> Self {
        let hierarchy = HierarchyManager::new(store.clone());
        let executor = ScopeExecutor::new(
            hierarchy.resolver().clone(),
            policy.clone(),
            platform.clone(),
            config.fanout_concurrency,
        );
        Self {
            targets: TargetResolver::new(platform.clone()),
            sessions: SessionStore::new(store.clone()),
            store,
            hierarchy,
            policy,
            executor,
            platform,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle a text message; returns the replies to deliver
    pub async fn handle_message(&self, message: &InboundMessage) -> Vec<OutboundMessage> {
        let Some(from) = message.from.as_ref() else {
            return Vec::new();
        };
        if from.is_bot {
            return Vec::new();
        }
        let user = from.id;

        let result = if message.command().as_deref() == Some("panel") {
            record_counter(CONSOLE_ACTIONS, 1);
            self.open_panel(message, user).await
        } else {
            match self.admitted_session(user, message.chat.id) {
                Ok(Some(session)) => self.continue_flow(message, session).await,
                Ok(None) if message.chat.kind.is_group() => self.group_command(message, user).await,
                Ok(None) => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        };

        result.unwrap_or_else(|e| {
            self.note_failure(user, &e);
            vec![reply(message, error_text(&e))]
        })
    }

    /// Handle a button press; returns the replies to deliver
    pub async fn handle_button(&self, press: &ButtonPress) -> Vec<OutboundMessage> {
        record_counter(CONSOLE_ACTIONS, 1);
        let user = press.from.id;
        let chat = press.chat.id;

        let result = match press.data.parse::<ConsoleAction>() {
            Ok(action) => self.dispatch(press, action).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            self.note_failure(user, &e);
            vec![OutboundMessage::text(chat, error_text(&e))]
        })
    }

    fn note_failure(&self, user: UserId, error: &GuardError) {
        if *error == GuardError::Unauthorized {
            record_counter(CONSOLE_DENIED, 1);
            debug!(user = %user, "Console access denied");
        } else {
            warn!(user = %user, error = %error, "Console operation failed");
        }
    }

    fn admitted_session(&self, user: UserId, chat: ChatId) -> GuardResult<Option<OperatorSession>> {
        Ok(self
            .sessions
            .load(user)?
            .filter(|s| s.pending.is_some_and(|p| p.admits(user, chat))))
    }

    pub(super) fn role_for(&self, user: UserId) -> PanelRole {
        if self.policy.is_super_operator(user) {
            PanelRole::Owner
        } else {
            PanelRole::Admin
        }
    }

    // ===== Panel entry =====

    async fn open_panel(&self, message: &InboundMessage, user: UserId) -> GuardResult<Vec<OutboundMessage>> {
        let chat = &message.chat;
        let session = if chat.kind.is_group() {
            self.store.upsert_group(chat.id, chat.title.as_deref(), chat.kind)?;
            let effective = self.hierarchy.resolver().resolve_effective(chat.id)?;
            self.policy.ensure_authorized(user, effective)?;
            OperatorSession::new(user, self.role_for(user), Some(effective))
        } else if self.policy.is_super_operator(user) {
            OperatorSession::new(user, PanelRole::Owner, None)
        } else {
            let managers = self.policy.managers_for_admin(user)?;
            match managers.as_slice() {
                [only] => OperatorSession::new(user, PanelRole::Admin, Some(*only)),
                [] if self.policy.is_global_admin(user)? => OperatorSession::new(user, PanelRole::Admin, None),
                [] => return Err(GuardError::Unauthorized),
                _ => {
                    let mut session = OperatorSession::new(user, PanelRole::Admin, None);
                    session.view = PanelView::ManagerPicker;
                    session
                }
            }
        };

        self.sessions.save(&session)?;
        info!(user = %user, chat = %chat.id, manager = ?session.active_manager.map(|m| m.0), "Panel opened");
        Ok(vec![self.render(&session, chat.id)?.replying_to(message.message_id)])
    }

    // ===== Buttons =====

    async fn dispatch(&self, press: &ButtonPress, action: ConsoleAction) -> GuardResult<Vec<OutboundMessage>> {
        let user = press.from.id;
        let chat = press.chat.id;
        let limit = self.config.nav_stack_limit;

        let Some(mut session) = self.sessions.load(user)? else {
            return Ok(vec![OutboundMessage::text(chat, "Send /panel to open the console.")]);
        };

        let notice = match action {
            ConsoleAction::Home => {
                if session.role == PanelRole::Owner {
                    session.active_manager = None;
                }
                session.cancel();
                None
            }
            ConsoleAction::Refresh => None,
            ConsoleAction::Back => {
                session.back();
                None
            }
            ConsoleAction::Cancel => {
                session.cancel();
                self.sessions.save(&session)?;
                return Ok(vec![OutboundMessage::text(chat, "Cancelled.")]);
            }
            ConsoleAction::SelectContext => {
                session.navigate(PanelView::ManagerPicker, limit);
                None
            }
            ConsoleAction::SetContext(manager) => {
                self.policy.ensure_authorized(user, manager)?;
                self.hierarchy.get_manager(manager)?;
                session.active_manager = Some(manager);
                session.navigate(PanelView::Home, limit);
                None
            }
            ConsoleAction::Manage | ConsoleAction::ManageAdmins | ConsoleAction::ManageHierarchy => {
                self.policy.ensure_super_operator(user)?;
                self.active_manager(&session)?;
                let view = match action {
                    ConsoleAction::Manage => PanelView::Manage,
                    ConsoleAction::ManageAdmins => PanelView::ManageAdmins,
                    _ => PanelView::ManageHierarchy,
                };
                session.navigate(view, limit);
                None
            }
            ConsoleAction::RemoveManagerAdmin(admin) => {
                self.policy.ensure_super_operator(user)?;
                let manager = self.active_manager(&session)?;
                let text = if self.policy.remove_manager_admin(manager, admin)? {
                    format!("✅ {} is no longer an admin of «{}»", admin, self.hierarchy.manager_title(manager)?)
                } else {
                    format!("{} was not an admin of «{}»", admin, self.hierarchy.manager_title(manager)?)
                };
                session.view = PanelView::ManageAdmins;
                Some(text)
            }
            ConsoleAction::Lists => {
                self.active_manager(&session)?;
                session.navigate(PanelView::Lists, limit);
                None
            }
            ConsoleAction::GlobalLists => {
                if !self.policy.is_super_operator(user) && !self.policy.is_global_admin(user)? {
                    return Err(GuardError::Unauthorized);
                }
                session.navigate(PanelView::GlobalLists, limit);
                None
            }
            ConsoleAction::StartFlow(kind) => {
                let op = self.flow_op(&session, kind)?;
                return self.begin_flow(&mut session, op, chat);
            }
            ConsoleAction::PickBanChat | ConsoleAction::PickUnbanChat | ConsoleAction::PickInviteChat => {
                self.active_manager(&session)?;
                let purpose = match action {
                    ConsoleAction::PickBanChat => PickPurpose::Ban,
                    ConsoleAction::PickUnbanChat => PickPurpose::Unban,
                    _ => PickPurpose::Invite,
                };
                session.navigate(PanelView::ChatPicker { purpose }, limit);
                None
            }
            ConsoleAction::BanIn(target_chat) | ConsoleAction::UnbanIn(target_chat) => {
                let manager = self.active_manager(&session)?;
                self.ensure_in_scope(manager, target_chat)?;
                let op = match action {
                    ConsoleAction::BanIn(_) => PendingOp::BanOne { manager, chat: target_chat },
                    _ => PendingOp::UnbanOne { manager, chat: target_chat },
                };
                return self.begin_flow(&mut session, op, chat);
            }
            ConsoleAction::GuardOn | ConsoleAction::GuardOff => {
                let manager = self.active_manager(&session)?;
                let enabled = action == ConsoleAction::GuardOn;
                self.policy.set_guard(manager, enabled)?;
                Some(format!(
                    "✅ Guard for «{}»: {}",
                    self.hierarchy.manager_title(manager)?,
                    on_off(enabled)
                ))
            }
            ConsoleAction::Invites => {
                self.active_manager(&session)?;
                session.navigate(PanelView::Invites, limit);
                None
            }
            ConsoleAction::InviteManager => {
                let manager = self.active_manager(&session)?;
                Some(self.invite_text(manager).await)
            }
            ConsoleAction::InviteChild(target_chat) => {
                let manager = self.active_manager(&session)?;
                self.ensure_in_scope(manager, target_chat)?;
                Some(self.invite_text(target_chat).await)
            }
            ConsoleAction::InviteAllChildren => {
                let manager = self.active_manager(&session)?;
                Some(self.invite_all_children(manager).await?)
            }
            ConsoleAction::PendingRequests => {
                self.policy.ensure_super_operator(user)?;
                session.navigate(PanelView::PendingRequests, limit);
                None
            }
            ConsoleAction::OpenRequest(id) => {
                self.policy.ensure_super_operator(user)?;
                session.navigate(PanelView::Request { id }, limit);
                None
            }
            ConsoleAction::Approve(id) | ConsoleAction::Deny(id) => {
                self.policy.ensure_super_operator(user)?;
                let text = if matches!(action, ConsoleAction::Approve(_)) {
                    let request = self.hierarchy.approve(id)?;
                    format!(
                        "✅ Unlink #{} approved: {} removed from «{}»",
                        id,
                        request.child_id,
                        self.hierarchy.manager_title(request.manager_id)?
                    )
                } else {
                    self.hierarchy.deny(id)?;
                    format!("❌ Unlink #{} denied", id)
                };
                session.view = PanelView::PendingRequests;
                Some(text)
            }
        };

        self.sessions.save(&session)?;
        let mut replies = Vec::new();
        if let Some(text) = notice {
            replies.push(OutboundMessage::text(chat, text));
        }
        replies.push(self.render(&session, chat)?);
        Ok(replies)
    }

    /// Active manager of the session, after re-checking the operator's authority over it
    pub(super) fn active_manager(&self, session: &OperatorSession) -> GuardResult<ChatId> {
        let manager = session
            .active_manager
            .ok_or_else(|| GuardError::InvalidInput("select a manager first".to_string()))?;
        self.policy.ensure_authorized(session.user_id, manager)?;
        Ok(manager)
    }

    fn ensure_in_scope(&self, manager: ChatId, chat: ChatId) -> GuardResult<()> {
        if self.hierarchy.scope_set(manager)?.contains(&chat) {
            Ok(())
        } else {
            Err(GuardError::InvalidInput(format!("chat {} is outside this scope", chat)))
        }
    }

    fn flow_op(&self, session: &OperatorSession, kind: FlowKind) -> GuardResult<PendingOp> {
        let op = match kind {
            FlowKind::AddGlobalAdmin => PendingOp::AddGlobalAdmin,
            FlowKind::CreateManager => PendingOp::CreateManager,
            _ => {
                let manager = self.active_manager(session)?;
                match kind {
                    FlowKind::AddManagerAdmin => PendingOp::AddManagerAdmin { manager },
                    FlowKind::AddSafe => PendingOp::AddSafe { manager },
                    FlowKind::RemoveSafe => PendingOp::RemoveSafe { manager },
                    FlowKind::GlobalBan => PendingOp::GlobalBan { manager },
                    FlowKind::GlobalUnban => PendingOp::GlobalUnban { manager },
                    FlowKind::SetLimit => PendingOp::SetLimit { manager },
                    FlowKind::LinkChild => PendingOp::LinkChild { manager },
                    FlowKind::UnlinkChild => PendingOp::UnlinkChild { manager },
                    _ => PendingOp::RequestUnlink { manager },
                }
            }
        };
        if op.owner_only() {
            self.policy.ensure_super_operator(session.user_id)?;
        }
        Ok(op)
    }

    fn begin_flow(
        &self,
        session: &mut OperatorSession,
        op: PendingOp,
        origin_chat: ChatId,
    ) -> GuardResult<Vec<OutboundMessage>> {
        let pending = PendingInput { op, origin_chat, origin_user: session.user_id };
        session.begin(pending, self.config.nav_stack_limit);
        self.sessions.save(session)?;
        debug!(user = %session.user_id, op = ?op, "Flow started");
        Ok(vec![OutboundMessage::text(origin_chat, prompt(op)).with_buttons(vec![super::views::nav_row()])])
    }

    // ===== Pending flows =====

    async fn continue_flow(
        &self,
        message: &InboundMessage,
        mut session: OperatorSession,
    ) -> GuardResult<Vec<OutboundMessage>> {
        let Some(pending) = session.pending else {
            return Ok(Vec::new());
        };

        match self.run_pending(message, &mut session, pending.op).await {
            Err(GuardError::UnresolvedTarget) => {
                let help = if pending.op.takes_chat_id() { UNRESOLVED_NUMBER } else { UNRESOLVED_USER };
                Ok(vec![reply(message, help)])
            }
            Err(e) => {
                session.finish();
                self.sessions.save(&session)?;
                self.note_failure(session.user_id, &e);
                Ok(vec![reply(message, error_text(&e))])
            }
            Ok(text) => {
                session.finish();
                self.sessions.save(&session)?;
                record_counter(CONSOLE_FLOWS_COMPLETED, 1);
                Ok(vec![reply(message, text)])
            }
        }
    }

    async fn run_pending(
        &self,
        message: &InboundMessage,
        session: &mut OperatorSession,
        op: PendingOp,
    ) -> GuardResult<String> {
        let user = session.user_id;
        self.authorize_op(user, op)?;

        if op.takes_chat_id() {
            let value = match op {
                PendingOp::SetLimit { .. } => parse_limit(message.text()).map(ChatId),
                _ => parse_chat_id(message.text()),
            }
            .ok_or(GuardError::UnresolvedTarget)?;

            let text = self.execute_chat_op(op, value, user).await?;
            if op == PendingOp::CreateManager {
                session.active_manager = Some(value);
                session.view = PanelView::Home;
            }
            return Ok(text);
        }

        let target = self.targets.resolve_user(message).await.ok_or(GuardError::UnresolvedTarget)?;
        self.reject_self(target).await?;
        self.execute_user_op(op, target).await
    }

    fn authorize_op(&self, user: UserId, op: PendingOp) -> GuardResult<()> {
        if op.owner_only() {
            return self.policy.ensure_super_operator(user);
        }
        match op.manager() {
            Some(manager) => self.policy.ensure_authorized(user, manager),
            None => Ok(()),
        }
    }

    async fn reject_self(&self, target: UserId) -> GuardResult<()> {
        if target == self.platform.bot_user_id().await? {
            Err(GuardError::SelfTargetRejected)
        } else {
            Ok(())
        }
    }

    /// Hierarchy operations keyed by a chat id (or a limit for `SetLimit`)
    async fn execute_chat_op(&self, op: PendingOp, value: ChatId, user: UserId) -> GuardResult<String> {
        match op {
            PendingOp::CreateManager => {
                let title = match self.platform.get_chat(value).await {
                    Ok(chat) => {
                        self.store.upsert_group(value, chat.title.as_deref(), chat.kind)?;
                        chat.title
                    }
                    Err(e) => {
                        debug!(chat = %value, error = %e, "Chat lookup failed");
                        None
                    }
                };
                self.hierarchy.register_manager(value, title.as_deref())?;
                Ok(format!("✅ Manager created: {} ({})", self.hierarchy.manager_title(value)?, value))
            }
            PendingOp::SetLimit { manager } => {
                self.hierarchy.set_child_limit(manager, value.0)?;
                Ok(format!(
                    "✅ Child limit for «{}» set to {}",
                    self.hierarchy.manager_title(manager)?,
                    value.0
                ))
            }
            PendingOp::LinkChild { manager } => {
                let outcome = self.hierarchy.link(manager, value)?;
                Ok(link_text(outcome, &self.hierarchy.manager_title(manager)?, value))
            }
            PendingOp::UnlinkChild { manager } => {
                let former = self.hierarchy.unlink(value)?;
                if former != manager {
                    info!(child = %value, former = %former, active = %manager, "Unlinked child of another manager");
                }
                Ok(format!("✅ Unlinked {} from «{}»", value, self.hierarchy.manager_title(former)?))
            }
            PendingOp::RequestUnlink { manager } => {
                let id = self.hierarchy.request_unlink(manager, value, user)?;
                Ok(format!("📨 Unlink request #{} filed for {}; waiting for owner approval", id, value))
            }
            _ => Err(GuardError::InvalidInput("operation takes a user target".to_string())),
        }
    }

    /// User-targeted operations shared by console flows and group commands
    async fn execute_user_op(&self, op: PendingOp, target: UserId) -> GuardResult<String> {
        match op {
            PendingOp::AddGlobalAdmin => {
                self.policy.add_global_admin(target)?;
                Ok(format!("✅ Added global admin: {}", target))
            }
            PendingOp::AddManagerAdmin { manager } => {
                self.policy.add_manager_admin(manager, target)?;
                Ok(format!("✅ Added admin for «{}»: {}", self.hierarchy.manager_title(manager)?, target))
            }
            PendingOp::AddSafe { manager } => {
                self.policy.add_safe(target, Some(manager))?;
                Ok(format!("✅ Safe added for «{}»: {}", self.hierarchy.manager_title(manager)?, target))
            }
            PendingOp::RemoveSafe { manager } => {
                self.policy.remove_safe(target, Some(manager))?;
                let mut text =
                    format!("➖ Safe removed for «{}»: {}", self.hierarchy.manager_title(manager)?, target);
                if self.config.ban_on_safe_remove {
                    let report = self.executor.apply_over_scope(manager, FanoutOp::Ban, target).await;
                    text.push_str(&format!("\n⛔ Scope ban: {}", report));
                }
                Ok(text)
            }
            PendingOp::BanOne { chat, .. } => {
                self.platform.ban_member(chat, target).await?;
                self.policy.record_ban(target, Some(chat))?;
                Ok(format!("⛔ Banned in «{}»: {}", self.store.group_title(chat)?, target))
            }
            PendingOp::UnbanOne { chat, .. } => {
                self.platform.unban_member(chat, target, true).await?;
                self.policy.clear_ban(target, Some(chat))?;
                Ok(format!("🔓 Unbanned in «{}»: {}", self.store.group_title(chat)?, target))
            }
            PendingOp::GlobalBan { manager } | PendingOp::GlobalUnban { manager } => {
                let (fanout, label) = match op {
                    PendingOp::GlobalBan { .. } => (FanoutOp::Ban, "🌍 Global ban"),
                    _ => (FanoutOp::Unban, "🔓 Global unban"),
                };
                let report = self.executor.apply_over_scope(manager, fanout, target).await;
                Ok(format!(
                    "{} «{}»\nuser={}\n{}",
                    label,
                    self.hierarchy.manager_title(manager)?,
                    target,
                    report
                ))
            }
            _ => Err(GuardError::InvalidInput("operation takes a chat id".to_string())),
        }
    }

    // ===== Invite links =====

    async fn invite_text(&self, chat: ChatId) -> String {
        let title = self.store.group_title(chat).unwrap_or_else(|_| chat.to_string());
        match self.platform.create_invite_link(chat, 1).await {
            Ok(link) => format!("🔗 One-time link for «{}»:\n{}", title, link),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Invite link failed");
                format!("❌ Could not create a link for «{}» (the bot needs invite rights): {}", title, e)
            }
        }
    }

    async fn invite_all_children(&self, manager: ChatId) -> GuardResult<String> {
        let children = self.hierarchy.children(manager)?;
        if children.is_empty() {
            return Ok("No children linked.".to_string());
        }

        let batch: Vec<ChatId> = children.into_iter().take(self.config.invite_batch_limit).collect();
        let mut lines = Vec::with_capacity(batch.len() + 1);
        let mut ok = 0;
        for chat in &batch {
            let title = self.store.group_title(*chat)?;
            match self.platform.create_invite_link(*chat, 1).await {
                Ok(link) => {
                    ok += 1;
                    lines.push(format!("• {}: {}", title, link));
                }
                Err(e) => lines.push(format!("• {}: ❌ {}", title, e)),
            }
        }
        lines.push(format!("\nok={}/{}", ok, batch.len()));
        Ok(lines.join("\n"))
    }

    // ===== Group commands =====

    async fn group_command(&self, message: &InboundMessage, user: UserId) -> GuardResult<Vec<OutboundMessage>> {
        let Some(command) = GroupCommand::parse(message) else {
            return Ok(Vec::new());
        };
        record_counter(CONSOLE_ACTIONS, 1);
        let chat = message.chat.id;
        if let Err(e) = self.store.upsert_group(chat, message.chat.title.as_deref(), message.chat.kind) {
            warn!(chat = %chat, error = %e, "Failed to record group");
        }

        let text = match command {
            GroupCommand::HubOn | GroupCommand::HubOff => {
                self.hub_command(chat, user, command == GroupCommand::HubOn).await?
            }
            GroupCommand::WhoAmI => self.whoami(chat, user)?,
            GroupCommand::SetLimit => {
                if !self.policy.is_super_operator(user) {
                    return Ok(Vec::new());
                }
                let limit = parse_limit(command_args(message))
                    .filter(|l| *l >= 0)
                    .ok_or_else(|| GuardError::InvalidInput("usage: /limit 10".to_string()))?;
                self.hierarchy.register_manager(chat, message.chat.title.as_deref())?;
                self.hierarchy.set_child_limit(chat, limit)?;
                format!("✅ Child limit for this manager set to {}", limit)
            }
            GroupCommand::Link => {
                if !self.policy.is_super_operator(user) && !self.store.is_manager_admin(chat, user)? {
                    return Ok(Vec::new());
                }
                let child = parse_chat_id(command_args(message))
                    .ok_or_else(|| GuardError::InvalidInput("usage: /link -1001234567890".to_string()))?;
                let outcome = self.hierarchy.link(chat, child)?;
                link_text(outcome, &self.hierarchy.manager_title(chat)?, child)
            }
            GroupCommand::Unlink => {
                if !self.policy.is_super_operator(user) {
                    return Ok(Vec::new());
                }
                let child = parse_chat_id(command_args(message))
                    .ok_or_else(|| GuardError::InvalidInput("usage: /unlink -1001234567890".to_string()))?;
                let former = self.hierarchy.unlink(child)?;
                format!("✅ Unlinked {} from «{}»", child, self.hierarchy.manager_title(former)?)
            }
            _ => {
                let effective = self.hierarchy.resolver().resolve_effective(chat)?;
                if !self.policy.is_authorized(user, effective)? {
                    record_counter(CONSOLE_DENIED, 1);
                    return Ok(Vec::new());
                }
                match command {
                    GroupCommand::GuardOn | GroupCommand::GuardOff => {
                        let enabled = command == GroupCommand::GuardOn;
                        self.policy.set_guard(effective, enabled)?;
                        format!(
                            "✅ Guard for «{}»: {}",
                            self.hierarchy.manager_title(effective)?,
                            on_off(enabled)
                        )
                    }
                    _ if command.needs_user() => {
                        let Some(target) = self.targets.resolve_user(message).await else {
                            return Ok(vec![reply(message, UNRESOLVED_USER)]);
                        };
                        self.reject_self(target).await?;
                        let op = group_op(command, effective, chat);
                        self.execute_user_op(op, target).await?
                    }
                    _ => return Ok(Vec::new()),
                }
            }
        };

        Ok(vec![reply(message, text)])
    }

    async fn hub_command(&self, chat: ChatId, user: UserId, enable: bool) -> GuardResult<String> {
        let owner = self.policy.is_super_operator(user);
        let chat_admin = match self.platform.member_status(chat, user).await {
            Ok(status) => status.is_chat_admin(),
            Err(e) => {
                debug!(chat = %chat, user = %user, error = %e, "Member status lookup failed");
                false
            }
        };
        if !owner && !chat_admin && !self.policy.is_global_admin(user)? {
            return Err(GuardError::Unauthorized);
        }

        let text = if enable {
            match self.policy.enable_hub(chat)? {
                HubChange::Enabled => {
                    let effective = self.hierarchy.resolver().resolve_effective(chat)?;
                    self.policy.set_guard(effective, true)?;
                    "✅ Hub enabled here; guard turned on for this chat."
                }
                _ => "Hub is already active here.",
            }
        } else {
            let previous = self.policy.hub()?;
            match (self.policy.disable_hub(chat, owner)?, previous) {
                (HubChange::Disabled, Some(former)) => {
                    let effective = self.hierarchy.resolver().resolve_effective(former)?;
                    self.policy.set_guard(effective, false)?;
                    "✅ Hub disabled; guard turned off for the former hub chat."
                }
                _ => "Hub is not active.",
            }
        };

        let current = self.policy.hub()?.map(|h| h.to_string()).unwrap_or_else(|| "-".to_string());
        Ok(format!("{}\n\nCurrent hub: {}", text, current))
    }

    fn whoami(&self, chat: ChatId, user: UserId) -> GuardResult<String> {
        let manager = self.store.get_manager(chat)?;
        let parent = self.store.manager_for_child(chat)?;
        Ok(format!(
            "whoami\n\
             - chat_id: {}\n\
             - user_id: {}\n\
             - is_owner: {}\n\
             - is_manager_group: {} (limit={})\n\
             - is_manager_admin: {}\n\
             - manager_of_this_chat: {}",
            chat,
            user,
            self.policy.is_super_operator(user),
            manager.is_some(),
            manager.as_ref().map(|m| m.child_limit).unwrap_or(0),
            self.store.is_manager_admin(chat, user)?,
            parent.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        ))
    }
}

fn group_op(command: GroupCommand, manager: ChatId, chat: ChatId) -> PendingOp {
    match command {
        GroupCommand::AddSafe => PendingOp::AddSafe { manager },
        GroupCommand::RemoveSafe => PendingOp::RemoveSafe { manager },
        GroupCommand::Ban => PendingOp::BanOne { manager, chat },
        GroupCommand::Unban => PendingOp::UnbanOne { manager, chat },
        GroupCommand::GlobalUnban => PendingOp::GlobalUnban { manager },
        _ => PendingOp::GlobalBan { manager },
    }
}

fn prompt(op: PendingOp) -> &'static str {
    match op {
        PendingOp::AddGlobalAdmin => "Send the user to add as global admin (reply, mention, or numeric id).",
        PendingOp::AddManagerAdmin { .. } => "Send the user to add as admin of this manager.",
        PendingOp::AddSafe { .. } => "Send the user to add to the safe list.",
        PendingOp::RemoveSafe { .. } => "Send the user to remove from the safe list.",
        PendingOp::BanOne { .. } => "Send the user to ban in the picked chat.",
        PendingOp::UnbanOne { .. } => "Send the user to unban in the picked chat.",
        PendingOp::GlobalBan { .. } => "Send the user to ban across the whole scope.",
        PendingOp::GlobalUnban { .. } => "Send the user to unban across the whole scope.",
        PendingOp::CreateManager => "Send the chat id of the new manager group.",
        PendingOp::SetLimit { .. } => "Send the new child limit (0 = unlimited).",
        PendingOp::LinkChild { .. } => "Send the chat id of the child to link.",
        PendingOp::UnlinkChild { .. } => "Send the chat id of the child to unlink.",
        PendingOp::RequestUnlink { .. } => "Send the chat id of the child to request unlinking.",
    }
}

fn link_text(outcome: LinkOutcome, manager_title: &str, child: ChatId) -> String {
    match outcome {
        LinkOutcome::Linked => format!("✅ Linked {} under «{}»", child, manager_title),
        LinkOutcome::AlreadyLinked => format!("✅ {} was already a child of «{}»", child, manager_title),
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

fn command_args(message: &InboundMessage) -> &str {
    message.text().trim().split_once(char::is_whitespace).map(|(_, rest)| rest).unwrap_or("")
}

fn reply(message: &InboundMessage, text: impl Into<String>) -> OutboundMessage {
    OutboundMessage::text(message.chat.id, text).replying_to(message.message_id)
}

pub(super) fn error_text(error: &GuardError) -> String {
    match error {
        GuardError::Unauthorized => "⛔ Access denied.".to_string(),
        other => format!("❌ {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockPlatform, PlatformChat, PlatformUser};
    use crate::types::Timestamp;

    const OWNER: UserId = UserId(1);
    const ADMIN: UserId = UserId(2);
    const BOT: UserId = UserId(99999);
    const M: ChatId = ChatId(-100);
    const C: ChatId = ChatId(-200);

    fn setup() -> (GuardSqlStore, MockPlatform, Console) {
        let store = GuardSqlStore::memory().unwrap();
        store.upsert_manager(M, Some("Main")).unwrap();
        store.upsert_group(C, Some("Annex"), crate::types::ChatKind::Supergroup).unwrap();
        store.insert_link(C, M, Timestamp::from_millis(1)).unwrap();
        store.add_manager_admin(M, ADMIN).unwrap();
        let platform = MockPlatform::new(BOT);
        let console = Console::new(
            store.clone(),
            PolicyEngine::new(store.clone(), [OWNER]),
            Arc::new(platform.clone()),
            ConsoleConfig::default(),
        );
        (store, platform, console)
    }

    fn text_in(chat: PlatformChat, from: UserId, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: 10,
            chat,
            from: Some(PlatformUser::new(from.0, "op")),
            text: Some(text.to_string()),
            entities: vec![],
            reply_to_user: None,
        }
    }

    fn press(chat: PlatformChat, from: UserId, action: ConsoleAction) -> ButtonPress {
        ButtonPress {
            id: "cb".to_string(),
            from: PlatformUser::new(from.0, "op"),
            chat,
            message_id: 11,
            data: action.to_string(),
        }
    }

    fn group(id: ChatId) -> PlatformChat {
        PlatformChat::group(id.0, "g")
    }

    #[tokio::test]
    async fn test_panel_in_child_binds_manager() {
        let (_, _, console) = setup();
        let replies = console.handle_message(&text_in(group(C), ADMIN, "/panel")).await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("Main"));

        let session = console.sessions().load(ADMIN).unwrap().unwrap();
        assert_eq!(session.active_manager, Some(M));
        assert_eq!(session.role, PanelRole::Admin);
    }

    #[tokio::test]
    async fn test_panel_denied_for_strangers() {
        let (_, _, console) = setup();
        let replies = console.handle_message(&text_in(group(C), UserId(50), "/panel")).await;
        assert!(replies[0].text.contains("Access denied"));
        assert!(console.sessions().load(UserId(50)).unwrap().is_none());

        let private = PlatformChat::private(UserId(50));
        let replies = console.handle_message(&text_in(private, UserId(50), "/panel")).await;
        assert!(replies[0].text.contains("Access denied"));
    }

    #[tokio::test]
    async fn test_private_panel_roles() {
        let (store, _, console) = setup();
        console.handle_message(&text_in(PlatformChat::private(OWNER), OWNER, "/panel")).await;
        let owner = console.sessions().load(OWNER).unwrap().unwrap();
        assert_eq!((owner.role, owner.active_manager), (PanelRole::Owner, None));

        console.handle_message(&text_in(PlatformChat::private(ADMIN), ADMIN, "/panel")).await;
        assert_eq!(console.sessions().load(ADMIN).unwrap().unwrap().active_manager, Some(M));

        store.upsert_manager(ChatId(-300), Some("Other")).unwrap();
        store.add_manager_admin(ChatId(-300), ADMIN).unwrap();
        console.handle_message(&text_in(PlatformChat::private(ADMIN), ADMIN, "/panel")).await;
        let session = console.sessions().load(ADMIN).unwrap().unwrap();
        assert_eq!(session.active_manager, None);
        assert_eq!(session.view, PanelView::ManagerPicker);
    }

    #[tokio::test]
    async fn test_safe_flow_from_private_chat() {
        let (store, _, console) = setup();
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        console.handle_button(&press(group(M), ADMIN, ConsoleAction::StartFlow(FlowKind::AddSafe))).await;

        // unresolvable input keeps the flow open
        let replies = console.handle_message(&text_in(PlatformChat::private(ADMIN), ADMIN, "someone")).await;
        assert!(replies[0].text.contains("User not found"));
        assert!(console.sessions().load(ADMIN).unwrap().unwrap().pending.is_some());

        let replies = console.handle_message(&text_in(PlatformChat::private(ADMIN), ADMIN, "123456")).await;
        assert!(replies[0].text.contains("Safe added"));
        assert!(store.is_safe(UserId(123456), Some(M)).unwrap());
        assert!(console.sessions().load(ADMIN).unwrap().unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn test_self_target_clears_flow() {
        let (_, platform, console) = setup();
        console.handle_message(&text_in(group(M), OWNER, "/panel")).await;
        console.handle_button(&press(group(M), OWNER, ConsoleAction::StartFlow(FlowKind::GlobalBan))).await;

        let replies = console.handle_message(&text_in(group(M), OWNER, &BOT.0.to_string())).await;
        assert!(replies[0].text.contains("bot itself"));
        assert!(platform.bans().is_empty());
        assert!(console.sessions().load(OWNER).unwrap().unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn test_admin_cannot_start_owner_flows() {
        let (_, _, console) = setup();
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        let replies =
            console.handle_button(&press(group(M), ADMIN, ConsoleAction::StartFlow(FlowKind::LinkChild))).await;
        assert!(replies[0].text.contains("Access denied"));
        assert!(console.sessions().load(ADMIN).unwrap().unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn test_ban_one_platform_failure_reports_and_clears() {
        let (store, platform, console) = setup();
        platform.fail_moderation_in(C, crate::platform::PlatformError::Forbidden("no rights".into()));
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        console.handle_button(&press(group(M), ADMIN, ConsoleAction::PickBanChat)).await;
        console.handle_button(&press(group(M), ADMIN, ConsoleAction::BanIn(C))).await;

        let replies = console.handle_message(&text_in(group(M), ADMIN, "555555")).await;
        assert!(replies[0].text.contains("no rights"));
        assert_eq!(store.count_bans().unwrap(), 0);
        assert!(console.sessions().load(ADMIN).unwrap().unwrap().pending.is_none());
    }

    #[tokio::test]
    async fn test_ban_pick_outside_scope_rejected() {
        let (_, _, console) = setup();
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        let replies = console.handle_button(&press(group(M), ADMIN, ConsoleAction::BanIn(ChatId(-999)))).await;
        assert!(replies[0].text.contains("outside this scope"));
    }

    #[tokio::test]
    async fn test_group_commands() {
        let (store, platform, console) = setup();

        let replies = console.handle_message(&text_in(group(C), ADMIN, "on")).await;
        assert!(replies[0].text.contains("ON"));
        assert!(store.is_guard_enabled(M).unwrap());

        // strangers are ignored silently
        assert!(console.handle_message(&text_in(group(C), UserId(50), "off")).await.is_empty());
        assert!(store.is_guard_enabled(M).unwrap());

        let replies = console.handle_message(&text_in(group(C), ADMIN, "ban 777777")).await;
        assert!(replies[0].text.contains("Banned"));
        assert_eq!(platform.bans(), vec![(C, UserId(777777))]);

        let replies = console.handle_message(&text_in(group(C), ADMIN, "gban 888888")).await;
        assert!(replies[0].text.contains("ok=2 fail=0"));
    }

    #[tokio::test]
    async fn test_hub_command_access() {
        let (store, platform, console) = setup();
        let hub = ChatId(-900);

        let replies = console.handle_message(&text_in(group(hub), UserId(50), "hub on")).await;
        assert!(replies[0].text.contains("Access denied"));

        platform.set_member_status(hub, UserId(50), crate::types::MemberStatus::Administrator);
        let replies = console.handle_message(&text_in(group(hub), UserId(50), "hub on")).await;
        assert!(replies[0].text.contains("Hub enabled"));
        assert_eq!(store.hub_chat().unwrap(), Some(hub));
        assert!(store.is_guard_enabled(hub).unwrap());

        let replies = console.handle_message(&text_in(group(C), OWNER, "hub off")).await;
        assert!(replies[0].text.contains("Hub disabled"));
        assert!(!store.is_guard_enabled(hub).unwrap());
    }

    #[tokio::test]
    async fn test_hub_in_child_guards_its_manager() {
        let (store, _, console) = setup();

        let replies = console.handle_message(&text_in(group(C), OWNER, "hub on")).await;
        assert!(replies[0].text.contains("Hub enabled"));
        assert_eq!(store.hub_chat().unwrap(), Some(C));
        assert!(store.is_guard_enabled(M).unwrap());
        assert!(!store.is_guard_enabled(C).unwrap());

        console.handle_message(&text_in(group(C), OWNER, "hub off")).await;
        assert!(!store.is_guard_enabled(M).unwrap());
        assert!(!store.is_guard_enabled(C).unwrap());
    }

    #[tokio::test]
    async fn test_revoked_admin_cannot_complete_flow() {
        let (store, _, console) = setup();
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        console.handle_button(&press(group(M), ADMIN, ConsoleAction::StartFlow(FlowKind::AddSafe))).await;
        store.remove_manager_admin(M, ADMIN).unwrap();

        // denial comes before target parsing, even for unparseable input
        let replies = console.handle_message(&text_in(group(M), ADMIN, "not a target")).await;
        assert!(replies[0].text.contains("Access denied"));
        assert!(console.sessions().load(ADMIN).unwrap().unwrap().pending.is_none());
        assert!(store.list_safe(Some(M)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_removes_manager_admin() {
        let (store, _, console) = setup();
        console.handle_message(&text_in(group(M), OWNER, "/panel")).await;
        let replies = console.handle_button(&press(group(M), OWNER, ConsoleAction::ManageAdmins)).await;
        let remove = ConsoleAction::RemoveManagerAdmin(ADMIN).to_string();
        assert!(replies[0].buttons.iter().flatten().any(|b| b.data == remove));

        // admins cannot remove each other
        console.handle_message(&text_in(group(M), ADMIN, "/panel")).await;
        let replies =
            console.handle_button(&press(group(M), ADMIN, ConsoleAction::RemoveManagerAdmin(ADMIN))).await;
        assert!(replies[0].text.contains("Access denied"));
        assert!(store.is_manager_admin(M, ADMIN).unwrap());

        let replies =
            console.handle_button(&press(group(M), OWNER, ConsoleAction::RemoveManagerAdmin(ADMIN))).await;
        assert!(replies[0].text.contains("no longer an admin"));
        assert!(!store.is_manager_admin(M, ADMIN).unwrap());
        assert!(!replies[1].buttons.iter().flatten().any(|b| b.data == remove));

        let replies =
            console.handle_button(&press(group(M), OWNER, ConsoleAction::RemoveManagerAdmin(ADMIN))).await;
        assert!(replies[0].text.contains("was not an admin"));
    }

    #[tokio::test]
    async fn test_unknown_button_answered() {
        let (_, _, console) = setup();
        let mut p = press(group(M), OWNER, ConsoleAction::Home);
        p.data = "nonsense".to_string();
        let replies = console.handle_button(&p).await;
        assert!(replies[0].text.contains("unknown button"));
    }
}
