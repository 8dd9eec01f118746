//! Join-time enforcement
//!
//! Every step talks to the store or the platform on its own and swallows its
//! failure after logging it, so one broken call never hides a join from the
//! hub.

use super::audit::{AuditEntry, AuditFormatter};
use crate::core_policy::PolicyEngine;
use crate::core_scope::HierarchyManager;
use crate::core_store::GuardSqlStore;
use crate::metrics::{record_counter, GUARD_AUDIT_FAILURES, GUARD_BANS, GUARD_BAN_FAILURES, GUARD_JOINS};
use crate::platform::{ChatPlatform, MembershipUpdate, OutboundMessage};
use crate::types::ChatId;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the guard did with one membership update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Not a new join in a group chat
    Ignored,
    SuperOperator,
    GuardDisabled,
    Exempt,
    Banned,
    BanFailed(String),
}

#[derive(Clone)]
pub struct JoinGuard {
    store: GuardSqlStore,
    hierarchy: HierarchyManager,
    policy: PolicyEngine,
    platform: Arc<dyn ChatPlatform>,
    formatter: AuditFormatter,
}

impl JoinGuard {
    pub fn new(
        store: GuardSqlStore,
        policy: PolicyEngine,
        platform: Arc<dyn ChatPlatform>,
        formatter: AuditFormatter,
    ) -> Self {
        let hierarchy = HierarchyManager::new(store.clone());
        Self { store, hierarchy, policy, platform, formatter }
    }

    pub async fn handle_membership(&self, update: &MembershipUpdate) -> JoinOutcome {
        if !update.is_new_join() {
            return JoinOutcome::Ignored;
        }
        let chat = update.chat.id;
        let user = update.user.id;
        record_counter(GUARD_JOINS, 1);

        if let Err(e) = self.store.upsert_group(chat, update.chat.title.as_deref(), update.chat.kind) {
            warn!(chat = %chat, error = %e, "Failed to record group");
        }

        if self.policy.is_super_operator(user) {
            debug!(chat = %chat, user = %user, "Super-operator joined");
            return JoinOutcome::SuperOperator;
        }

        let effective = self.hierarchy.resolver().resolve_effective(chat).unwrap_or_else(|e| {
            warn!(chat = %chat, error = %e, "Scope lookup failed, using the chat itself");
            chat
        });

        // Store failures below fail open
        match self.policy.guard_enabled(effective) {
            Ok(true) => {}
            Ok(false) => return JoinOutcome::GuardDisabled,
            Err(e) => {
                warn!(scope = %effective, error = %e, "Guard flag unreadable");
                return JoinOutcome::GuardDisabled;
            }
        }

        match self.policy.is_exempt(user, effective) {
            Ok(false) => {}
            Ok(true) => {
                debug!(chat = %chat, user = %user, "Exempt user joined");
                return JoinOutcome::Exempt;
            }
            Err(e) => {
                warn!(scope = %effective, user = %user, error = %e, "Safe list unreadable");
                return JoinOutcome::Exempt;
            }
        }

        let ban_error = match self.platform.ban_member(chat, user).await {
            Ok(()) => {
                record_counter(GUARD_BANS, 1);
                if let Err(e) = self.policy.record_ban(user, Some(chat)) {
                    warn!(chat = %chat, user = %user, error = %e, "Failed to record ban");
                }
                info!(chat = %chat, scope = %effective, user = %user, "Join blocked");
                None
            }
            Err(e) => {
                record_counter(GUARD_BAN_FAILURES, 1);
                warn!(chat = %chat, user = %user, error = %e, "Ban on join failed");
                Some(e.to_string())
            }
        };

        self.send_audit(update, effective, ban_error.clone()).await;

        match ban_error {
            None => JoinOutcome::Banned,
            Some(e) => JoinOutcome::BanFailed(e),
        }
    }

    async fn send_audit(&self, update: &MembershipUpdate, manager: ChatId, ban_error: Option<String>) {
        let hub = match self.policy.hub() {
            Ok(Some(hub)) => hub,
            Ok(None) => {
                debug!("No hub configured, audit skipped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Hub lookup failed");
                return;
            }
        };

        let title = |id: ChatId| self.store.group_title(id).unwrap_or_else(|_| id.to_string());
        let manager_title = self.hierarchy.manager_title(manager).unwrap_or_else(|_| manager.to_string());
        let entry = AuditEntry {
            offender_name: update.user.display_name(),
            offender_id: update.user.id,
            offender_handle: update.user.handle(),
            manager_title,
            manager_id: manager,
            child_title: update.chat.title.clone().unwrap_or_else(|| title(update.chat.id)),
            child_id: update.chat.id,
            at: Utc::now(),
            ban_error,
        };

        let message = OutboundMessage::text(hub, self.formatter.render(&entry));
        if let Err(e) = self.platform.send_message(message).await {
            record_counter(GUARD_AUDIT_FAILURES, 1);
            warn!(hub = %hub, error = %e, "Audit delivery failed");
        }
    }
}
