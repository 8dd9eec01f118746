//! Access/policy engine
//!
//! Policy rows are keyed by effective (manager) ids. Callers resolve the chat
//! first; the engine never resolves on its own.

use crate::core_store::GuardSqlStore;
use crate::errors::{GuardError, GuardResult};
use crate::types::{ChatId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a hub toggle that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubChange {
    Enabled,
    Disabled,
    /// The requested state was already in effect
    Unchanged,
}

#[derive(Clone)]
pub struct PolicyEngine {
    store: GuardSqlStore,
    owners: Arc<HashSet<UserId>>,
}

impl PolicyEngine {
    pub fn new(store: GuardSqlStore, owners: impl IntoIterator<Item = UserId>) -> Self {
        Self { store, owners: Arc::new(owners.into_iter().collect()) }
    }

    pub fn is_super_operator(&self, user: UserId) -> bool {
        self.owners.contains(&user)
    }

    pub fn is_global_admin(&self, user: UserId) -> GuardResult<bool> {
        self.store.is_admin(user)
    }

    /// Super-operator, legacy global admin, or admin of `manager`
    pub fn is_authorized(&self, user: UserId, manager: ChatId) -> GuardResult<bool> {
        if self.is_super_operator(user) {
            return Ok(true);
        }
        if self.store.is_admin(user)? {
            return Ok(true);
        }
        self.store.is_manager_admin(manager, user)
    }

    /// `Unauthorized` unless `is_authorized`
    pub fn ensure_authorized(&self, user: UserId, manager: ChatId) -> GuardResult<()> {
        if self.is_authorized(user, manager)? {
            Ok(())
        } else {
            debug!(user = %user, manager = %manager, "Authorization denied");
            Err(GuardError::Unauthorized)
        }
    }

    pub fn ensure_super_operator(&self, user: UserId) -> GuardResult<()> {
        if self.is_super_operator(user) {
            Ok(())
        } else {
            Err(GuardError::Unauthorized)
        }
    }

    // ===== Guard flag =====

    pub fn guard_enabled(&self, effective: ChatId) -> GuardResult<bool> {
        self.store.is_guard_enabled(effective)
    }

    pub fn set_guard(&self, effective: ChatId, enabled: bool) -> GuardResult<()> {
        self.store.set_guard_enabled(effective, enabled)?;
        info!(scope = %effective, enabled, "Guard toggled");
        Ok(())
    }

    // ===== Safe list =====

    /// Global entry or an entry scoped to `effective`
    pub fn is_exempt(&self, user: UserId, effective: ChatId) -> GuardResult<bool> {
        self.store.is_safe(user, Some(effective))
    }

    /// `scope == None` adds a global exemption
    pub fn add_safe(&self, user: UserId, scope: Option<ChatId>) -> GuardResult<()> {
        self.store.add_safe(user, scope)?;
        info!(user = %user, scope = ?scope.map(|c| c.0), "Safe entry added");
        Ok(())
    }

    pub fn remove_safe(&self, user: UserId, scope: Option<ChatId>) -> GuardResult<bool> {
        let removed = self.store.remove_safe(user, scope)?;
        info!(user = %user, scope = ?scope.map(|c| c.0), removed, "Safe entry removed");
        Ok(removed)
    }

    pub fn list_safe(&self, scope: Option<ChatId>) -> GuardResult<Vec<UserId>> {
        self.store.list_safe(scope)
    }

    // ===== Ban bookkeeping =====

    pub fn record_ban(&self, user: UserId, chat: Option<ChatId>) -> GuardResult<()> {
        self.store.add_ban(user, chat)
    }

    pub fn clear_ban(&self, user: UserId, chat: Option<ChatId>) -> GuardResult<()> {
        self.store.remove_ban(user, chat).map(|_| ())
    }

    // ===== Admins =====

    pub fn add_global_admin(&self, user: UserId) -> GuardResult<()> {
        self.store.add_admin(user)?;
        info!(user = %user, "Global admin added");
        Ok(())
    }

    pub fn add_manager_admin(&self, manager: ChatId, user: UserId) -> GuardResult<()> {
        if !self.store.is_manager(manager)? {
            return Err(GuardError::NotFound(format!("manager {} is not registered", manager)));
        }
        self.store.add_manager_admin(manager, user)?;
        info!(manager = %manager, user = %user, "Manager admin added");
        Ok(())
    }

    pub fn remove_manager_admin(&self, manager: ChatId, user: UserId) -> GuardResult<bool> {
        let removed = self.store.remove_manager_admin(manager, user)?;
        info!(manager = %manager, user = %user, removed, "Manager admin removed");
        Ok(removed)
    }

    pub fn managers_for_admin(&self, user: UserId) -> GuardResult<Vec<ChatId>> {
        self.store.list_managers_for_admin(user)
    }

    // ===== Hub =====

    pub fn hub(&self) -> GuardResult<Option<ChatId>> {
        self.store.hub_chat()
    }

    /// Make `chat` the hub; fails while another chat holds it
    pub fn enable_hub(&self, chat: ChatId) -> GuardResult<HubChange> {
        match self.store.hub_chat()? {
            Some(current) if current == chat => Ok(HubChange::Unchanged),
            Some(current) => Err(GuardError::InvalidInput(format!(
                "hub is already active in {}",
                current
            ))),
            None => {
                self.store.set_hub_chat(Some(chat))?;
                info!(hub = %chat, "Hub enabled");
                Ok(HubChange::Enabled)
            }
        }
    }

    /// Clear the hub from the hub chat itself, or from anywhere when `override_owner`
    pub fn disable_hub(&self, chat: ChatId, override_owner: bool) -> GuardResult<HubChange> {
        match self.store.hub_chat()? {
            None => Ok(HubChange::Unchanged),
            Some(current) if current != chat && !override_owner => Err(GuardError::InvalidInput(
                format!("hub is active in another chat: {}", current),
            )),
            Some(current) => {
                self.store.set_hub_chat(None)?;
                info!(hub = %current, by_chat = %chat, "Hub disabled");
                Ok(HubChange::Disabled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = UserId(1);
    const M: ChatId = ChatId(-100);

    fn engine() -> (GuardSqlStore, PolicyEngine) {
        let store = GuardSqlStore::memory().unwrap();
        store.upsert_manager(M, Some("Main")).unwrap();
        (store.clone(), PolicyEngine::new(store, [OWNER]))
    }

    #[test]
    fn test_authorization_branches() {
        let (_, engine) = engine();
        assert!(engine.is_authorized(OWNER, M).unwrap());
        assert!(!engine.is_authorized(UserId(2), M).unwrap());

        engine.add_manager_admin(M, UserId(2)).unwrap();
        assert!(engine.is_authorized(UserId(2), M).unwrap());
        assert!(!engine.is_authorized(UserId(2), ChatId(-200)).unwrap());

        engine.add_global_admin(UserId(3)).unwrap();
        assert!(engine.is_authorized(UserId(3), ChatId(-200)).unwrap());

        assert_eq!(engine.ensure_authorized(UserId(4), M), Err(GuardError::Unauthorized));
    }

    #[test]
    fn test_manager_admin_requires_manager() {
        let (_, engine) = engine();
        assert!(matches!(
            engine.add_manager_admin(ChatId(-5), UserId(2)),
            Err(GuardError::NotFound(_))
        ));
    }

    #[test]
    fn test_guard_defaults_off() {
        let (_, engine) = engine();
        assert!(!engine.guard_enabled(M).unwrap());
        engine.set_guard(M, true).unwrap();
        assert!(engine.guard_enabled(M).unwrap());
    }

    #[test]
    fn test_exemption_scopes() {
        let (_, engine) = engine();
        let user = UserId(9);

        engine.add_safe(user, Some(M)).unwrap();
        assert!(engine.is_exempt(user, M).unwrap());
        assert!(!engine.is_exempt(user, ChatId(-200)).unwrap());

        engine.add_safe(user, None).unwrap();
        assert!(engine.is_exempt(user, ChatId(-200)).unwrap());

        engine.remove_safe(user, None).unwrap();
        assert!(!engine.is_exempt(user, ChatId(-200)).unwrap());
        assert!(engine.is_exempt(user, M).unwrap());
    }

    #[test]
    fn test_hub_set_once() {
        let (_, engine) = engine();
        assert_eq!(engine.enable_hub(ChatId(-10)).unwrap(), HubChange::Enabled);
        assert_eq!(engine.enable_hub(ChatId(-10)).unwrap(), HubChange::Unchanged);
        assert!(matches!(engine.enable_hub(ChatId(-11)), Err(GuardError::InvalidInput(_))));
        assert_eq!(engine.hub().unwrap(), Some(ChatId(-10)));
    }

    #[test]
    fn test_hub_clear_rules() {
        let (_, engine) = engine();
        assert_eq!(engine.disable_hub(ChatId(-10), false).unwrap(), HubChange::Unchanged);

        engine.enable_hub(ChatId(-10)).unwrap();
        assert!(engine.disable_hub(ChatId(-11), false).is_err());
        assert_eq!(engine.disable_hub(ChatId(-11), true).unwrap(), HubChange::Disabled);
        assert_eq!(engine.hub().unwrap(), None);
    }
}
