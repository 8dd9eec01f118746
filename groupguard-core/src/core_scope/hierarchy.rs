//! Manager registration, child links, limits, and the unlink approval workflow

use super::resolver::ScopeResolver;
use crate::core_store::{GuardSqlStore, ManagerGroup, UnlinkRequest, UnlinkStatus};
use crate::errors::{GuardError, GuardResult};
use crate::metrics::{record_counter, HIERARCHY_LINKS, HIERARCHY_UNLINKS};
use crate::types::{ChatId, Timestamp, UserId};
use tracing::{debug, info};

/// Result of a successful `link`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// The child was already linked to this manager; nothing changed
    AlreadyLinked,
}

/// Enforces the hierarchy invariants on top of the store
///
/// The limit check before insert is not transactional. Two concurrent links
/// can both pass it; the limit is advisory and same-manager duplicates are
/// idempotent, so the overshoot is bounded by the number of racing writers.
#[derive(Clone)]
pub struct HierarchyManager {
    store: GuardSqlStore,
    resolver: ScopeResolver,
}

impl HierarchyManager {
    pub fn new(store: GuardSqlStore) -> Self {
        let resolver = ScopeResolver::new(store.clone());
        Self { store, resolver }
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Register or retitle a manager; an existing child limit is kept
    pub fn register_manager(&self, id: ChatId, title: Option<&str>) -> GuardResult<()> {
        self.store.upsert_manager(id, title)?;
        info!(manager = %id, title = ?title, "Registered manager");
        Ok(())
    }

    pub fn get_manager(&self, id: ChatId) -> GuardResult<ManagerGroup> {
        self.store
            .get_manager(id)?
            .ok_or_else(|| GuardError::NotFound(format!("manager {} is not registered", id)))
    }

    pub fn list_managers(&self) -> GuardResult<Vec<ManagerGroup>> {
        self.store.list_managers()
    }

    /// Overwrite the child limit (0 = unlimited)
    pub fn set_child_limit(&self, manager: ChatId, limit: i64) -> GuardResult<()> {
        if limit < 0 {
            return Err(GuardError::InvalidInput(format!(
                "limit must be zero or positive, got {}",
                limit
            )));
        }
        self.store.set_manager_limit(manager, limit)?;
        info!(manager = %manager, limit, "Set child limit");
        Ok(())
    }

    /// Link `child` under `manager`
    pub fn link(&self, manager: ChatId, child: ChatId) -> GuardResult<LinkOutcome> {
        let record = self.get_manager(manager)?;

        if let Some(current) = self.store.manager_for_child(child)? {
            if current == manager {
                debug!(manager = %manager, child = %child, "Child already linked");
                return Ok(LinkOutcome::AlreadyLinked);
            }
            return Err(GuardError::AlreadyLinkedElsewhere { child, manager: current });
        }

        if child == manager {
            return Err(GuardError::NestedHierarchy(format!(
                "chat {} cannot be linked under itself",
                child
            )));
        }
        if let Some(parent) = self.store.manager_for_child(manager)? {
            return Err(GuardError::NestedHierarchy(format!(
                "manager {} is itself a child of {}",
                manager, parent
            )));
        }
        if self.store.count_children(child)? > 0 {
            return Err(GuardError::NestedHierarchy(format!(
                "chat {} already manages children",
                child
            )));
        }

        if record.child_limit > 0 {
            let count = self.store.count_children(manager)?;
            if count >= record.child_limit {
                return Err(GuardError::LimitExceeded { manager, limit: record.child_limit });
            }
        }

        if !self.store.insert_link(child, manager, Timestamp::now())? {
            // a concurrent writer linked it first
            return match self.store.manager_for_child(child)? {
                Some(current) if current == manager => Ok(LinkOutcome::AlreadyLinked),
                Some(current) => Err(GuardError::AlreadyLinkedElsewhere { child, manager: current }),
                None => Err(GuardError::NotFound(format!("chat {} was unlinked concurrently", child))),
            };
        }
        record_counter(HIERARCHY_LINKS, 1);
        info!(manager = %manager, child = %child, "Linked child");

        Ok(LinkOutcome::Linked)
    }

    /// Detach a child from whichever manager owns it, returning that manager
    pub fn unlink(&self, child: ChatId) -> GuardResult<ChatId> {
        let manager = self
            .store
            .manager_for_child(child)?
            .ok_or_else(|| GuardError::NotFound(format!("chat {} is not linked to any manager", child)))?;

        if !self.store.delete_link(child)? {
            return Err(GuardError::NotFound(format!("chat {} is not linked to any manager", child)));
        }

        record_counter(HIERARCHY_UNLINKS, 1);
        info!(manager = %manager, child = %child, "Unlinked child");
        Ok(manager)
    }

    /// File a pending request to detach `child` from `manager`
    pub fn request_unlink(
        &self,
        manager: ChatId,
        child: ChatId,
        requested_by: UserId,
    ) -> GuardResult<i64> {
        if self.store.manager_for_child(child)? != Some(manager) {
            return Err(GuardError::NotFound(format!(
                "chat {} is not a child of manager {}",
                child, manager
            )));
        }

        let id = self.store.create_unlink_request(manager, child, requested_by, Timestamp::now())?;
        info!(request = id, manager = %manager, child = %child, by = %requested_by, "Unlink requested");
        Ok(id)
    }

    /// Approve a pending request and perform the unlink
    ///
    /// If the child is no longer linked to the requesting manager the request
    /// stays pending and `NotFound` is returned.
    pub fn approve(&self, id: i64) -> GuardResult<UnlinkRequest> {
        let request = self.pending_request(id)?;

        if self.store.manager_for_child(request.child_id)? != Some(request.manager_id) {
            return Err(GuardError::NotFound(format!(
                "chat {} is no longer a child of manager {}",
                request.child_id, request.manager_id
            )));
        }

        if !self.store.approve_unlink_request(id, request.child_id)? {
            return Err(GuardError::RequestAlreadyResolved(id));
        }

        record_counter(HIERARCHY_UNLINKS, 1);
        info!(request = id, manager = %request.manager_id, child = %request.child_id, "Unlink approved");
        Ok(UnlinkRequest { status: UnlinkStatus::Approved, ..request })
    }

    /// Deny a pending request without touching the link
    pub fn deny(&self, id: i64) -> GuardResult<UnlinkRequest> {
        let request = self.pending_request(id)?;

        if !self.store.resolve_unlink_request(id, UnlinkStatus::Denied)? {
            return Err(GuardError::RequestAlreadyResolved(id));
        }

        info!(request = id, "Unlink denied");
        Ok(UnlinkRequest { status: UnlinkStatus::Denied, ..request })
    }

    pub fn pending_requests(&self) -> GuardResult<Vec<UnlinkRequest>> {
        self.store.list_pending_unlink_requests()
    }

    pub fn children(&self, manager: ChatId) -> GuardResult<Vec<ChatId>> {
        Ok(self.store.list_children(manager)?.into_iter().map(|l| l.child_id).collect())
    }

    pub fn scope_set(&self, manager: ChatId) -> GuardResult<Vec<ChatId>> {
        self.resolver.scope_set(manager)
    }

    /// Manager title, falling back to the cached chat title and then the id
    pub fn manager_title(&self, id: ChatId) -> GuardResult<String> {
        match self.store.get_manager(id)?.and_then(|m| m.title) {
            Some(title) if !title.trim().is_empty() => Ok(title),
            _ => self.store.group_title(id),
        }
    }

    fn pending_request(&self, id: i64) -> GuardResult<UnlinkRequest> {
        let request = self
            .store
            .get_unlink_request(id)?
            .ok_or_else(|| GuardError::NotFound(format!("unlink request {}", id)))?;

        if request.status != UnlinkStatus::Pending {
            return Err(GuardError::RequestAlreadyResolved(id));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: ChatId = ChatId(-1000);
    const M2: ChatId = ChatId(-2000);

    fn manager() -> HierarchyManager {
        let hierarchy = HierarchyManager::new(GuardSqlStore::memory().unwrap());
        hierarchy.register_manager(M, Some("Main")).unwrap();
        hierarchy
    }

    #[test]
    fn test_link_unregistered_manager() {
        let hierarchy = manager();
        let err = hierarchy.link(ChatId(-5), ChatId(-6)).unwrap_err();
        assert!(matches!(err, GuardError::NotFound(_)));
    }

    #[test]
    fn test_link_is_idempotent() {
        let hierarchy = manager();
        assert_eq!(hierarchy.link(M, ChatId(-1)).unwrap(), LinkOutcome::Linked);
        assert_eq!(hierarchy.link(M, ChatId(-1)).unwrap(), LinkOutcome::AlreadyLinked);
        assert_eq!(hierarchy.children(M).unwrap(), vec![ChatId(-1)]);
    }

    #[test]
    fn test_idempotent_link_at_limit() {
        let hierarchy = manager();
        hierarchy.set_child_limit(M, 1).unwrap();
        hierarchy.link(M, ChatId(-1)).unwrap();
        assert_eq!(hierarchy.link(M, ChatId(-1)).unwrap(), LinkOutcome::AlreadyLinked);
    }

    #[test]
    fn test_link_elsewhere_rejected() {
        let hierarchy = manager();
        hierarchy.register_manager(M2, None).unwrap();
        hierarchy.link(M, ChatId(-1)).unwrap();

        let err = hierarchy.link(M2, ChatId(-1)).unwrap_err();
        assert_eq!(err, GuardError::AlreadyLinkedElsewhere { child: ChatId(-1), manager: M });
    }

    #[test]
    fn test_single_hop_enforced() {
        let hierarchy = manager();
        hierarchy.register_manager(M2, None).unwrap();

        // self link
        assert!(matches!(hierarchy.link(M, M), Err(GuardError::NestedHierarchy(_))));

        // M2 has a child, so it cannot become a child itself
        hierarchy.link(M2, ChatId(-7)).unwrap();
        assert!(matches!(hierarchy.link(M, M2), Err(GuardError::NestedHierarchy(_))));

        // a manager that is itself a child cannot take children
        hierarchy.unlink(ChatId(-7)).unwrap();
        hierarchy.link(M, M2).unwrap();
        assert!(matches!(hierarchy.link(M2, ChatId(-8)), Err(GuardError::NestedHierarchy(_))));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let hierarchy = manager();
        assert!(matches!(hierarchy.set_child_limit(M, -1), Err(GuardError::InvalidInput(_))));
    }

    #[test]
    fn test_set_limit_registers_manager() {
        let hierarchy = manager();
        hierarchy.set_child_limit(M2, 4).unwrap();
        assert_eq!(hierarchy.get_manager(M2).unwrap().child_limit, 4);
    }

    #[test]
    fn test_unlink_returns_manager() {
        let hierarchy = manager();
        hierarchy.link(M, ChatId(-1)).unwrap();
        assert_eq!(hierarchy.unlink(ChatId(-1)).unwrap(), M);
        assert!(matches!(hierarchy.unlink(ChatId(-1)), Err(GuardError::NotFound(_))));
    }

    #[test]
    fn test_request_unlink_requires_link() {
        let hierarchy = manager();
        let err = hierarchy.request_unlink(M, ChatId(-1), UserId(3)).unwrap_err();
        assert!(matches!(err, GuardError::NotFound(_)));
    }

    #[test]
    fn test_deny_keeps_link() {
        let hierarchy = manager();
        hierarchy.link(M, ChatId(-1)).unwrap();
        let id = hierarchy.request_unlink(M, ChatId(-1), UserId(3)).unwrap();

        let denied = hierarchy.deny(id).unwrap();
        assert_eq!(denied.status, UnlinkStatus::Denied);
        assert_eq!(hierarchy.resolver().resolve_effective(ChatId(-1)).unwrap(), M);
        assert_eq!(hierarchy.approve(id).unwrap_err(), GuardError::RequestAlreadyResolved(id));
    }

    #[test]
    fn test_approve_after_manual_unlink_stays_pending() {
        let hierarchy = manager();
        hierarchy.link(M, ChatId(-1)).unwrap();
        let id = hierarchy.request_unlink(M, ChatId(-1), UserId(3)).unwrap();
        hierarchy.unlink(ChatId(-1)).unwrap();

        assert!(matches!(hierarchy.approve(id), Err(GuardError::NotFound(_))));
        assert_eq!(hierarchy.pending_requests().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_request() {
        let hierarchy = manager();
        assert!(matches!(hierarchy.approve(99), Err(GuardError::NotFound(_))));
        assert!(matches!(hierarchy.deny(99), Err(GuardError::NotFound(_))));
    }

    #[test]
    fn test_manager_title_fallbacks() {
        let hierarchy = manager();
        assert_eq!(hierarchy.manager_title(M).unwrap(), "Main");
        assert_eq!(hierarchy.manager_title(ChatId(-31)).unwrap(), "-31");
    }
}
