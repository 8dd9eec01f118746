//! Effective-scope resolution

use crate::core_store::GuardSqlStore;
use crate::errors::GuardResult;
use crate::types::ChatId;

/// Maps chats to the manager whose policy governs them
#[derive(Clone)]
pub struct ScopeResolver {
    store: GuardSqlStore,
}

impl ScopeResolver {
    pub fn new(store: GuardSqlStore) -> Self {
        Self { store }
    }

    /// The manager of a linked child; any other chat resolves to itself
    pub fn resolve_effective(&self, chat: ChatId) -> GuardResult<ChatId> {
        Ok(self.store.manager_for_child(chat)?.unwrap_or(chat))
    }

    /// `[manager, children...]`, most recently linked child first, without duplicates
    pub fn scope_set(&self, manager: ChatId) -> GuardResult<Vec<ChatId>> {
        let mut scope = vec![manager];
        for link in self.store.list_children(manager)? {
            if !scope.contains(&link.child_id) {
                scope.push(link.child_id);
            }
        }
        Ok(scope)
    }
}
