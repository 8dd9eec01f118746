//! Hierarchy and scope behaviour across the store, resolver and manager

use groupguard_core::core_scope::{HierarchyManager, LinkOutcome};
use groupguard_core::core_store::{GuardSqlStore, UnlinkStatus};
use groupguard_core::types::{ChatId, UserId};
use groupguard_core::GuardError;
use proptest::prelude::*;

const M1: ChatId = ChatId(-100);
const M2: ChatId = ChatId(-200);

fn hierarchy() -> (GuardSqlStore, HierarchyManager) {
    let store = GuardSqlStore::memory().unwrap();
    let hierarchy = HierarchyManager::new(store.clone());
    hierarchy.register_manager(M1, Some("North")).unwrap();
    hierarchy.register_manager(M2, Some("South")).unwrap();
    (store, hierarchy)
}

#[test]
fn test_limit_then_raise() {
    let (_, hierarchy) = hierarchy();
    hierarchy.set_child_limit(M1, 2).unwrap();

    hierarchy.link(M1, ChatId(-1)).unwrap();
    hierarchy.link(M1, ChatId(-2)).unwrap();
    assert_eq!(
        hierarchy.link(M1, ChatId(-3)),
        Err(GuardError::LimitExceeded { manager: M1, limit: 2 })
    );

    // relinking at the limit stays idempotent
    assert_eq!(hierarchy.link(M1, ChatId(-1)).unwrap(), LinkOutcome::AlreadyLinked);

    hierarchy.set_child_limit(M1, 3).unwrap();
    assert_eq!(hierarchy.link(M1, ChatId(-3)).unwrap(), LinkOutcome::Linked);
    assert_eq!(hierarchy.children(M1).unwrap().len(), 3);
}

#[test]
fn test_single_manager_per_child() {
    let (_, hierarchy) = hierarchy();
    hierarchy.link(M1, ChatId(-1)).unwrap();

    assert_eq!(hierarchy.link(M1, ChatId(-1)).unwrap(), LinkOutcome::AlreadyLinked);
    assert_eq!(
        hierarchy.link(M2, ChatId(-1)),
        Err(GuardError::AlreadyLinkedElsewhere { child: ChatId(-1), manager: M1 })
    );
    assert_eq!(hierarchy.resolver().resolve_effective(ChatId(-1)).unwrap(), M1);
}

#[test]
fn test_no_nesting() {
    let (_, hierarchy) = hierarchy();
    hierarchy.link(M1, ChatId(-1)).unwrap();

    assert!(matches!(hierarchy.link(ChatId(-1), ChatId(-5)), Err(GuardError::NotFound(_))));
    assert!(matches!(hierarchy.link(M2, M1), Err(GuardError::NestedHierarchy(_))));
    assert!(matches!(hierarchy.link(M1, M1), Err(GuardError::NestedHierarchy(_))));
}

#[test]
fn test_unlink_missing_child() {
    let (_, hierarchy) = hierarchy();
    assert!(matches!(hierarchy.unlink(ChatId(-42)), Err(GuardError::NotFound(_))));

    hierarchy.link(M1, ChatId(-42)).unwrap();
    assert_eq!(hierarchy.unlink(ChatId(-42)).unwrap(), M1);
    assert_eq!(hierarchy.resolver().resolve_effective(ChatId(-42)).unwrap(), ChatId(-42));
}

#[test]
fn test_unlink_request_lifecycle() {
    let (store, hierarchy) = hierarchy();
    hierarchy.link(M1, ChatId(-1)).unwrap();

    let id = hierarchy.request_unlink(M1, ChatId(-1), UserId(7)).unwrap();
    assert_eq!(hierarchy.pending_requests().unwrap().len(), 1);

    let approved = hierarchy.approve(id).unwrap();
    assert_eq!(approved.status, UnlinkStatus::Approved);
    assert_eq!(store.manager_for_child(ChatId(-1)).unwrap(), None);

    assert_eq!(hierarchy.approve(id), Err(GuardError::RequestAlreadyResolved(id)));
    assert_eq!(hierarchy.deny(id), Err(GuardError::RequestAlreadyResolved(id)));
    assert!(hierarchy.pending_requests().unwrap().is_empty());
}

#[test]
fn test_approve_after_manual_unlink_keeps_request() {
    let (_, hierarchy) = hierarchy();
    hierarchy.link(M1, ChatId(-1)).unwrap();
    let id = hierarchy.request_unlink(M1, ChatId(-1), UserId(7)).unwrap();

    hierarchy.unlink(ChatId(-1)).unwrap();
    assert!(matches!(hierarchy.approve(id), Err(GuardError::NotFound(_))));
    assert_eq!(hierarchy.pending_requests().unwrap()[0].id, id);

    assert_eq!(hierarchy.deny(id).unwrap().status, UnlinkStatus::Denied);
}

#[test]
fn test_scope_set_starts_with_manager() {
    let (_, hierarchy) = hierarchy();
    assert_eq!(hierarchy.scope_set(M2).unwrap(), vec![M2]);

    hierarchy.link(M1, ChatId(-1)).unwrap();
    hierarchy.link(M1, ChatId(-2)).unwrap();
    let scope = hierarchy.scope_set(M1).unwrap();
    assert_eq!(scope[0], M1);
    assert_eq!(scope.len(), 3);
    assert!(scope.contains(&ChatId(-1)) && scope.contains(&ChatId(-2)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_resolve_is_idempotent(children in proptest::collection::vec(-99i64..=-1, 0..12), probe in -120i64..=-1) {
        let (_, hierarchy) = hierarchy();
        for child in &children {
            let _ = hierarchy.link(M1, ChatId(*child));
        }

        let resolver = hierarchy.resolver();
        let once = resolver.resolve_effective(ChatId(probe)).unwrap();
        let twice = resolver.resolve_effective(once).unwrap();
        prop_assert_eq!(once, twice);

        if children.contains(&probe) {
            prop_assert_eq!(once, M1);
        }
    }

    #[test]
    fn prop_scope_has_no_duplicates(children in proptest::collection::vec(-99i64..=-1, 0..12)) {
        let (_, hierarchy) = hierarchy();
        for child in &children {
            let _ = hierarchy.link(M1, ChatId(*child));
        }

        let scope = hierarchy.scope_set(M1).unwrap();
        let mut unique = scope.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), scope.len());
        prop_assert_eq!(scope[0], M1);
    }
}
