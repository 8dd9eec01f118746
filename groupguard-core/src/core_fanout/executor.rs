//! Cascading operation executor
//!
//! Applies one action to every chat of a manager's scope. Each chat is an
//! independent sub-operation: platform call plus the matching bookkeeping
//! write. Failures are counted, never propagated, and the run always returns
//! a report.

use crate::core_policy::PolicyEngine;
use crate::core_scope::ScopeResolver;
use crate::metrics::{
    record_counter, Timer, FANOUT_DURATION, FANOUT_RUNS, FANOUT_TARGETS_FAILED, FANOUT_TARGETS_OK,
};
use crate::platform::ChatPlatform;
use crate::types::{ChatId, UserId};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutOp {
    Ban,
    Unban,
}

impl fmt::Display for FanoutOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutOp::Ban => f.write_str("ban"),
            FanoutOp::Unban => f.write_str("unban"),
        }
    }
}

/// Aggregate outcome of a scope-wide run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub ok_count: usize,
    pub fail_count: usize,
    /// Error of the most recently completed failing member
    pub last_error: Option<String>,
}

impl FanoutReport {
    fn record(&mut self, result: Result<(), String>) {
        match result {
            Ok(()) => self.ok_count += 1,
            Err(e) => {
                self.fail_count += 1;
                self.last_error = Some(e);
            }
        }
    }

    pub fn total(&self) -> usize {
        self.ok_count + self.fail_count
    }
}

impl fmt::Display for FanoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ok={} fail={}", self.ok_count, self.fail_count)?;
        if let Some(err) = &self.last_error {
            write!(f, "\nlast_error={}", err)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ScopeExecutor {
    resolver: ScopeResolver,
    policy: PolicyEngine,
    platform: Arc<dyn ChatPlatform>,
    concurrency: usize,
}

impl ScopeExecutor {
    pub fn new(
        resolver: ScopeResolver,
        policy: PolicyEngine,
        platform: Arc<dyn ChatPlatform>,
        concurrency: usize,
    ) -> Self {
        Self { resolver, policy, platform, concurrency: concurrency.max(1) }
    }

    /// Apply `op` for `user` in the manager and every linked child
    ///
    /// Members are dispatched manager first; completion order is unspecified.
    pub async fn apply_over_scope(&self, manager: ChatId, op: FanoutOp, user: UserId) -> FanoutReport {
        let timer = Timer::new(FANOUT_DURATION);
        record_counter(FANOUT_RUNS, 1);

        let scope = match self.resolver.scope_set(manager) {
            Ok(scope) => scope,
            Err(e) => {
                warn!(manager = %manager, error = %e, "Could not read scope");
                let mut report = FanoutReport::default();
                report.record(Err(e.to_string()));
                return report;
            }
        };

        let report = stream::iter(scope)
            .map(|chat| async move { self.apply_one(chat, op, user).await })
            .buffer_unordered(self.concurrency)
            .fold(FanoutReport::default(), |mut report, result| async move {
                report.record(result);
                report
            })
            .await;

        record_counter(FANOUT_TARGETS_OK, report.ok_count as u64);
        record_counter(FANOUT_TARGETS_FAILED, report.fail_count as u64);
        let elapsed_ms = timer.stop();

        info!(
            manager = %manager,
            user = %user,
            op = %op,
            ok = report.ok_count,
            fail = report.fail_count,
            elapsed_ms,
            "Scope operation finished"
        );
        report
    }

    async fn apply_one(&self, chat: ChatId, op: FanoutOp, user: UserId) -> Result<(), String> {
        let outcome = match op {
            FanoutOp::Ban => match self.platform.ban_member(chat, user).await {
                Ok(()) => self.policy.record_ban(user, Some(chat)).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            FanoutOp::Unban => match self.platform.unban_member(chat, user, true).await {
                Ok(()) => self.policy.clear_ban(user, Some(chat)).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
        };

        outcome.map_err(|e| {
            warn!(chat = %chat, user = %user, op = %op, error = %e, "Scope member failed");
            format!("{}: {}", chat, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::GuardSqlStore;
    use crate::platform::{MockPlatform, PlatformError};
    use crate::types::Timestamp;

    const M: ChatId = ChatId(-100);

    fn setup(children: &[i64]) -> (GuardSqlStore, MockPlatform, ScopeExecutor) {
        let store = GuardSqlStore::memory().unwrap();
        store.upsert_manager(M, None).unwrap();
        for (i, child) in children.iter().enumerate() {
            store.insert_link(ChatId(*child), M, Timestamp::from_millis(i as u64)).unwrap();
        }
        let platform = MockPlatform::new(UserId(999));
        let executor = ScopeExecutor::new(
            ScopeResolver::new(store.clone()),
            PolicyEngine::new(store.clone(), []),
            Arc::new(platform.clone()),
            2,
        );
        (store, platform, executor)
    }

    #[tokio::test]
    async fn test_ban_whole_scope() {
        let (store, platform, executor) = setup(&[-1, -2]);

        let report = executor.apply_over_scope(M, FanoutOp::Ban, UserId(5)).await;
        assert_eq!(report, FanoutReport { ok_count: 3, fail_count: 0, last_error: None });
        assert_eq!(platform.bans().len(), 3);
        assert_eq!(store.count_bans().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (store, platform, executor) = setup(&[-1, -2, -3]);
        platform.fail_moderation_in(ChatId(-2), PlatformError::Forbidden("not admin".into()));

        let report = executor.apply_over_scope(M, FanoutOp::Ban, UserId(5)).await;
        assert_eq!(report.ok_count, 3);
        assert_eq!(report.fail_count, 1);
        assert!(report.last_error.unwrap().contains("not admin"));
        assert!(!store.is_banned(UserId(5), Some(ChatId(-2))).unwrap());
    }

    #[tokio::test]
    async fn test_unban_clears_bookkeeping() {
        let (store, platform, executor) = setup(&[-1]);
        executor.apply_over_scope(M, FanoutOp::Ban, UserId(5)).await;

        let report = executor.apply_over_scope(M, FanoutOp::Unban, UserId(5)).await;
        assert_eq!(report.ok_count, 2);
        assert_eq!(platform.unbans().len(), 2);
        assert_eq!(store.count_bans().unwrap(), 0);
    }

    #[test]
    fn test_report_display() {
        let report = FanoutReport { ok_count: 2, fail_count: 1, last_error: Some("-5: boom".into()) };
        assert_eq!(report.to_string(), "ok=2 fail=1\nlast_error=-5: boom");
        assert_eq!(report.total(), 3);
    }
}
