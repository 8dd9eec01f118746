//! Join guard: bans unexpected joins in guarded scopes and reports them to the hub

pub mod audit;
pub mod join_guard;

pub use audit::{is_valid_timestamp_format, AuditEntry, AuditFormatter};
pub use join_guard::{JoinGuard, JoinOutcome};
