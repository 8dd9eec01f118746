//! Persistent storage for the moderation core
//!
//! SQLite is the single source of truth for the hierarchy, the policy
//! tables, and operator console sessions. Conflicting writes are resolved
//! with per-key upserts rather than read-then-write sequences.

pub mod migrations;
pub mod model;
pub mod sql_store;

pub use model::{BanEntry, ChildLink, GroupRecord, ManagerGroup, UnlinkRequest, UnlinkStatus};
pub use sql_store::GuardSqlStore;
