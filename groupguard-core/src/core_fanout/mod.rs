//! Scope-wide ban/unban with per-chat failure isolation

pub mod executor;

pub use executor::{FanoutOp, FanoutReport, ScopeExecutor};
