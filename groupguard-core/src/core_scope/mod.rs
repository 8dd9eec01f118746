//! Manager/child hierarchy and scope resolution
//!
//! A manager group owns zero or more child groups. Every chat resolves to an
//! effective id: its manager when it is a linked child, otherwise itself.
//! Resolution is single-hop and recomputed from the store on every call.

pub mod hierarchy;
pub mod resolver;

pub use hierarchy::{HierarchyManager, LinkOutcome};
pub use resolver::ScopeResolver;
