//! Authorization, guard flags, exemptions, and ban bookkeeping

pub mod engine;

pub use engine::{HubChange, PolicyEngine};
