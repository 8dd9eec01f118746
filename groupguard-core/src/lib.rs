//! Moderation core for a group-chat guard bot
//!
//! Chats are organised into manager/child hierarchies. Policy (guard flag,
//! safe list) lives on the manager and applies to every linked child; bans
//! can be cascaded across a whole scope; operators drive everything through a
//! multi-turn console.

pub mod config;
pub mod core_console;
pub mod core_fanout;
pub mod core_guard;
pub mod core_policy;
pub mod core_scope;
pub mod core_store;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod platform;
pub mod reactor;
pub mod types;

pub use config::Config;
pub use errors::{GuardError, GuardResult};
pub use logging::{init_logging, LogLevel};
pub use reactor::{InboundEvent, Reactor};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = Config::default();
    }
}
