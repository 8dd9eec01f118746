//! Seam between the moderation core and the messaging platform
//!
//! ```text
//! Reactor / JoinGuard / Console / ScopeExecutor
//!       |
//!       v
//! ChatPlatform (trait)
//!       |
//!       +---> bot API client (deployment)
//!       |
//!       +---> MockPlatform (for testing)
//! ```

pub mod mock;
pub mod provider;
pub mod types;

pub use mock::MockPlatform;
pub use provider::{ChatPlatform, PlatformError, PlatformResult};
pub use types::{
    Button, ButtonPress, EntityKind, InboundMessage, MembershipUpdate, MessageEntity,
    OutboundMessage, PlatformChat, PlatformUser,
};
