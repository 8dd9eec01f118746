//! Operator console
//!
//! Multi-turn operator workflows driven by `/panel`, inline buttons and
//! follow-up messages, plus the single-turn text commands operators type in
//! group chats. Sessions persist between events so flows survive restarts.

pub mod action;
pub mod commands;
pub mod console;
pub mod session;
pub mod target;
mod views;

pub use action::{ConsoleAction, FlowKind};
pub use commands::GroupCommand;
pub use console::Console;
pub use session::{
    ConsoleState, OperatorSession, PanelRole, PanelView, PendingInput, PendingOp, PickPurpose, SessionStore,
};
pub use target::{parse_chat_id, parse_limit, TargetResolver};
