//! Mock ChatPlatform for testing
//!
//! Records every outbound call and lets tests script failures per chat, so
//! guard, fan-out, and console behaviour can be exercised without a live bot.

use super::provider::{ChatPlatform, PlatformError, PlatformResult};
use super::types::{OutboundMessage, PlatformChat};
use crate::types::{ChatId, ChatKind, MemberStatus, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<OutboundMessage>,
    bans: Vec<(ChatId, UserId)>,
    unbans: Vec<(ChatId, UserId)>,
    invites: Vec<(ChatId, String)>,
    answered: Vec<String>,
    chats: HashMap<ChatId, PlatformChat>,
    handles: HashMap<String, UserId>,
    statuses: HashMap<(ChatId, UserId), MemberStatus>,
    failing_moderation: HashMap<ChatId, PlatformError>,
    failing_sends: HashSet<ChatId>,
    failing_invites: HashSet<ChatId>,
    next_message_id: i64,
}

/// Mock platform that records calls instead of talking to a bot API
#[derive(Clone)]
pub struct MockPlatform {
    bot_id: UserId,
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new(bot_id: UserId) -> Self {
        Self { bot_id, state: Arc::new(Mutex::new(MockState::default())) }
    }

    /// Make ban/unban calls in `chat` fail with `error`
    pub fn fail_moderation_in(&self, chat: ChatId, error: PlatformError) {
        self.state.lock().unwrap().failing_moderation.insert(chat, error);
    }

    pub fn fail_sends_to(&self, chat: ChatId) {
        self.state.lock().unwrap().failing_sends.insert(chat);
    }

    pub fn fail_invites_for(&self, chat: ChatId) {
        self.state.lock().unwrap().failing_invites.insert(chat);
    }

    pub fn register_handle(&self, handle: &str, user: UserId) {
        let key = handle.trim_start_matches('@').to_lowercase();
        self.state.lock().unwrap().handles.insert(key, user);
    }

    pub fn register_chat(&self, chat: PlatformChat) {
        self.state.lock().unwrap().chats.insert(chat.id, chat);
    }

    pub fn set_member_status(&self, chat: ChatId, user: UserId, status: MemberStatus) {
        self.state.lock().unwrap().statuses.insert((chat, user), status);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(|m| m.chat_id == chat).collect()
    }

    pub fn bans(&self) -> Vec<(ChatId, UserId)> {
        self.state.lock().unwrap().bans.clone()
    }

    pub fn unbans(&self) -> Vec<(ChatId, UserId)> {
        self.state.lock().unwrap().unbans.clone()
    }

    pub fn invites(&self) -> Vec<(ChatId, String)> {
        self.state.lock().unwrap().invites.clone()
    }

    pub fn answered(&self) -> Vec<String> {
        self.state.lock().unwrap().answered.clone()
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn bot_user_id(&self) -> PlatformResult<UserId> {
        Ok(self.bot_id)
    }

    async fn send_message(&self, message: OutboundMessage) -> PlatformResult<i64> {
        let mut state = self.state.lock().unwrap();
        if state.failing_sends.contains(&message.chat_id) {
            return Err(PlatformError::Forbidden("bot was kicked from the chat".to_string()));
        }
        state.next_message_id += 1;
        state.sent.push(message);
        Ok(state.next_message_id)
    }

    async fn ban_member(&self, chat: ChatId, user: UserId) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failing_moderation.get(&chat) {
            return Err(err.clone());
        }
        state.bans.push((chat, user));
        state.statuses.insert((chat, user), MemberStatus::Kicked);
        Ok(())
    }

    async fn unban_member(
        &self,
        chat: ChatId,
        user: UserId,
        only_if_banned: bool,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.failing_moderation.get(&chat) {
            return Err(err.clone());
        }
        let banned = state.statuses.get(&(chat, user)) == Some(&MemberStatus::Kicked);
        if only_if_banned && !banned {
            return Ok(());
        }
        state.unbans.push((chat, user));
        state.statuses.insert((chat, user), MemberStatus::Left);
        Ok(())
    }

    async fn get_chat(&self, chat: ChatId) -> PlatformResult<PlatformChat> {
        let state = self.state.lock().unwrap();
        Ok(state.chats.get(&chat).cloned().unwrap_or(PlatformChat {
            id: chat,
            kind: if chat.0 < 0 { ChatKind::Supergroup } else { ChatKind::Private },
            title: None,
        }))
    }

    async fn resolve_handle(&self, handle: &str) -> PlatformResult<UserId> {
        let key = handle.trim_start_matches('@').to_lowercase();
        self.state
            .lock()
            .unwrap()
            .handles
            .get(&key)
            .copied()
            .ok_or_else(|| PlatformError::NotFound(format!("chat not found: {}", handle)))
    }

    async fn member_status(&self, chat: ChatId, user: UserId) -> PlatformResult<MemberStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .get(&(chat, user))
            .copied()
            .unwrap_or(MemberStatus::Left))
    }

    async fn create_invite_link(&self, chat: ChatId, member_limit: u32) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.failing_invites.contains(&chat) {
            return Err(PlatformError::Forbidden("not enough rights to invite".to_string()));
        }
        let link = format!(
            "https://t.me/+{}?limit={}",
            uuid::Uuid::new_v4().simple(),
            member_limit
        );
        state.invites.push((chat, link.clone()));
        Ok(link)
    }

    async fn answer_button(&self, press_id: &str, _text: Option<&str>) -> PlatformResult<()> {
        self.state.lock().unwrap().answered.push(press_id.to_string());
        Ok(())
    }
}
