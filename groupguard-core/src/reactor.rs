//! Event reactor
//!
//! Routes inbound platform events to the join guard and the console, then
//! delivers console replies. Events are handled strictly one at a time.

use crate::config::Config;
use crate::core_console::Console;
use crate::core_guard::{AuditFormatter, JoinGuard};
use crate::core_policy::PolicyEngine;
use crate::core_store::GuardSqlStore;
use crate::platform::{ButtonPress, ChatPlatform, InboundMessage, MembershipUpdate, OutboundMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(InboundMessage),
    Button(ButtonPress),
    Membership(MembershipUpdate),
}

#[derive(Clone)]
pub struct Reactor {
    guard: JoinGuard,
    console: Console,
    platform: Arc<dyn ChatPlatform>,
}

impl Reactor {
    pub fn new(store: GuardSqlStore, config: &Config, platform: Arc<dyn ChatPlatform>) -> Self {
        let policy = PolicyEngine::new(store.clone(), config.bot.owner_ids.iter().copied());
        let guard = JoinGuard::new(
            store.clone(),
            policy.clone(),
            platform.clone(),
            AuditFormatter::from_config(&config.audit),
        );
        let console = Console::new(store, policy, platform.clone(), config.console.clone());
        Self { guard, console, platform }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Membership(update) => {
                let outcome = self.guard.handle_membership(&update).await;
                debug!(chat = %update.chat.id, user = %update.user.id, outcome = ?outcome, "Membership handled");
            }
            InboundEvent::Message(message) => {
                let replies = self.console.handle_message(&message).await;
                self.deliver(replies).await;
            }
            InboundEvent::Button(press) => {
                if let Err(e) = self.platform.answer_button(&press.id, None).await {
                    debug!(press = %press.id, error = %e, "Button answer failed");
                }
                let replies = self.console.handle_button(&press).await;
                self.deliver(replies).await;
            }
        }
    }

    async fn deliver(&self, replies: Vec<OutboundMessage>) {
        for reply in replies {
            let chat = reply.chat_id;
            if let Err(e) = self.platform.send_message(reply).await {
                warn!(chat = %chat, error = %e, "Reply delivery failed");
            }
        }
    }

    /// Process events until the channel closes or `shutdown` becomes true
    ///
    /// Dropping the shutdown sender also stops the loop.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("Reactor started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reactor shutting down");
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
            }
        }
        info!("Reactor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockPlatform, PlatformChat, PlatformUser};
    use crate::types::{ChatId, MemberStatus, UserId};

    fn reactor() -> (GuardSqlStore, MockPlatform, Reactor) {
        let store = GuardSqlStore::memory().unwrap();
        let platform = MockPlatform::new(UserId(99999));
        let mut config = Config::default();
        config.bot.owner_ids = vec![UserId(1)];
        let reactor = Reactor::new(store.clone(), &config, Arc::new(platform.clone()));
        (store, platform, reactor)
    }

    fn message(chat: PlatformChat, from: i64, text: &str) -> InboundEvent {
        InboundEvent::Message(InboundMessage {
            message_id: 1,
            chat,
            from: Some(PlatformUser::new(from, "op")),
            text: Some(text.to_string()),
            entities: vec![],
            reply_to_user: None,
        })
    }

    #[tokio::test]
    async fn test_replies_are_delivered() {
        let (_, platform, reactor) = reactor();
        reactor.handle_event(message(PlatformChat::private(UserId(1)), 1, "/panel")).await;

        let sent = platform.sent_to(ChatId(1));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("Owner Panel"));
    }

    #[tokio::test]
    async fn test_button_is_answered() {
        let (_, platform, reactor) = reactor();
        reactor
            .handle_event(InboundEvent::Button(ButtonPress {
                id: "press-1".to_string(),
                from: PlatformUser::new(5, "x"),
                chat: PlatformChat::private(UserId(5)),
                message_id: 3,
                data: "home".to_string(),
            }))
            .await;
        assert_eq!(platform.answered(), vec!["press-1".to_string()]);
        assert!(platform.sent_to(ChatId(5))[0].text.contains("/panel"));
    }

    #[tokio::test]
    async fn test_run_processes_in_order_until_closed() {
        let (store, platform, reactor) = reactor();
        store.upsert_manager(ChatId(-100), Some("Main")).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);

        tx.send(message(PlatformChat::group(-100, "Main"), 1, "on")).await.unwrap();
        tx.send(InboundEvent::Membership(MembershipUpdate {
            chat: PlatformChat::group(-100, "Main"),
            user: PlatformUser::new(4242, "intruder"),
            old_status: MemberStatus::Left,
            new_status: MemberStatus::Member,
        }))
        .await
        .unwrap();
        drop(tx);

        reactor.run(rx, stop_rx).await;
        assert_eq!(platform.bans(), vec![(ChatId(-100), UserId(4242))]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_, _, reactor) = reactor();
        let (_tx, rx) = mpsc::channel::<InboundEvent>(1);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { reactor.run(rx, stop_rx).await });
        stop_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
