//! Panel rendering

use super::action::{ConsoleAction, FlowKind};
use super::console::Console;
use super::session::{OperatorSession, PanelRole, PanelView, PickPurpose};
use crate::errors::GuardResult;
use crate::platform::{Button, OutboundMessage};
use crate::types::{ChatId, UserId};

/// Entries shown per list section
const LIST_CAP: usize = 30;

fn button(label: &str, action: ConsoleAction) -> Button {
    Button::new(label, action)
}

/// Back and cancel, the last row of every sub-view
pub(super) fn nav_row() -> Vec<Button> {
    vec![button("⬅️ Back", ConsoleAction::Back), button("✖️ Cancel", ConsoleAction::Cancel)]
}

fn pairs(buttons: Vec<Button>) -> Vec<Vec<Button>> {
    buttons.chunks(2).map(|row| row.to_vec()).collect()
}

fn push_section<T: ToString>(lines: &mut Vec<String>, heading: &str, items: &[T]) {
    lines.push(String::new());
    lines.push(format!("{}: {}", heading, items.len()));
    lines.extend(items.iter().take(LIST_CAP).map(ToString::to_string));
    if items.len() > LIST_CAP {
        lines.push("...".to_string());
    }
}

impl Console {
    /// Render the session's current view into a message for `chat`
    pub(super) fn render(&self, session: &OperatorSession, chat: ChatId) -> GuardResult<OutboundMessage> {
        let (text, rows) = match session.view {
            PanelView::Home => self.home(session)?,
            PanelView::ManagerPicker => self.manager_picker(session)?,
            PanelView::Manage => (
                "🧩 Manage".to_string(),
                vec![
                    vec![
                        button("👮 Admins", ConsoleAction::ManageAdmins),
                        button("🏷 Management", ConsoleAction::ManageHierarchy),
                    ],
                    nav_row(),
                ],
            ),
            PanelView::ManageAdmins => self.manage_admins(session)?,
            PanelView::ManageHierarchy => self.manage_hierarchy(session)?,
            PanelView::Lists => (self.lists(session)?, vec![nav_row()]),
            PanelView::GlobalLists => (self.global_lists()?, vec![nav_row()]),
            PanelView::ChatPicker { purpose } => self.chat_picker(session, purpose)?,
            PanelView::Invites => (
                "🔗 Invite links".to_string(),
                vec![
                    vec![button("🔗 Link for manager", ConsoleAction::InviteManager)],
                    vec![button("🔗 Link for one chat", ConsoleAction::PickInviteChat)],
                    vec![button("🔗 Links for all children", ConsoleAction::InviteAllChildren)],
                    nav_row(),
                ],
            ),
            PanelView::PendingRequests => self.pending_requests()?,
            PanelView::Request { id } => self.request(id)?,
        };
        Ok(OutboundMessage::text(chat, text).with_buttons(rows))
    }

    fn home(&self, session: &OperatorSession) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let heading = match session.role {
            PanelRole::Owner => "Owner Panel",
            PanelRole::Admin => "Admin Panel",
        };

        let Some(manager) = session.active_manager else {
            let mut buttons = vec![button("🎯 Select management", ConsoleAction::SelectContext)];
            if session.role == PanelRole::Owner {
                buttons.push(button("➕ Create management", ConsoleAction::StartFlow(FlowKind::CreateManager)));
                buttons.push(button("👑 Add global admin", ConsoleAction::StartFlow(FlowKind::AddGlobalAdmin)));
                buttons.push(button("📨 Unlink requests", ConsoleAction::PendingRequests));
            }
            buttons.push(button("✖️ Cancel", ConsoleAction::Cancel));
            return Ok((heading.to_string(), buttons.into_iter().map(|b| vec![b]).collect()));
        };

        let guard = self.policy.guard_enabled(manager)?;
        let text = format!(
            "{} (Target: {})\nGuard: {}",
            heading,
            self.hierarchy.manager_title(manager)?,
            if guard { "ON" } else { "OFF" }
        );

        let mut buttons = Vec::new();
        if session.role == PanelRole::Owner {
            buttons.push(button("🧩 Manage", ConsoleAction::Manage));
            buttons.push(button("📨 Unlink requests", ConsoleAction::PendingRequests));
        }
        buttons.extend([
            button("📋 Lists (target)", ConsoleAction::Lists),
            button("📋 Lists (global)", ConsoleAction::GlobalLists),
            button("➕ Add safe", ConsoleAction::StartFlow(FlowKind::AddSafe)),
            button("➖ Remove safe", ConsoleAction::StartFlow(FlowKind::RemoveSafe)),
            button("⛔ Ban (chat)", ConsoleAction::PickBanChat),
            button("✅ Unban (chat)", ConsoleAction::PickUnbanChat),
            button("🌍 Global ban", ConsoleAction::StartFlow(FlowKind::GlobalBan)),
            button("🌍 Global unban", ConsoleAction::StartFlow(FlowKind::GlobalUnban)),
            button("🔗 Links", ConsoleAction::Invites),
            if guard {
                button("🛡 Guard off", ConsoleAction::GuardOff)
            } else {
                button("🛡 Guard on", ConsoleAction::GuardOn)
            },
        ]);
        if session.role == PanelRole::Admin {
            buttons.push(button("🔓 Request unlink", ConsoleAction::StartFlow(FlowKind::RequestUnlink)));
        }
        buttons.push(button("🔄 Refresh", ConsoleAction::Refresh));
        if session.role == PanelRole::Owner {
            buttons.push(button("🏠 Home", ConsoleAction::Home));
        }
        buttons.push(button("✖️ Cancel", ConsoleAction::Cancel));

        Ok((text, pairs(buttons)))
    }

    fn manager_picker(&self, session: &OperatorSession) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let limit = self.config.picker_limit;
        let everything = session.role == PanelRole::Owner || self.policy.is_global_admin(session.user_id)?;

        let mut rows = Vec::new();
        if everything {
            for manager in self.hierarchy.list_managers()?.into_iter().take(limit) {
                let title = self.hierarchy.manager_title(manager.id)?;
                rows.push(vec![button(
                    &format!("{} (limit={})", title, manager.child_limit),
                    ConsoleAction::SetContext(manager.id),
                )]);
            }
        } else {
            for manager in self.policy.managers_for_admin(session.user_id)?.into_iter().take(limit) {
                let title = self.hierarchy.manager_title(manager)?;
                rows.push(vec![button(&title, ConsoleAction::SetContext(manager))]);
            }
        }

        let text = if rows.is_empty() { "No managements registered." } else { "Pick a management:" };
        rows.push(vec![button("✖️ Cancel", ConsoleAction::Cancel)]);
        Ok((text.to_string(), rows))
    }

    fn manage_admins(&self, session: &OperatorSession) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let manager = self.active_manager(session)?;
        let admins = self.store.list_manager_admins(manager)?;
        let mut lines = vec![format!("👮 Admins of «{}»", self.hierarchy.manager_title(manager)?)];
        push_section(&mut lines, "Admins", &admins);

        let mut rows = vec![vec![button(
            "➕ Add admin (this management)",
            ConsoleAction::StartFlow(FlowKind::AddManagerAdmin),
        )]];
        for admin in admins.iter().take(LIST_CAP) {
            rows.push(vec![button(&format!("🗑 Remove {}", admin), ConsoleAction::RemoveManagerAdmin(*admin))]);
        }
        rows.push(nav_row());
        Ok((lines.join("\n"), rows))
    }

    fn manage_hierarchy(&self, session: &OperatorSession) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let manager = self.hierarchy.get_manager(self.active_manager(session)?)?;
        let children = self.hierarchy.children(manager.id)?;
        let limit = if manager.child_limit > 0 { manager.child_limit.to_string() } else { "unlimited".to_string() };

        let mut lines = vec![
            format!("🏷 «{}» ({})", self.hierarchy.manager_title(manager.id)?, manager.id),
            format!("Child limit: {}", limit),
        ];
        let mut labels = Vec::with_capacity(children.len());
        for child in &children {
            labels.push(format!("{} | {}", child, self.store.group_title(*child)?));
        }
        push_section(&mut lines, "Children", &labels);

        let rows = vec![
            vec![button("🔢 Set child limit", ConsoleAction::StartFlow(FlowKind::SetLimit))],
            vec![button("🔗 Link child", ConsoleAction::StartFlow(FlowKind::LinkChild))],
            vec![button("🔓 Unlink child", ConsoleAction::StartFlow(FlowKind::UnlinkChild))],
            nav_row(),
        ];
        Ok((lines.join("\n"), rows))
    }

    fn lists(&self, session: &OperatorSession) -> GuardResult<String> {
        let manager = self.active_manager(session)?;
        let safe = self.policy.list_safe(Some(manager))?;
        let admins = self.store.list_admins()?;
        let bans: Vec<UserId> = self.store.list_bans(Some(manager))?.into_iter().map(|b| b.user_id).collect();
        let groups: Vec<String> = self
            .store
            .list_groups()?
            .into_iter()
            .map(|g| format!("{} | {} | {}", g.chat_id, g.title.as_deref().unwrap_or("-"), g.kind))
            .collect();

        let mut lines = vec![format!("📋 Lists (target={})", manager)];
        push_section(&mut lines, "✅ Safe users", &safe);
        push_section(&mut lines, "🛡️ Admins (global)", &admins);
        push_section(&mut lines, "⛔ Bans (target)", &bans);
        push_section(&mut lines, "👥 Groups", &groups);
        Ok(lines.join("\n"))
    }

    fn global_lists(&self) -> GuardResult<String> {
        let safe = self.policy.list_safe(None)?;
        let bans: Vec<UserId> = self.store.list_bans(None)?.into_iter().map(|b| b.user_id).collect();

        let mut lines = vec!["📋 Lists (global)".to_string()];
        push_section(&mut lines, "✅ Global safe", &safe);
        push_section(&mut lines, "⛔ Global bans", &bans);
        Ok(lines.join("\n"))
    }

    fn chat_picker(
        &self,
        session: &OperatorSession,
        purpose: PickPurpose,
    ) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let manager = self.active_manager(session)?;
        let text = match purpose {
            PickPurpose::Ban => "Pick the chat to ban in:",
            PickPurpose::Unban => "Pick the chat to unban in:",
            PickPurpose::Invite => "Pick the chat for a one-time link:",
        };

        let mut rows = Vec::new();
        for chat in self.hierarchy.scope_set(manager)?.into_iter().take(self.config.picker_limit) {
            let action = match purpose {
                PickPurpose::Ban => ConsoleAction::BanIn(chat),
                PickPurpose::Unban => ConsoleAction::UnbanIn(chat),
                PickPurpose::Invite => ConsoleAction::InviteChild(chat),
            };
            rows.push(vec![button(&self.store.group_title(chat)?, action)]);
        }
        rows.push(nav_row());
        Ok((text.to_string(), rows))
    }

    fn pending_requests(&self) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let requests = self.hierarchy.pending_requests()?;
        let mut rows = Vec::with_capacity(requests.len() + 1);
        for request in &requests {
            rows.push(vec![button(
                &format!("#{} {} ⟵ {}", request.id, request.manager_id, request.child_id),
                ConsoleAction::OpenRequest(request.id),
            )]);
        }
        rows.push(nav_row());

        let text = if requests.is_empty() {
            "No pending unlink requests.".to_string()
        } else {
            format!("📨 Pending unlink requests: {}", requests.len())
        };
        Ok((text, rows))
    }

    fn request(&self, id: i64) -> GuardResult<(String, Vec<Vec<Button>>)> {
        let Some(request) = self.store.get_unlink_request(id)? else {
            return Ok((format!("Unlink request #{} not found.", id), vec![nav_row()]));
        };

        let text = format!(
            "📨 Unlink request #{}\nManagement: «{}» ({})\nChild: «{}» ({})\nRequested by: {}\nStatus: {}",
            request.id,
            self.hierarchy.manager_title(request.manager_id)?,
            request.manager_id,
            self.store.group_title(request.child_id)?,
            request.child_id,
            request.requested_by,
            request.status,
        );
        let rows = vec![
            vec![
                button("✅ Approve", ConsoleAction::Approve(request.id)),
                button("❌ Deny", ConsoleAction::Deny(request.id)),
            ],
            nav_row(),
        ];
        Ok((text, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_capped() {
        let ids: Vec<i64> = (0..40).collect();
        let mut lines = Vec::new();
        push_section(&mut lines, "Safe", &ids);
        assert_eq!(lines[1], "Safe: 40");
        assert_eq!(lines.len(), 2 + LIST_CAP + 1);
        assert_eq!(lines.last().map(String::as_str), Some("..."));
    }

    #[test]
    fn test_pairs_layout() {
        let rows = pairs(vec![
            button("a", ConsoleAction::Home),
            button("b", ConsoleAction::Refresh),
            button("c", ConsoleAction::Cancel),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].data, "cancel");
    }
}
