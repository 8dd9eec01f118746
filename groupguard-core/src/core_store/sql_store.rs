//! SQL-based storage implementation for the moderation core

use super::model::{BanEntry, ChildLink, GroupRecord, ManagerGroup, UnlinkRequest, UnlinkStatus};
use crate::config::StoreConfig;
use crate::errors::{GuardError, GuardResult};
use crate::types::{ChatId, ChatKind, Timestamp, UserId};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

/// Key of the hub destination in `app_settings`
pub const HUB_SETTING_KEY: &str = "hub_chat_id";

/// SQL-based storage for hierarchy, policy, and console session state
#[derive(Clone)]
pub struct GuardSqlStore {
    pool: Pool<SqliteConnectionManager>,
}

impl GuardSqlStore {
    /// Create a new SQL store with the given connection pool
    pub fn new(pool: Pool<SqliteConnectionManager>) -> GuardResult<Self> {
        super::migrations::migrate(&pool)?;

        Ok(Self { pool })
    }

    /// Open (or create) the database file described by the store configuration
    pub fn open(config: &StoreConfig) -> GuardResult<Self> {
        let enable_wal = config.enable_wal;
        let busy_timeout = config.busy_timeout;

        let manager = SqliteConnectionManager::file(&config.db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            if enable_wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .build(manager)
            .map_err(|e| GuardError::Store(format!("Failed to create connection pool: {}", e)))?;

        debug!(path = %config.db_path.display(), "Opened moderation store");
        Self::new(pool)
    }

    /// Create a new in-memory store
    ///
    /// Each in-memory connection is its own database, so the pool holds exactly one.
    pub fn memory() -> GuardResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| GuardError::Store(format!("Failed to create pool: {}", e)))?;

        Self::new(pool)
    }

    // ===== Schema =====

    /// Applied schema version and the newest one this build knows
    pub fn schema_version(&self) -> GuardResult<(i32, i32)> {
        Ok((super::migrations::get_current_version(&self.pool)?, super::migrations::get_latest_version()))
    }

    pub fn rollback_schema(&self, target_version: i32) -> GuardResult<()> {
        super::migrations::rollback(&self.pool, target_version)
    }

    // ===== Settings =====

    pub fn get_setting(&self, key: &str) -> GuardResult<Option<String>> {
        let conn = self.pool.get()?;
        let value: Option<Option<String>> = conn
            .query_row("SELECT value FROM app_settings WHERE key = ? LIMIT 1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO app_settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Hub destination; a stored `0` or unparsable value means no hub
    pub fn hub_chat(&self) -> GuardResult<Option<ChatId>> {
        let raw = self.get_setting(HUB_SETTING_KEY)?;
        Ok(raw
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id != 0)
            .map(ChatId))
    }

    pub fn set_hub_chat(&self, chat: Option<ChatId>) -> GuardResult<()> {
        let value = chat.map(|c| c.0).unwrap_or(0).to_string();
        self.set_setting(HUB_SETTING_KEY, &value)
    }

    // ===== Legacy global admins =====

    pub fn add_admin(&self, user: UserId) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute("INSERT OR IGNORE INTO admins (user_id) VALUES (?)", params![user.0])?;
        Ok(())
    }

    pub fn is_admin(&self, user: UserId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row("SELECT 1 FROM admins WHERE user_id = ? LIMIT 1", params![user.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_admins(&self) -> GuardResult<Vec<UserId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT user_id FROM admins ORDER BY user_id ASC")?;
        let admins = stmt
            .query_map([], |row| Ok(UserId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(admins)
    }

    // ===== Observed chats =====

    /// Record a chat; a missing title never overwrites a known one
    pub fn upsert_group(&self, chat: ChatId, title: Option<&str>, kind: ChatKind) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO groups (chat_id, title, chat_type) VALUES (?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                title = COALESCE(excluded.title, groups.title),
                chat_type = excluded.chat_type",
            params![chat.0, title, kind.as_str()],
        )?;
        Ok(())
    }

    pub fn get_group(&self, chat: ChatId) -> GuardResult<Option<GroupRecord>> {
        let conn = self.pool.get()?;
        let group = conn
            .query_row(
                "SELECT chat_id, title, chat_type FROM groups WHERE chat_id = ? LIMIT 1",
                params![chat.0],
                group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    /// Title of an observed chat, or its numeric id when unknown
    pub fn group_title(&self, chat: ChatId) -> GuardResult<String> {
        Ok(self
            .get_group(chat)?
            .and_then(|g| g.title)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| chat.to_string()))
    }

    pub fn list_groups(&self) -> GuardResult<Vec<GroupRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, title, chat_type FROM groups ORDER BY title ASC, chat_id ASC",
        )?;
        let groups = stmt.query_map([], group_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    // ===== Guard flag =====

    pub fn set_guard_enabled(&self, chat: ChatId, enabled: bool) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO guard_settings (chat_id, guard_enabled) VALUES (?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET guard_enabled = excluded.guard_enabled",
            params![chat.0, enabled],
        )?;
        Ok(())
    }

    pub fn is_guard_enabled(&self, chat: ChatId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let enabled: Option<bool> = conn
            .query_row(
                "SELECT guard_enabled FROM guard_settings WHERE chat_id = ? LIMIT 1",
                params![chat.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    // ===== Safe list =====

    pub fn add_safe(&self, user: UserId, scope: Option<ChatId>) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO safe_users (user_id, chat_id) VALUES (?, ?)",
            params![user.0, scope.map(|c| c.0)],
        )?;
        Ok(())
    }

    /// Returns whether an entry was removed
    pub fn remove_safe(&self, user: UserId, scope: Option<ChatId>) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM safe_users WHERE user_id = ? AND chat_id IS ?",
            params![user.0, scope.map(|c| c.0)],
        )?;
        Ok(removed > 0)
    }

    /// True if a global entry or an entry for exactly `scope` exists
    pub fn is_safe(&self, user: UserId, scope: Option<ChatId>) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM safe_users
                 WHERE user_id = ? AND (chat_id IS ? OR chat_id IS NULL) LIMIT 1",
                params![user.0, scope.map(|c| c.0)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_safe(&self, scope: Option<ChatId>) -> GuardResult<Vec<UserId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM safe_users WHERE chat_id IS ? ORDER BY user_id ASC")?;
        let users = stmt
            .query_map(params![scope.map(|c| c.0)], |row| Ok(UserId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ===== Ban bookkeeping =====

    pub fn add_ban(&self, user: UserId, chat: Option<ChatId>) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO bans (user_id, chat_id) VALUES (?, ?)",
            params![user.0, chat.map(|c| c.0)],
        )?;
        Ok(())
    }

    pub fn remove_ban(&self, user: UserId, chat: Option<ChatId>) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM bans WHERE user_id = ? AND chat_id IS ?",
            params![user.0, chat.map(|c| c.0)],
        )?;
        Ok(removed > 0)
    }

    pub fn is_banned(&self, user: UserId, chat: Option<ChatId>) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM bans WHERE user_id = ? AND (chat_id IS ? OR chat_id IS NULL) LIMIT 1",
                params![user.0, chat.map(|c| c.0)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_bans(&self, chat: Option<ChatId>) -> GuardResult<Vec<BanEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, chat_id FROM bans WHERE chat_id IS ? ORDER BY user_id ASC",
        )?;
        let bans = stmt
            .query_map(params![chat.map(|c| c.0)], |row| {
                Ok(BanEntry {
                    user_id: UserId(row.get(0)?),
                    chat_id: row.get::<_, Option<i64>>(1)?.map(ChatId),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(bans)
    }

    /// Total number of ban bookkeeping rows
    pub fn count_bans(&self) -> GuardResult<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM bans", [], |row| row.get(0))?)
    }

    // ===== Managers =====

    /// Insert or retitle a manager; the child limit of an existing row is preserved
    pub fn upsert_manager(&self, id: ChatId, title: Option<&str>) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO manager_groups (manager_id, title, child_limit) VALUES (?, ?, 0)
             ON CONFLICT(manager_id) DO UPDATE SET title = COALESCE(excluded.title, manager_groups.title)",
            params![id.0, title],
        )?;
        Ok(())
    }

    pub fn get_manager(&self, id: ChatId) -> GuardResult<Option<ManagerGroup>> {
        let conn = self.pool.get()?;
        let manager = conn
            .query_row(
                "SELECT manager_id, title, child_limit FROM manager_groups WHERE manager_id = ? LIMIT 1",
                params![id.0],
                manager_from_row,
            )
            .optional()?;
        Ok(manager)
    }

    pub fn is_manager(&self, id: ChatId) -> GuardResult<bool> {
        Ok(self.get_manager(id)?.is_some())
    }

    pub fn list_managers(&self) -> GuardResult<Vec<ManagerGroup>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT manager_id, title, child_limit FROM manager_groups ORDER BY manager_id DESC",
        )?;
        let managers = stmt.query_map([], manager_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(managers)
    }

    /// Overwrite the child limit, creating the manager row if needed
    pub fn set_manager_limit(&self, id: ChatId, limit: i64) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO manager_groups (manager_id, title, child_limit) VALUES (?, NULL, ?)
             ON CONFLICT(manager_id) DO UPDATE SET child_limit = excluded.child_limit",
            params![id.0, limit],
        )?;
        Ok(())
    }

    // ===== Manager admins =====

    pub fn add_manager_admin(&self, manager: ChatId, user: UserId) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO manager_admins (manager_id, user_id) VALUES (?, ?)",
            params![manager.0, user.0],
        )?;
        Ok(())
    }

    pub fn remove_manager_admin(&self, manager: ChatId, user: UserId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM manager_admins WHERE manager_id = ? AND user_id = ?",
            params![manager.0, user.0],
        )?;
        Ok(removed > 0)
    }

    pub fn is_manager_admin(&self, manager: ChatId, user: UserId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM manager_admins WHERE manager_id = ? AND user_id = ? LIMIT 1",
                params![manager.0, user.0],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_manager_admins(&self, manager: ChatId) -> GuardResult<Vec<UserId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM manager_admins WHERE manager_id = ? ORDER BY user_id ASC",
        )?;
        let admins = stmt
            .query_map(params![manager.0], |row| Ok(UserId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(admins)
    }

    pub fn list_managers_for_admin(&self, user: UserId) -> GuardResult<Vec<ChatId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT manager_id FROM manager_admins WHERE user_id = ? ORDER BY manager_id DESC",
        )?;
        let managers = stmt
            .query_map(params![user.0], |row| Ok(ChatId(row.get(0)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(managers)
    }

    // ===== Child links =====

    pub fn manager_for_child(&self, child: ChatId) -> GuardResult<Option<ChatId>> {
        let conn = self.pool.get()?;
        let manager = conn
            .query_row(
                "SELECT manager_id FROM child_links WHERE child_id = ? LIMIT 1",
                params![child.0],
                |row| Ok(ChatId(row.get(0)?)),
            )
            .optional()?;
        Ok(manager)
    }

    /// Children of a manager, most recently linked first
    pub fn list_children(&self, manager: ChatId) -> GuardResult<Vec<ChildLink>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT child_id, manager_id, linked_at FROM child_links
             WHERE manager_id = ? ORDER BY linked_at DESC, rowid DESC",
        )?;
        let links = stmt
            .query_map(params![manager.0], |row| {
                Ok(ChildLink {
                    child_id: ChatId(row.get(0)?),
                    manager_id: ChatId(row.get(1)?),
                    linked_at: Timestamp::from_millis(row.get::<_, i64>(2)?.max(0) as u64),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn count_children(&self, manager: ChatId) -> GuardResult<i64> {
        let conn = self.pool.get()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM child_links WHERE manager_id = ?",
            params![manager.0],
            |row| row.get(0),
        )?)
    }

    /// Returns false when the child already had a link; the existing row is kept
    pub fn insert_link(&self, child: ChatId, manager: ChatId, linked_at: Timestamp) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let inserted = conn.execute(
            "INSERT INTO child_links (child_id, manager_id, linked_at) VALUES (?, ?, ?)
             ON CONFLICT(child_id) DO NOTHING",
            params![child.0, manager.0, linked_at.as_millis() as i64],
        )?;
        Ok(inserted > 0)
    }

    /// Returns whether a link was removed
    pub fn delete_link(&self, child: ChatId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM child_links WHERE child_id = ?", params![child.0])?;
        Ok(removed > 0)
    }

    // ===== Unlink requests =====

    pub fn create_unlink_request(
        &self,
        manager: ChatId,
        child: ChatId,
        requested_by: UserId,
        created_at: Timestamp,
    ) -> GuardResult<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO unlink_requests (manager_id, child_id, requested_by, created_at, status)
             VALUES (?, ?, ?, ?, 'pending')",
            params![manager.0, child.0, requested_by.0, created_at.as_millis() as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_unlink_request(&self, id: i64) -> GuardResult<Option<UnlinkRequest>> {
        let conn = self.pool.get()?;
        let request = conn
            .query_row(
                "SELECT id, manager_id, child_id, requested_by, created_at, status
                 FROM unlink_requests WHERE id = ? LIMIT 1",
                params![id],
                unlink_request_from_row,
            )
            .optional()?;
        Ok(request)
    }

    pub fn list_pending_unlink_requests(&self) -> GuardResult<Vec<UnlinkRequest>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, manager_id, child_id, requested_by, created_at, status
             FROM unlink_requests WHERE status = 'pending' ORDER BY id ASC",
        )?;
        let requests = stmt.query_map([], unlink_request_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    /// Move a pending request to `status`; false if it was no longer pending
    pub fn resolve_unlink_request(&self, id: i64, status: UnlinkStatus) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE unlink_requests SET status = ? WHERE id = ? AND status = 'pending'",
            params![status.as_str(), id],
        )?;
        Ok(updated > 0)
    }

    /// Approve a pending request and drop the child's link in one transaction
    pub fn approve_unlink_request(&self, id: i64, child: ChatId) -> GuardResult<bool> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE unlink_requests SET status = 'approved' WHERE id = ? AND status = 'pending'",
            params![id],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute("DELETE FROM child_links WHERE child_id = ?", params![child.0])?;

        tx.commit()?;
        Ok(true)
    }

    // ===== Console sessions =====

    pub fn load_session(&self, user: UserId) -> GuardResult<Option<String>> {
        let conn = self.pool.get()?;
        let json = conn
            .query_row(
                "SELECT state_json FROM console_sessions WHERE user_id = ? LIMIT 1",
                params![user.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    pub fn save_session(&self, user: UserId, state_json: &str) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO console_sessions (user_id, state_json, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            params![user.0, state_json, Timestamp::now().as_millis() as i64],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, user: UserId) -> GuardResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM console_sessions WHERE user_id = ?", params![user.0])?;
        Ok(())
    }
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRecord> {
    let kind: String = row.get(2)?;
    Ok(GroupRecord { chat_id: ChatId(row.get(0)?), title: row.get(1)?, kind: ChatKind::parse(&kind) })
}

fn manager_from_row(row: &Row<'_>) -> rusqlite::Result<ManagerGroup> {
    Ok(ManagerGroup { id: ChatId(row.get(0)?), title: row.get(1)?, child_limit: row.get(2)? })
}

fn unlink_request_from_row(row: &Row<'_>) -> rusqlite::Result<UnlinkRequest> {
    let status: String = row.get(5)?;
    Ok(UnlinkRequest {
        id: row.get(0)?,
        manager_id: ChatId(row.get(1)?),
        child_id: ChatId(row.get(2)?),
        requested_by: UserId(row.get(3)?),
        created_at: Timestamp::from_millis(row.get::<_, i64>(4)?.max(0) as u64),
        status: UnlinkStatus::parse(&status).unwrap_or(UnlinkStatus::Pending),
    })
}
