//! Database migrations for the moderation store
//!
//! Provides versioned migrations for the hierarchy, policy, and session schema.
//! Each migration is applied atomically and tracked in the guard_schema_version table.

use crate::errors::GuardResult;
use crate::types::Timestamp;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial hierarchy and policy schema",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS guard_schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at INTEGER NOT NULL
                );

                -- Scalar settings (hub destination)
                CREATE TABLE IF NOT EXISTS app_settings (
                    key TEXT PRIMARY KEY,
                    value TEXT
                );

                -- Legacy global admins
                CREATE TABLE IF NOT EXISTS admins (
                    user_id INTEGER PRIMARY KEY
                );

                -- Cache of every chat the bot has observed
                CREATE TABLE IF NOT EXISTS groups (
                    chat_id INTEGER PRIMARY KEY,
                    title TEXT,
                    chat_type TEXT NOT NULL DEFAULT 'group'
                );

                CREATE INDEX IF NOT EXISTS idx_groups_title ON groups(title);

                -- chat_id NULL = global exemption
                CREATE TABLE IF NOT EXISTS safe_users (
                    user_id INTEGER NOT NULL,
                    chat_id INTEGER
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_safe_users_scope
                    ON safe_users(user_id, IFNULL(chat_id, 0));

                -- chat_id NULL = global ban
                CREATE TABLE IF NOT EXISTS bans (
                    user_id INTEGER NOT NULL,
                    chat_id INTEGER
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_bans_scope
                    ON bans(user_id, IFNULL(chat_id, 0));

                -- Guard flag keyed by effective (manager) id
                CREATE TABLE IF NOT EXISTS guard_settings (
                    chat_id INTEGER PRIMARY KEY,
                    guard_enabled INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS manager_groups (
                    manager_id INTEGER PRIMARY KEY,
                    title TEXT,
                    child_limit INTEGER NOT NULL DEFAULT 0 CHECK(child_limit >= 0)
                );

                CREATE TABLE IF NOT EXISTS manager_admins (
                    manager_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    PRIMARY KEY (manager_id, user_id),
                    FOREIGN KEY (manager_id) REFERENCES manager_groups(manager_id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_manager_admins_user ON manager_admins(user_id);

                -- A child belongs to at most one manager; rowid keeps link order
                CREATE TABLE IF NOT EXISTS child_links (
                    child_id INTEGER NOT NULL UNIQUE,
                    manager_id INTEGER NOT NULL,
                    linked_at INTEGER NOT NULL,
                    FOREIGN KEY (manager_id) REFERENCES manager_groups(manager_id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_child_links_manager ON child_links(manager_id, linked_at);

                CREATE TABLE IF NOT EXISTS unlink_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    manager_id INTEGER NOT NULL,
                    child_id INTEGER NOT NULL,
                    requested_by INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK(status IN ('pending', 'approved', 'denied'))
                );

                CREATE INDEX IF NOT EXISTS idx_unlink_requests_status ON unlink_requests(status);
            "#,
            down_sql: Some(
                r#"
                DROP INDEX IF EXISTS idx_unlink_requests_status;
                DROP TABLE IF EXISTS unlink_requests;

                DROP INDEX IF EXISTS idx_child_links_manager;
                DROP TABLE IF EXISTS child_links;

                DROP INDEX IF EXISTS idx_manager_admins_user;
                DROP TABLE IF EXISTS manager_admins;
                DROP TABLE IF EXISTS manager_groups;

                DROP TABLE IF EXISTS guard_settings;

                DROP INDEX IF EXISTS idx_bans_scope;
                DROP TABLE IF EXISTS bans;

                DROP INDEX IF EXISTS idx_safe_users_scope;
                DROP TABLE IF EXISTS safe_users;

                DROP INDEX IF EXISTS idx_groups_title;
                DROP TABLE IF EXISTS groups;

                DROP TABLE IF EXISTS admins;
                DROP TABLE IF EXISTS app_settings;

                DROP TABLE IF EXISTS guard_schema_version;
            "#,
            ),
        },
        Migration {
            version: 2,
            description: "Operator console sessions",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS console_sessions (
                    user_id INTEGER PRIMARY KEY,
                    state_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
            "#,
            down_sql: Some("DROP TABLE IF EXISTS console_sessions;"),
        },
    ]
}

/// Get current schema version from database
pub fn get_current_version(pool: &Pool<SqliteConnectionManager>) -> GuardResult<i32> {
    let conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guard_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Result<i32, _> = conn.query_row(
        "SELECT version FROM guard_schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> GuardResult<()> {
    let current_version = get_current_version(pool)?;

    let pending_migrations: Vec<_> =
        get_migrations().into_iter().filter(|m| m.version > current_version).collect();

    if pending_migrations.is_empty() {
        return Ok(());
    }

    let conn = pool.get()?;

    for migration in pending_migrations {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO guard_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, Timestamp::now().as_millis() as i64],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
    }

    Ok(())
}

/// Roll the schema back to `target_version` using the recorded down migrations
pub fn rollback(pool: &Pool<SqliteConnectionManager>, target_version: i32) -> GuardResult<()> {
    let current_version = get_current_version(pool)?;
    let conn = pool.get()?;

    let mut migrations = get_migrations();
    migrations.sort_by(|a, b| b.version.cmp(&a.version));

    for migration in migrations
        .into_iter()
        .filter(|m| m.version > target_version && m.version <= current_version)
    {
        let Some(down_sql) = migration.down_sql else {
            continue;
        };

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(down_sql)?;
        // The first migration drops the version table itself.
        if migration.version > 1 {
            tx.execute(
                "DELETE FROM guard_schema_version WHERE version = ?",
                params![migration.version],
            )?;
        }
        tx.commit()?;

        info!(version = migration.version, "Rolled back migration");
    }

    Ok(())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_pool() -> Pool<SqliteConnectionManager> {
        let manager = SqliteConnectionManager::memory();
        Pool::builder().max_size(1).build(manager).expect("Failed to create pool")
    }

    fn table_names(pool: &Pool<SqliteConnectionManager>) -> Vec<String> {
        let conn = pool.get().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    #[test]
    fn test_initial_migration() {
        let pool = setup_test_pool();
        migrate(&pool).expect("Migration failed");

        let tables = table_names(&pool);
        for expected in [
            "app_settings",
            "admins",
            "groups",
            "safe_users",
            "bans",
            "guard_settings",
            "manager_groups",
            "manager_admins",
            "child_links",
            "unlink_requests",
            "console_sessions",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
    }

    #[test]
    fn test_migration_version_tracking() {
        let pool = setup_test_pool();
        migrate(&pool).unwrap();

        assert_eq!(get_current_version(&pool).unwrap(), get_latest_version());

        // Second run is a no-op
        migrate(&pool).unwrap();
        assert_eq!(get_current_version(&pool).unwrap(), get_latest_version());
    }

    #[test]
    fn test_rollback_to_first_version() {
        let pool = setup_test_pool();
        migrate(&pool).unwrap();

        rollback(&pool, 1).unwrap();

        let tables = table_names(&pool);
        assert!(!tables.contains(&"console_sessions".to_string()));
        assert!(tables.contains(&"child_links".to_string()));
        assert_eq!(get_current_version(&pool).unwrap(), 1);
    }

    #[test]
    fn test_global_scope_is_unique() {
        let pool = setup_test_pool();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        conn.execute("INSERT OR IGNORE INTO safe_users (user_id, chat_id) VALUES (1, NULL)", [])
            .unwrap();
        conn.execute("INSERT OR IGNORE INTO safe_users (user_id, chat_id) VALUES (1, NULL)", [])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM safe_users WHERE user_id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
