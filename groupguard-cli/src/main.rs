use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use groupguard_core::config::Config;
use groupguard_core::core_policy::PolicyEngine;
use groupguard_core::core_scope::{HierarchyManager, LinkOutcome};
use groupguard_core::core_store::GuardSqlStore;
use groupguard_core::logging::{init_logging_with_config, LogConfig};
use groupguard_core::metrics::init_metrics;
use groupguard_core::types::ChatId;
use std::path::PathBuf;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "groupguard.toml";

#[derive(Parser, Debug)]
#[command(name = "groupguard")]
#[command(author, version, about = "Offline administration of the group guard database", long_about = None)]
struct Args {
    /// Configuration file (defaults and GROUPGUARD_* variables when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file and create the database next to it
    Init {
        /// Replace an existing configuration file
        #[arg(long)]
        force: bool,
    },
    /// Register a chat as a manager group
    RegisterManager {
        #[arg(allow_negative_numbers = true)]
        id: ChatId,
        #[arg(long)]
        title: Option<String>,
    },
    /// Set the maximum number of children (0 = unlimited)
    SetLimit {
        #[arg(allow_negative_numbers = true)]
        manager: ChatId,
        limit: i64,
    },
    /// Link a child chat under a manager
    Link {
        #[arg(allow_negative_numbers = true)]
        manager: ChatId,
        #[arg(allow_negative_numbers = true)]
        child: ChatId,
    },
    /// Detach a child from its manager
    Unlink {
        #[arg(allow_negative_numbers = true)]
        child: ChatId,
    },
    /// Show the effective manager and scope of a chat
    Scope {
        #[arg(allow_negative_numbers = true)]
        chat: ChatId,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Toggle the join guard of a chat's effective manager
    Guard {
        #[arg(value_enum)]
        state: Toggle,
        #[arg(allow_negative_numbers = true)]
        chat: ChatId,
    },
    /// Inspect or clear the audit hub
    Hub {
        #[arg(value_enum)]
        action: HubAction,
    },
    /// List pending unlink requests
    UnlinkRequests,
    /// Approve a pending unlink request
    Approve { id: i64 },
    /// Deny a pending unlink request
    Deny { id: i64 },
    /// Show the database schema version, or roll it back
    Schema {
        /// Undo migrations newer than this version
        #[arg(long)]
        rollback_to: Option<i32>,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum HubAction {
    Show,
    Clear,
}

fn config_path(raw: Option<&str>) -> PathBuf {
    let raw = raw.unwrap_or(DEFAULT_CONFIG_PATH);
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(raw) => {
            let path = config_path(Some(raw.as_str()));
            Config::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => Config::from_env()?,
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.to_lowercase();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;
    Ok(config)
}

fn init(args: &Args, force: bool) -> Result<String> {
    let path = config_path(args.config.as_deref());
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut config = Config::default();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        config.store.db_path = dir.join("groupguard.sqlite3");
    }
    config.save_to_file(&path)?;
    GuardSqlStore::open(&config.store)
        .with_context(|| format!("Failed to create {}", config.store.db_path.display()))?;

    Ok(format!(
        "Wrote {}\nDatabase ready at {}",
        path.display(),
        config.store.db_path.display()
    ))
}

/// Run one administrative command against an opened store
fn execute(command: Command, store: GuardSqlStore, config: &Config) -> Result<String> {
    let hierarchy = HierarchyManager::new(store.clone());
    let policy = PolicyEngine::new(store.clone(), config.bot.owner_ids.iter().copied());

    let output = match command {
        Command::Init { .. } => anyhow::bail!("init does not need an open database"),
        Command::RegisterManager { id, title } => {
            hierarchy.register_manager(id, title.as_deref())?;
            format!("Manager {} registered", id)
        }
        Command::SetLimit { manager, limit } => {
            hierarchy.set_child_limit(manager, limit)?;
            format!("Limit for {} set to {}", manager, limit)
        }
        Command::Link { manager, child } => match hierarchy.link(manager, child)? {
            LinkOutcome::Linked => format!("Linked {} under {}", child, manager),
            LinkOutcome::AlreadyLinked => format!("{} is already linked under {}", child, manager),
        },
        Command::Unlink { child } => {
            let manager = hierarchy.unlink(child)?;
            format!("Unlinked {} from {}", child, manager)
        }
        Command::Scope { chat, json } => {
            let effective = hierarchy.resolver().resolve_effective(chat)?;
            let scope = hierarchy.scope_set(effective)?;
            if json {
                serde_json::to_string_pretty(&serde_json::json!({
                    "chat": chat,
                    "effective": effective,
                    "guard": policy.guard_enabled(effective)?,
                    "scope": scope,
                }))?
            } else {
                let members: Vec<String> = scope.iter().map(ToString::to_string).collect();
                format!(
                    "Chat: {}\nEffective: {}\nGuard: {}\nScope: {}",
                    chat,
                    effective,
                    if policy.guard_enabled(effective)? { "on" } else { "off" },
                    members.join(", ")
                )
            }
        }
        Command::Guard { state, chat } => {
            let effective = hierarchy.resolver().resolve_effective(chat)?;
            let enabled = state == Toggle::On;
            policy.set_guard(effective, enabled)?;
            format!("Guard {} for {}", if enabled { "on" } else { "off" }, effective)
        }
        Command::Hub { action: HubAction::Show } => match policy.hub()? {
            Some(hub) => format!("Current hub: {}", hub),
            None => "Current hub: -".to_string(),
        },
        Command::Hub { action: HubAction::Clear } => match policy.hub()? {
            Some(hub) => {
                policy.disable_hub(hub, true)?;
                format!("Hub {} cleared", hub)
            }
            None => "No hub configured".to_string(),
        },
        Command::UnlinkRequests => {
            let pending = hierarchy.pending_requests()?;
            if pending.is_empty() {
                "No pending requests".to_string()
            } else {
                pending
                    .iter()
                    .map(|r| {
                        format!(
                            "#{} manager={} child={} by={}",
                            r.id, r.manager_id, r.child_id, r.requested_by
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Approve { id } => {
            let request = hierarchy.approve(id)?;
            format!("Request #{} approved, {} unlinked", id, request.child_id)
        }
        Command::Deny { id } => {
            hierarchy.deny(id)?;
            format!("Request #{} denied", id)
        }
        Command::Schema { rollback_to: None } => {
            let (current, latest) = store.schema_version()?;
            format!("Schema version {} (latest {})", current, latest)
        }
        Command::Schema { rollback_to: Some(target) } => {
            store.rollback_schema(target)?;
            let (current, _) = store.schema_version()?;
            format!("Schema rolled back to version {}", current)
        }
    };

    Ok(output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::Init { force } = args.command {
        init_logging_with_config(LogConfig::default().json_format(args.json_logs))?;
        println!("{}", init(&args, force)?);
        return Ok(());
    }

    let config = load_config(&args)?;
    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;
    if config.metrics.enabled {
        init_metrics();
    }

    info!(db = %config.store.db_path.display(), "GroupGuard CLI started");
    let store = GuardSqlStore::open(&config.store)?;

    println!("{}", execute(args.command, store, &config)?);

    debug!("GroupGuard CLI finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use groupguard_core::core_store::UnlinkStatus;
    use groupguard_core::types::UserId;

    fn run(store: &GuardSqlStore, argv: &[&str]) -> Result<String> {
        let mut full = vec!["groupguard"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full)?;
        execute(args.command, store.clone(), &Config::default())
    }

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_negative_ids_parse() {
        let args = Args::try_parse_from(["groupguard", "link", "-100", "-200"]).unwrap();
        match args.command {
            Command::Link { manager, child } => {
                assert_eq!(manager, ChatId(-100));
                assert_eq!(child, ChatId(-200));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_hierarchy_commands() {
        let store = GuardSqlStore::memory().unwrap();
        run(&store, &["register-manager", "-100", "--title", "Main"]).unwrap();
        run(&store, &["set-limit", "-100", "1"]).unwrap();

        assert_eq!(run(&store, &["link", "-100", "-1"]).unwrap(), "Linked -1 under -100");
        assert!(run(&store, &["link", "-100", "-2"]).is_err());

        let scope = run(&store, &["scope", "-1", "--json"]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&scope).unwrap();
        assert_eq!(value["effective"], -100);
        assert_eq!(value["scope"], serde_json::json!([-100, -1]));

        run(&store, &["guard", "on", "-1"]).unwrap();
        assert!(store.is_guard_enabled(ChatId(-100)).unwrap());

        assert_eq!(run(&store, &["unlink", "-1"]).unwrap(), "Unlinked -1 from -100");
        assert!(run(&store, &["unlink", "-1"]).is_err());
    }

    #[test]
    fn test_request_commands() {
        let store = GuardSqlStore::memory().unwrap();
        let hierarchy = HierarchyManager::new(store.clone());
        hierarchy.register_manager(ChatId(-100), None).unwrap();
        hierarchy.link(ChatId(-100), ChatId(-1)).unwrap();
        let id = hierarchy.request_unlink(ChatId(-100), ChatId(-1), UserId(7)).unwrap();

        let listing = run(&store, &["unlink-requests"]).unwrap();
        assert!(listing.contains(&format!("#{} manager=-100 child=-1 by=7", id)));

        run(&store, &["approve", &id.to_string()]).unwrap();
        assert_eq!(store.get_unlink_request(id).unwrap().unwrap().status, UnlinkStatus::Approved);
        assert_eq!(run(&store, &["unlink-requests"]).unwrap(), "No pending requests");
        assert!(run(&store, &["deny", &id.to_string()]).is_err());
    }

    #[test]
    fn test_hub_commands() {
        let store = GuardSqlStore::memory().unwrap();
        assert_eq!(run(&store, &["hub", "show"]).unwrap(), "Current hub: -");

        store.set_hub_chat(Some(ChatId(-10))).unwrap();
        assert_eq!(run(&store, &["hub", "show"]).unwrap(), "Current hub: -10");
        run(&store, &["hub", "clear"]).unwrap();
        assert_eq!(store.hub_chat().unwrap(), None);
    }

    #[test]
    fn test_schema_commands() {
        let store = GuardSqlStore::memory().unwrap();
        let (current, latest) = store.schema_version().unwrap();
        assert_eq!(current, latest);
        assert_eq!(
            run(&store, &["schema"]).unwrap(),
            format!("Schema version {} (latest {})", latest, latest)
        );

        assert_eq!(
            run(&store, &["schema", "--rollback-to", "1"]).unwrap(),
            "Schema rolled back to version 1"
        );
        assert_eq!(store.schema_version().unwrap(), (1, latest));
    }

    #[test]
    fn test_init_writes_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        let args = Args::try_parse_from([
            "groupguard",
            "--config",
            path.to_str().unwrap(),
            "init",
        ])
        .unwrap();

        init(&args, false).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.db_path, dir.path().join("groupguard.sqlite3"));
        assert!(config.store.db_path.exists());
        assert!(init(&args, false).is_err());
    }
}
