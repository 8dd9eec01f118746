//! Audit message rendering

use crate::config::AuditConfig;
use crate::types::{ChatId, UserId};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use std::fmt::Write;

/// Facts about one blocked join
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub offender_name: String,
    pub offender_id: UserId,
    /// `@username` or `-`
    pub offender_handle: String,
    pub manager_title: String,
    pub manager_id: ChatId,
    pub child_title: String,
    pub child_id: ChatId,
    pub at: DateTime<Utc>,
    pub ban_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuditFormatter {
    offset: FixedOffset,
    format: String,
}

impl AuditFormatter {
    pub fn new(offset: FixedOffset, format: impl Into<String>) -> Self {
        Self { offset, format: format.into() }
    }

    /// Out-of-range offsets fall back to UTC
    pub fn from_config(config: &AuditConfig) -> Self {
        let offset = config
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self::new(offset, config.timestamp_format.clone())
    }

    /// Unusable format strings fall back to RFC 3339
    pub fn timestamp(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        let mut out = String::new();
        if write!(out, "{}", local.format(&self.format)).is_err() {
            return local.to_rfc3339_opts(SecondsFormat::Secs, false);
        }
        out
    }

    pub fn render(&self, entry: &AuditEntry) -> String {
        let mut text = format!(
            "🚫 Join Blocked\n\n\
             Offender : {}\n\
             Management : {} ({})\n\
             Time : {}\n\
             Child : {} ({})\n\
             Id number : {}\n\
             Username : {}\n",
            entry.offender_name,
            entry.manager_title,
            entry.manager_id,
            self.timestamp(entry.at),
            entry.child_title,
            entry.child_id,
            entry.offender_id,
            entry.offender_handle,
        );
        if let Some(err) = &entry.ban_error {
            text.push_str(&format!("\nBan error : {}\n", err));
        }
        text
    }
}

/// Whether chrono can render `format` without error
pub fn is_valid_timestamp_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

impl Default for AuditFormatter {
    fn default() -> Self {
        Self::from_config(&AuditConfig::default())
    }
}
