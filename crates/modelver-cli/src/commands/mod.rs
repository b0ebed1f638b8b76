//! CLI command implementations.
//!
//! Commands talk to the store directly; the daemon picks the writes up from
//! the change log.

pub mod template;
pub mod version;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use modelver_core::model::ObjectMeta;
use modelver_core::store::SqliteStore;
use serde::Serialize;

/// Namespace used when `--namespace` is not given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Opens the store at `path`.
pub fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("failed to open store at {}", path.display()))
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

/// Formats the age of an object for table output.
pub fn format_age(meta: &ObjectMeta, now: DateTime<Utc>) -> String {
    let Some(created) = meta.creation_timestamp else {
        return "-".to_string();
    };
    let secs = (now - created).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Replaces an empty string with `-` for table cells.
pub fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
