//! Backup bookkeeping: snapshot naming, history lines and remote listings.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot directory names sort chronologically as plain strings.
pub const SNAPSHOT_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const NO_CHANGES: &str = "No changes";

/// Directory name for a snapshot taken at `at`.
///
/// When the name is already taken (two runs within the same second) a
/// zero-padded counter is appended so the result still sorts last.
#[must_use]
pub fn snapshot_name(at: NaiveDateTime, existing: &[String]) -> String {
    let base = at.format(SNAPSHOT_FORMAT).to_string();
    if !existing.contains(&base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n:03}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Latest snapshot by lexicographic order of its name.
#[must_use]
pub fn latest_snapshot(names: &[String]) -> Option<&str> {
    names.iter().max().map(String::as_str)
}

/// One line of a device's backup history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Snapshot name, or the check time when nothing changed.
    pub label: String,
    pub files: Vec<String>,
}

impl HistoryEntry {
    /// Render as `"{label}: a, b"` or `"{label}: No changes"`.
    #[must_use]
    pub fn to_line(&self) -> String {
        if self.files.is_empty() {
            format!("{}: {NO_CHANGES}", self.label)
        } else {
            format!("{}: {}", self.label, self.files.join(", "))
        }
    }

    /// Parse a history line; blank or malformed lines yield `None`.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let (label, files) = line.trim().split_once(": ")?;
        let files = files.trim();
        let files = if files.is_empty() || files == NO_CHANGES {
            Vec::new()
        } else {
            files.split(", ").map(str::to_string).collect()
        };
        Some(Self {
            label: label.to_string(),
            files,
        })
    }
}

/// Entry of the legacy JSON history (`log.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyLogEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl From<LegacyLogEntry> for HistoryEntry {
    fn from(entry: LegacyLogEntry) -> Self {
        Self {
            label: entry.timestamp,
            files: entry.changed_files,
        }
    }
}

/// Result of one backup attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    /// A new snapshot was written.
    pub changed: bool,
    pub snapshot: Option<String>,
    /// Files that differed from the previous snapshot.
    pub changed_files: Vec<String>,
    /// Every file fetched from the device.
    pub files: Vec<String>,
}

/// Result of one remote log export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogsExportOutcome {
    pub exported: Vec<String>,
    pub failed: Vec<String>,
}

/// An entry of a device's `/list?dir=...` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the listed directory, without leading `/`.
    pub name: String,
    /// `file` or `dir` when the device says so.
    pub kind: Option<String>,
}

impl RemoteEntry {
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind.as_deref().is_none_or(|kind| kind == "file")
    }

    /// File name without any directory part.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Parse a listing that is either an array of names or of `{name, type}`
/// objects.
#[must_use]
pub fn parse_listing(listing: &Value) -> Vec<RemoteEntry> {
    let Some(items) = listing.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let (name, kind) = match item {
                Value::String(name) => (name.as_str(), None),
                Value::Object(map) => (
                    map.get("name")?.as_str()?,
                    map.get("type").and_then(Value::as_str).map(str::to_string),
                ),
                _ => return None,
            };
            let name = name.trim_start_matches('/');
            (!name.is_empty()).then(|| RemoteEntry {
                name: name.to_string(),
                kind,
            })
        })
        .collect()
}

/// Remote log files worth exporting: plain `.txt` files other than the
/// device's scratch files.
#[must_use]
pub fn is_exportable_log(entry: &RemoteEntry) -> bool {
    let name = entry.basename();
    entry.is_file()
        && std::path::Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        && name != "_.txt"
        && name != "clean.txt"
}
