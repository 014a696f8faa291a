use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::search::session::SessionState;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// A file that matched the query, with metadata captured at scan time.
///
/// The record is a snapshot: if the file changes after it was examined the
/// record is not updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    /// File name without its directory
    pub name: String,
    /// Absolute path, suitable for "open file" style actions
    pub absolute_path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
    /// Last modification time, when the platform reports one
    #[serde(serialize_with = "serialize_modified")]
    pub modified: Option<SystemTime>,
    /// Human readable type, e.g. "PLAIN" or "QQZZ"
    pub type_label: String,
}

impl MatchRecord {
    /// Size rendered with binary prefixes, e.g. "1.5 KB"
    pub fn size_display(&self) -> String {
        format_size(self.size_bytes)
    }

    /// Modification time as RFC 3339 with second precision
    pub fn modified_display(&self) -> String {
        self.modified
            .map(|t| humantime::format_rfc3339_seconds(t).to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

fn serialize_modified<S>(modified: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match modified {
        Some(t) => serializer.collect_str(&humantime::format_rfc3339_seconds(*t)),
        None => serializer.serialize_none(),
    }
}

/// Point-in-time progress readout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Files examined so far
    pub processed: u64,
    /// Files found by the counting pass
    pub total: u64,
    /// Seconds since the search phase started
    pub elapsed_secs: f64,
}

impl ProgressSnapshot {
    /// Percent complete. Reports 0 when the total is unknown or zero.
    ///
    /// Can exceed 100 when files are added to the tree during the search.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }

    /// Files per second. Reports 0 before any time has elapsed.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / self.elapsed_secs
    }
}

/// Everything a session tells its consumer.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// Running file count from the counting pass, every 1000 files
    Scanning { files_found: u64 },
    /// A file matched
    Match(MatchRecord),
    /// Progress of the search phase
    Progress(ProgressSnapshot),
    /// The session moved to a new state. `detail` carries the failure
    /// description for `Failed`.
    StateChanged {
        state: SessionState,
        detail: Option<String>,
    },
}

impl SearchEvent {
    /// Whether this event is the last one a session will send
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchEvent::StateChanged { state, .. } if state.is_terminal())
    }
}

/// What a consumer saw over the lifetime of one session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Terminal state
    pub state: SessionState,
    /// Failure description when `state` is `Failed`
    pub failure: Option<String>,
    /// Matches in delivery order
    pub matches: Vec<MatchRecord>,
    /// Last progress snapshot delivered
    pub final_progress: Option<ProgressSnapshot>,
}

impl SessionSummary {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Idle,
            failure: None,
            matches: Vec::new(),
            final_progress: None,
        }
    }

    /// Folds one event into the summary
    pub fn record(&mut self, event: SearchEvent) {
        match event {
            SearchEvent::Scanning { .. } => {}
            SearchEvent::Match(record) => self.matches.push(record),
            SearchEvent::Progress(snapshot) => self.final_progress = Some(snapshot),
            SearchEvent::StateChanged { state, detail } => {
                self.state = state;
                if detail.is_some() {
                    self.failure = detail;
                }
            }
        }
    }
}

/// Formats a byte count with binary prefixes and one decimal place.
///
/// Values of 1024 TB and above stay in TB.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, SIZE_UNITS[unit])
}

/// Derives a display type for a file.
///
/// Prefers the MIME subtype guessed from the name, then the extension, both
/// upper-cased, and falls back to "Unknown".
pub fn type_label(path: &Path) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.subtype().as_str().to_uppercase();
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_uppercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}
