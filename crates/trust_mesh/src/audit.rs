//! Audit Log Module
//!
//! Append-only record of security relevant events per peer address. The
//! zero-trust policy reads it back as evidence of prior contact.
//!
//! Entries are persisted one per line as `timestamp;address;event` and are
//! never rewritten. The in-memory copy serves scans and only keeps the most
//! recent `retention` entries; the file stays the complete record.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, TrustMeshError};

/// Announce event written by the gateway on every `hello`
pub const EVENT_HELLO: &str = "Hello";
/// Written when the evaluator rejects an address
pub const EVENT_AUTH_REJECT: &str = "Authentication reject";
/// Written when the evaluator cannot interpret the request
pub const EVENT_AUTH_ERROR: &str = "Authentication error";
/// Written on `discover/registration`
pub const EVENT_REGISTRATION: &str = "Discovering registration";
/// Written on `discover`
pub const EVENT_DISCOVER: &str = "Discovering products";

/// Entries kept in memory unless configured otherwise
pub const DEFAULT_RETENTION: usize = 10_000;

const FIELD_SEPARATOR: char = ';';

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub address: String,
    pub event: String,
}

impl AuditEntry {
    fn new(event: &str, address: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            address: sanitize_field(address),
            event: sanitize_field(event),
        }
    }

    /// Render as a log file line (without the trailing newline)
    pub fn to_line(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.address,
            self.event,
            sep = FIELD_SEPARATOR
        )
    }

    /// Parse a log file line
    pub fn parse_line(line: &str) -> Result<Self> {
        let malformed = |reason: &str| TrustMeshError::MalformedEntry {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = line.splitn(3, FIELD_SEPARATOR);
        let (Some(ts), Some(address), Some(event)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected three fields"));
        };
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| malformed(&e.to_string()))?
            .with_timezone(&Utc);

        Ok(Self {
            timestamp,
            address: address.to_string(),
            event: event.to_string(),
        })
    }
}

/// Separators and line breaks would corrupt the line format.
fn sanitize_field(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            FIELD_SEPARATOR | '\n' | '\r' => '_',
            other => other,
        })
        .collect()
}

#[derive(Debug)]
struct AuditState {
    entries: VecDeque<AuditEntry>,
    retention: Option<usize>,
    sink: Option<(PathBuf, File)>,
}

impl AuditState {
    fn push(&mut self, entry: AuditEntry) {
        self.entries.push_back(entry);
        self.trim();
    }

    fn trim(&mut self) {
        if let Some(cap) = self.retention {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
    }
}

/// Append-only audit log, shared behind an `Arc`
#[derive(Debug)]
pub struct AuditLog {
    state: Mutex<AuditState>,
}

impl AuditLog {
    /// Audit log that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(AuditState {
                entries: VecDeque::new(),
                retention: Some(DEFAULT_RETENTION),
                sink: None,
            }),
        }
    }

    /// Bound the in-memory copy to the `retention` newest entries
    /// (unbounded when `None`). Scans never look further back than this.
    pub fn with_retention(mut self, retention: Option<usize>) -> Self {
        let state = self.state.get_mut();
        state.retention = retention;
        state.trim();
        self
    }

    /// Open (or create) a file-backed log with the default retention
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_retention(path, Some(DEFAULT_RETENTION)).await
    }

    /// Open (or create) a file-backed log, loading the `retention` newest
    /// existing entries.
    ///
    /// Lines that cannot be parsed are skipped with a warning.
    pub async fn open_with_retention<P: AsRef<Path>>(
        path: P,
        retention: Option<usize>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = VecDeque::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    match AuditEntry::parse_line(line) {
                        Ok(entry) => {
                            entries.push_back(entry);
                            if retention.is_some_and(|cap| entries.len() > cap) {
                                entries.pop_front();
                            }
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "Skipping audit line"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = open_append(&path).await?;
        debug!(path = %path.display(), entries = entries.len(), "Audit log opened");

        Ok(Self {
            state: Mutex::new(AuditState {
                entries,
                retention,
                sink: Some((path, file)),
            }),
        })
    }

    /// Record `event` for `address` with the current time.
    ///
    /// The line is flushed and synced before this returns.
    pub async fn append(&self, event: &str, address: &str) -> Result<AuditEntry> {
        let mut state = self.state.lock().await;
        // stamped under the lock so file order and time order agree
        let entry = AuditEntry::new(event, address);

        if let Some((_, file)) = state.sink.as_mut() {
            let mut line = entry.to_line();
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await?;
        }

        state.push(entry.clone());
        debug!(address = %entry.address, event = %entry.event, "Audit event recorded");
        Ok(entry)
    }

    /// Whether `address` logged `event` among the `within_last` most recent
    /// entries (all entries when `None`).
    ///
    /// This is a linear scan from the newest entry backwards; the recency
    /// bound caps its cost. The query is sanitized the way appends are.
    pub async fn has_event(&self, address: &str, event: &str, within_last: Option<usize>) -> bool {
        let address = sanitize_field(address);
        let event = sanitize_field(event);
        let state = self.state.lock().await;
        let window = within_last.unwrap_or(state.entries.len());
        state
            .entries
            .iter()
            .rev()
            .take(window)
            .any(|e| e.address == address && e.event == event)
    }

    /// Truncate the log, in memory and on disk
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some((path, file)) = state.sink.as_mut() {
            file.set_len(0).await?;
            file.sync_all().await?;
            debug!(path = %path.display(), "Audit log truncated");
        }
        state.entries.clear();
        Ok(())
    }

    /// Snapshot of every entry in append order
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.entries.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}
