//! Append-only cleanup audit log
//!
//! One [`CleanupLogEntry`] per executed run. Entries are kept in memory and,
//! when a path is configured, also appended to a JSON-lines file. A failed
//! file write is reported to the caller but the in-memory entry stands.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::tracking::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit log I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A victim as it looked when it was selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedConnection {
    pub connection_id: ConnectionId,
    pub client_ip: String,
    pub inactive_time: f64,
    pub is_webhook: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub total_connections_before: usize,
    pub inactive_connections_found: usize,
    pub connections_closed: usize,
    pub cleanup_reason: String,
    pub connections_closed_list: Vec<ClosedConnection>,
}

/// Fields of an entry before the log assigns its id.
#[derive(Debug, Clone)]
pub struct NewCleanupLogEntry {
    pub timestamp: DateTime<Utc>,
    pub total_connections_before: usize,
    pub inactive_connections_found: usize,
    pub cleanup_reason: String,
    pub connections_closed_list: Vec<ClosedConnection>,
}

struct AuditFile {
    path: PathBuf,
    file: File,
}

pub struct AuditLog {
    entries: RwLock<Vec<CleanupLogEntry>>,
    file: Option<Mutex<AuditFile>>,
}

impl AuditLog {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            file: None,
        }
    }

    /// Also append every entry to `path` as one JSON object per line.
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::info!("[audit] [file_opened] path={}", path.display());

        Ok(Self {
            entries: RwLock::new(Vec::new()),
            file: Some(Mutex::new(AuditFile { path, file })),
        })
    }

    /// Append an entry. `connections_closed` is always the length of the list.
    ///
    /// The entry is returned even when the file write fails; the error comes
    /// back alongside it.
    pub fn append(&self, new: NewCleanupLogEntry) -> (CleanupLogEntry, Option<AuditError>) {
        let entry = {
            let mut entries = self.entries.write();
            let entry = CleanupLogEntry {
                id: entries.len() as u64 + 1,
                timestamp: new.timestamp,
                total_connections_before: new.total_connections_before,
                inactive_connections_found: new.inactive_connections_found,
                connections_closed: new.connections_closed_list.len(),
                cleanup_reason: new.cleanup_reason,
                connections_closed_list: new.connections_closed_list,
            };
            entries.push(entry.clone());
            entry
        };

        let err = self.write_line(&entry).err();
        (entry, err)
    }

    fn write_line(&self, entry: &CleanupLogEntry) -> Result<(), AuditError> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = file.lock();
        let AuditFile { path, file } = &mut *file;
        file.write_all(&line)
            .and_then(|_| file.flush())
            .map_err(|source| AuditError::Io {
                path: path.clone(),
                source,
            })
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<CleanupLogEntry> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<CleanupLogEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
