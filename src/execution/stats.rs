use crate::prelude::*;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering::Relaxed};

#[derive(Default, Serialize)]
pub struct Counter(pub AtomicI64);

impl Counter {
    pub fn inc(&self, by: i64) {
        self.0.fetch_add(by, Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicI64::new(self.get()))
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Counters of one import or export run.
#[derive(Debug, Serialize, Default, Clone)]
pub struct SyncStats {
    /// Keys or annotations looked at.
    pub num_scanned: Counter,
    /// Keys dropped by the prefix filter.
    pub num_filtered: Counter,
    /// Already linked, nothing to do.
    pub num_already_linked: Counter,
    /// Keys that vanished between enumeration and fetch.
    pub num_missing: Counter,
    /// Keys whose document had no content.
    pub num_empty: Counter,
    /// Tasks created or annotations written.
    pub num_synced: Counter,
    pub num_errors: Counter,
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut messages = Vec::new();
        let num_errors = self.num_errors.get();
        if num_errors > 0 {
            messages.push(format!("{num_errors} FAILED"));
        }
        let num_synced = self.num_synced.get();
        if num_synced > 0 {
            messages.push(format!("{num_synced} SYNCED"));
        }

        let mut skipped = Vec::new();
        let num_already_linked = self.num_already_linked.get();
        if num_already_linked > 0 {
            skipped.push(format!("{num_already_linked} already linked"));
        }
        let num_filtered = self.num_filtered.get();
        if num_filtered > 0 {
            skipped.push(format!("{num_filtered} outside prefix"));
        }
        let num_missing = self.num_missing.get();
        if num_missing > 0 {
            skipped.push(format!("{num_missing} missing"));
        }
        let num_empty = self.num_empty.get();
        if num_empty > 0 {
            skipped.push(format!("{num_empty} empty"));
        }
        if !skipped.is_empty() {
            messages.push(format!("SKIPPED ({})", skipped.join(", ")));
        }

        if messages.is_empty() {
            write!(f, "No changes")
        } else {
            write!(f, "{}", messages.join("; "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Failed,
}

/// Outcome of the last sync run of a storage.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub status: SyncStatus,
    pub finished_at: DateTime<Utc>,
    pub stats: SyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSummary {
    pub fn completed(stats: SyncStats) -> Self {
        Self {
            status: SyncStatus::Completed,
            finished_at: Utc::now(),
            stats,
            error: None,
        }
    }

    pub fn failed(stats: SyncStats, error: &Error) -> Self {
        Self {
            status: SyncStatus::Failed,
            finished_at: Utc::now(),
            stats,
            error: Some(error.to_string()),
        }
    }
}
