// src/ledger.rs
// Run ledger: one row per calendar date recording pipeline status and which
// channels were already notified. This is the idempotence contract — the
// push stage consults it before sending and records each channel after a
// successful send, so reruns never deliver twice.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::store::{Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in-progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "in-progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Typed view of one ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub date: String,
    pub status: RunStatus,
    pub sent_channels: BTreeSet<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct RunLedger {
    store: Arc<Store>,
}

impl RunLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, date: &str) -> StoreResult<Option<Run>> {
        let row = match self.store.get_run_row(date)? {
            Some(row) => row,
            None => return Ok(None),
        };
        // Unrecognized status strings read back as failed rather than
        // aborting the run.
        let status = row.status.parse().unwrap_or(RunStatus::Failed);
        Ok(Some(Run {
            date: row.run_date,
            status,
            sent_channels: split_channels(&row.sent_channels),
            created_at: row.created_at,
        }))
    }

    pub fn get_status(&self, date: &str) -> StoreResult<Option<RunStatus>> {
        Ok(self.get(date)?.map(|r| r.status))
    }

    /// Create the row as in-progress if absent; a no-op when a row already
    /// exists (idempotent start).
    pub fn mark_started(&self, date: &str) -> StoreResult<()> {
        if self.store.get_run_row(date)?.is_some() {
            return Ok(());
        }
        self.store
            .upsert_run_row(date, &RunStatus::InProgress.to_string(), "")
    }

    /// Union `channels` into the recorded set. Re-recording a channel leaves
    /// the set unchanged.
    pub fn mark_sent(&self, date: &str, channels: &[&str]) -> StoreResult<()> {
        let existing = self.get(date)?;
        let (status, mut set) = match existing {
            Some(run) => (run.status, run.sent_channels),
            None => (RunStatus::InProgress, BTreeSet::new()),
        };
        for &ch in channels {
            let ch = ch.trim();
            if !ch.is_empty() {
                set.insert(ch.to_ascii_lowercase());
            }
        }
        self.store
            .upsert_run_row(date, &status.to_string(), &join_channels(&set))
    }

    pub fn mark_completed(&self, date: &str, status: RunStatus) -> StoreResult<()> {
        let channels = self
            .get(date)?
            .map(|r| join_channels(&r.sent_channels))
            .unwrap_or_default();
        self.store
            .upsert_run_row(date, &status.to_string(), &channels)
    }

    /// True when the run for `date` is completed and every configured channel
    /// already received output — the whole pipeline run can be skipped.
    pub fn already_delivered(&self, date: &str, channels: &[String]) -> StoreResult<bool> {
        if channels.is_empty() {
            return Ok(false);
        }
        let Some(run) = self.get(date)? else {
            return Ok(false);
        };
        Ok(run.status == RunStatus::Completed
            && channels.iter().all(|c| run.sent_channels.contains(c)))
    }

    /// True when `channel` was already notified for `date`; the push stage
    /// must check this before each send.
    pub fn was_sent(&self, date: &str, channel: &str) -> StoreResult<bool> {
        Ok(self
            .get(date)?
            .is_some_and(|r| r.sent_channels.contains(channel)))
    }
}

fn split_channels(s: &str) -> BTreeSet<String> {
    s.split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn join_channels(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}
