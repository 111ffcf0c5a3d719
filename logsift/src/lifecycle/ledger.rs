use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::metadata::write_atomic;
use crate::errors::SearchResult;

pub const LEDGER_FILE: &str = "pending_deletions.json";

/// A result set waiting to be deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub result_dir: PathBuf,
    #[serde(default)]
    pub package_path: Option<PathBuf>,
    /// Unix seconds after which a sweep may delete the entry
    pub eligible_at: u64,
    #[serde(default)]
    pub retry_count: u32,
}

/// Result sets queued for deletion, keyed by id.
///
/// Persisted as one JSON object so a restart resumes pending deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionLedger {
    entries: BTreeMap<String, PendingDeletion>,
}

impl DeletionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the ledger, starting empty when it is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to read deletion ledger {}: {}", path.display(), e);
                return Self::new();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!("Deletion ledger {} is corrupted, starting empty: {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> SearchResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data)
    }

    /// Queues `id`. An id that is already queued keeps its entry.
    pub fn schedule(&mut self, id: &str, entry: PendingDeletion) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), entry);
        true
    }

    pub fn get(&self, id: &str) -> Option<&PendingDeletion> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PendingDeletion> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingDeletion> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids whose grace delay has passed at `now`
    pub fn due(&self, now: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.eligible_at <= now)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
