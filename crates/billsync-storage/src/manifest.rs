//! Per-record fetch ledger used to skip redundant upstream calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use billsync_core::{BillRecord, CanonicalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{read_json, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub status: CanonicalStatus,
    pub content_hash: String,
    pub last_fetched: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub last_full_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_incremental_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bill_count: usize,
    #[serde(default)]
    pub bills: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.bills.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bills.contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<&ManifestEntry> {
        self.bills.get(id)
    }

    /// Record a successful fetch whose content is (or may be) new.
    pub fn record_fetch(&mut self, record: &BillRecord, fetched_at: DateTime<Utc>) {
        self.bills.insert(
            record.id.clone(),
            ManifestEntry {
                status: record.status,
                content_hash: record.fingerprint(),
                last_fetched: fetched_at,
            },
        );
    }

    /// Refresh `lastFetched` for an unchanged record. Returns false for unknown ids.
    pub fn touch(&mut self, id: &str, fetched_at: DateTime<Utc>) -> bool {
        match self.bills.get_mut(id) {
            Some(entry) => {
                entry.last_fetched = fetched_at;
                true
            }
            None => false,
        }
    }
}

/// File-backed manifest. Loading never fails; saving is atomic.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent, unreadable and malformed files all yield an empty manifest.
    pub async fn load(&self) -> Manifest {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "manifest not found; treating as empty");
            return Manifest::default();
        }
        match read_json::<Manifest>(&self.path).await {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %self.path.display(), error = %format!("{err:#}"), "could not read manifest; treating as empty");
                Manifest::default()
            }
        }
    }

    pub async fn save(&self, manifest: &Manifest) -> anyhow::Result<()> {
        write_json_atomic(&self.path, manifest).await?;
        info!(bills = manifest.bills.len(), path = %self.path.display(), "manifest saved");
        Ok(())
    }
}
