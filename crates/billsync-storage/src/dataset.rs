//! Dataset file, timestamped snapshots, stats and the rolling sync log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use billsync_core::BillRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::{read_json, write_json_atomic, ManifestStore};

pub const SYNC_LOG_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    pub source: String,
    pub endpoint: String,
    pub mode: String,
}

/// On-disk shape of `bills.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillsDocument {
    pub last_sync: DateTime<Utc>,
    pub session_year: i32,
    pub biennium: String,
    pub total_bills: usize,
    pub bills: Vec<BillRecord>,
    pub metadata: DatasetMetadata,
}

impl BillsDocument {
    pub fn new(
        bills: Vec<BillRecord>,
        last_sync: DateTime<Utc>,
        session_year: i32,
        biennium: impl Into<String>,
        metadata: DatasetMetadata,
    ) -> Self {
        Self {
            last_sync,
            session_year,
            biennium: biennium.into(),
            total_bills: bills.len(),
            bills,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub generated_at: Option<DateTime<Utc>>,
    pub total_bills: usize,
    pub with_hearings: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_topic: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

impl DatasetStats {
    pub fn compute(bills: &[BillRecord], generated_at: DateTime<Utc>) -> Self {
        let mut stats = DatasetStats {
            generated_at: Some(generated_at),
            total_bills: bills.len(),
            ..Default::default()
        };
        for bill in bills {
            *stats.by_status.entry(bill.status.to_string()).or_default() += 1;
            *stats.by_topic.entry(bill.topic.clone()).or_default() += 1;
            *stats
                .by_priority
                .entry(bill.priority.as_str().to_string())
                .or_default() += 1;
            if !bill.hearings.is_empty() {
                stats.with_hearings += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub bills_count: usize,
    #[serde(default)]
    pub new_bills: usize,
    #[serde(default)]
    pub stale_checked: usize,
    #[serde(default)]
    pub changed: usize,
    #[serde(default)]
    pub failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Newest-first run history, capped at [`SYNC_LOG_CAP`] entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncLog {
    #[serde(default)]
    pub entries: Vec<SyncLogEntry>,
}

impl SyncLog {
    pub fn push(&mut self, entry: SyncLogEntry) {
        self.entries.insert(0, entry);
        self.entries.truncate(SYNC_LOG_CAP);
    }
}

/// Layout of the data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bills_path(&self) -> PathBuf {
        self.root.join("bills.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.root.join("stats.json")
    }

    pub fn sync_log_path(&self) -> PathBuf {
        self.root.join("sync-log.json")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.join("sync")
    }

    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(self.manifest_path())
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        let snapshots = self.snapshot_dir();
        fs::create_dir_all(&snapshots)
            .await
            .with_context(|| format!("creating {}", snapshots.display()))
    }

    /// Existing mirrored records; an absent or unreadable file yields none.
    pub async fn load_bills(&self) -> Vec<BillRecord> {
        let path = self.bills_path();
        if !path.exists() {
            return Vec::new();
        }
        match read_json::<BillsDocument>(&path).await {
            Ok(doc) => doc.bills,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "could not read dataset; starting from empty");
                Vec::new()
            }
        }
    }

    /// Write the canonical dataset and a timestamped snapshot; returns the snapshot path.
    pub async fn save_bills(&self, doc: &BillsDocument) -> anyhow::Result<PathBuf> {
        self.ensure_dirs().await?;
        let canonical = self.bills_path();
        write_json_atomic(&canonical, doc).await?;

        let stamp = doc.last_sync.format("%Y%m%d-%H%M%S");
        let snapshot = self.snapshot_dir().join(format!("{stamp}_bills.json"));
        write_json_atomic(&snapshot, doc).await?;

        info!(
            bills = doc.total_bills,
            canonical = %canonical.display(),
            snapshot = %snapshot.display(),
            "dataset saved"
        );
        Ok(snapshot)
    }

    pub async fn write_stats(&self, bills: &[BillRecord], generated_at: DateTime<Utc>) -> anyhow::Result<()> {
        let stats = DatasetStats::compute(bills, generated_at);
        write_json_atomic(&self.stats_path(), &stats).await
    }

    pub async fn load_sync_log(&self) -> SyncLog {
        let path = self.sync_log_path();
        if !path.exists() {
            return SyncLog::default();
        }
        read_json(&path).await.unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %format!("{err:#}"), "could not read sync log; starting a new one");
            SyncLog::default()
        })
    }

    pub async fn append_sync_log(&self, entry: SyncLogEntry) -> anyhow::Result<()> {
        let mut log = self.load_sync_log().await;
        log.push(entry);
        write_json_atomic(&self.sync_log_path(), &log).await
    }
}
