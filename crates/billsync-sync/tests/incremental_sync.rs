use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use billsync_core::{BillDetail, CanonicalStatus, Chamber, HearingRef, RosterEntry};
use billsync_registry::{HearingItem, LegislativeRegistry, RegistryError};
use billsync_storage::{FetchError, Manifest, SyncLog};
use billsync_sync::{SyncConfig, SyncError, SyncMode, SyncPipeline};
use chrono::NaiveDate;
use tempfile::tempdir;

#[derive(Default)]
struct FakeRegistry {
    roster: Mutex<Vec<RosterEntry>>,
    details: Mutex<HashMap<u32, BillDetail>>,
    failing: Mutex<HashSet<u32>>,
    hearings: Mutex<Option<Vec<HearingItem>>>,
    detail_calls: Mutex<Vec<u32>>,
}

impl FakeRegistry {
    fn add_bill(&self, id: &str, number: u32, chamber: Chamber, history: &str) {
        self.roster.lock().unwrap().push(RosterEntry {
            id: id.replace(' ', ""),
            number,
            chamber,
            active: true,
        });
        self.details.lock().unwrap().insert(number, detail(id, number, chamber, history));
    }

    fn set_history(&self, number: u32, history: &str) {
        let mut details = self.details.lock().unwrap();
        let entry = details.get_mut(&number).unwrap();
        entry.history_text = history.to_string();
    }

    fn set_id(&self, number: u32, id: &str) {
        let mut details = self.details.lock().unwrap();
        details.get_mut(&number).unwrap().id = id.to_string();
    }

    fn fail(&self, number: u32) {
        self.failing.lock().unwrap().insert(number);
    }

    fn fail_all(&self) {
        let numbers: Vec<u32> = self.details.lock().unwrap().keys().copied().collect();
        self.failing.lock().unwrap().extend(numbers);
    }

    fn set_hearings(&self, items: Option<Vec<HearingItem>>) {
        *self.hearings.lock().unwrap() = items;
    }

    fn take_detail_calls(&self) -> Vec<u32> {
        std::mem::take(&mut *self.detail_calls.lock().unwrap())
    }
}

fn detail(id: &str, number: u32, chamber: Chamber, history: &str) -> BillDetail {
    BillDetail {
        id: id.to_string(),
        number,
        chamber,
        title: format!("Concerning item {number}"),
        description: String::new(),
        sponsor: "Ramos".to_string(),
        status_text: String::new(),
        history_text: history.to_string(),
        introduced_date: NaiveDate::from_ymd_opt(2026, 1, 12),
        requested_by_governor: false,
    }
}

fn unavailable() -> RegistryError {
    RegistryError::Transport(FetchError::HttpStatus {
        status: 503,
        url: "memory://registry".to_string(),
    })
}

#[async_trait]
impl LegislativeRegistry for FakeRegistry {
    fn endpoint(&self) -> &str {
        "memory://registry"
    }

    async fn roster_by_year(&self, year: i32) -> Result<Vec<RosterEntry>, RegistryError> {
        if year == 2026 {
            Ok(self.roster.lock().unwrap().clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn prefiled_roster(&self) -> Result<Vec<RosterEntry>, RegistryError> {
        Err(unavailable())
    }

    async fn bill_detail(&self, biennium: &str, number: u32) -> Result<BillDetail, RegistryError> {
        assert_eq!(biennium, "2025-26");
        self.detail_calls.lock().unwrap().push(number);
        if self.failing.lock().unwrap().contains(&number) {
            return Err(unavailable());
        }
        self.details
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| RegistryError::parse(format!("GetLegislation({number})"), "missing BillId"))
    }

    async fn hearings(&self, _begin: NaiveDate, _end: NaiveDate) -> Result<Vec<HearingItem>, RegistryError> {
        self.hearings.lock().unwrap().clone().ok_or_else(unavailable)
    }
}

fn hearing(bill_id: &str, day: u32, committee: &str) -> HearingItem {
    HearingItem {
        bill_id: bill_id.to_string(),
        hearing: HearingRef {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            committee: committee.to_string(),
            time: Some("08:00".to_string()),
            location: Some("Hearing Rm A".to_string()),
        },
    }
}

fn seeded_registry() -> Arc<FakeRegistry> {
    let registry = Arc::new(FakeRegistry::default());
    registry.add_bill("HB 1001", 1001, Chamber::House, "First reading, referred to Education.");
    registry.add_bill("HB 1002", 1002, Chamber::House, "Referred to Rules 2 Review.");
    registry.add_bill("SB 5001", 5001, Chamber::Senate, "Governor signed. Chapter 12, C 12 L 26.");
    registry.set_hearings(Some(vec![hearing("HB 1001", 15, "Education")]));
    registry
}

fn pipeline(root: &std::path::Path, registry: Arc<FakeRegistry>, breaker_threshold: usize) -> SyncPipeline {
    let config = SyncConfig {
        data_dir: root.join("data"),
        breaker_threshold,
        ..SyncConfig::default()
    };
    SyncPipeline::with_registry(config, registry)
}

fn read_manifest(pipeline: &SyncPipeline) -> Manifest {
    serde_json::from_str(&std::fs::read_to_string(pipeline.data_dir().manifest_path()).unwrap()).unwrap()
}

fn read_bills(pipeline: &SyncPipeline) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(pipeline.data_dir().bills_path()).unwrap()).unwrap()
}

fn read_log(pipeline: &SyncPipeline) -> SyncLog {
    serde_json::from_str(&std::fs::read_to_string(pipeline.data_dir().sync_log_path()).unwrap()).unwrap()
}

#[tokio::test]
async fn empty_manifest_falls_back_to_full_resync() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);

    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("sync");
    assert_eq!(summary.mode, SyncMode::Full);
    assert_eq!(summary.new_found, 3);
    assert_eq!(summary.new_fetched, 3);
    assert_eq!(summary.total_bills, 3);
    assert!(summary.hearings_refreshed);
    assert!(summary.validation_errors.is_empty(), "{:?}", summary.validation_errors);
    assert!(std::path::Path::new(&summary.snapshot).exists());

    let manifest = read_manifest(&pipeline);
    assert_eq!(manifest.bill_count, 3);
    assert!(manifest.last_full_sync.is_some());
    assert!(manifest.last_incremental_sync.is_none());
    assert_eq!(manifest.bills["SB5001"].status, CanonicalStatus::Enacted);
    assert_eq!(manifest.bills["HB1001"].status, CanonicalStatus::Committee);

    let bills = read_bills(&pipeline);
    assert_eq!(bills["totalBills"], 3);
    assert_eq!(bills["biennium"], "2025-26");
    assert_eq!(bills["metadata"]["mode"], "full");
    let hb1001 = bills["bills"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["id"] == "HB1001")
        .unwrap();
    assert_eq!(hb1001["hearings"].as_array().unwrap().len(), 1);
    assert_eq!(hb1001["committee"], "Education");

    let log = read_log(&pipeline);
    assert_eq!(log.entries.len(), 1);
    assert_eq!(log.entries[0].status, "success");
    assert!(pipeline.data_dir().stats_path().exists());
}

#[tokio::test]
async fn unchanged_fingerprint_only_touches_last_fetched() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");
    let first_manifest = read_manifest(&pipeline);
    let first_bills = read_bills(&pipeline);
    registry.take_detail_calls();

    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("second sync");
    assert_eq!(summary.mode, SyncMode::Incremental);
    assert_eq!(summary.new_found, 0);
    // The enacted bill is terminal and never refreshed.
    assert_eq!(summary.stale_checked, 2);
    assert_eq!(summary.changed, 0);
    let mut calls = registry.take_detail_calls();
    calls.sort_unstable();
    assert_eq!(calls, vec![1001, 1002]);

    let manifest = read_manifest(&pipeline);
    assert!(manifest.last_incremental_sync.is_some());
    for id in ["HB1001", "HB1002"] {
        assert_eq!(manifest.bills[id].content_hash, first_manifest.bills[id].content_hash);
        assert!(manifest.bills[id].last_fetched >= first_manifest.bills[id].last_fetched);
    }
    assert_eq!(manifest.bills["SB5001"], first_manifest.bills["SB5001"]);

    let bills = read_bills(&pipeline);
    for (before, after) in first_bills["bills"]
        .as_array()
        .unwrap()
        .iter()
        .zip(bills["bills"].as_array().unwrap())
    {
        assert_eq!(before["lastUpdated"], after["lastUpdated"]);
    }
}

#[tokio::test]
async fn changed_and_new_bills_are_merged() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");
    let first_manifest = read_manifest(&pipeline);

    registry.set_history(1002, "Third reading, passed; yeas, 90; nays, 8.");
    registry.add_bill("HB 1003", 1003, Chamber::House, "");

    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("second sync");
    assert_eq!(summary.new_found, 1);
    assert_eq!(summary.new_fetched, 1);
    assert_eq!(summary.changed, 2);
    assert_eq!(summary.total_bills, 4);

    let manifest = read_manifest(&pipeline);
    assert_eq!(manifest.bill_count, 4);
    assert_ne!(manifest.bills["HB1002"].content_hash, first_manifest.bills["HB1002"].content_hash);
    assert_eq!(manifest.bills["HB1002"].status, CanonicalStatus::PassedOrigin);
    assert_eq!(manifest.bills["HB1003"].status, CanonicalStatus::Prefiled);

    let bills = read_bills(&pipeline);
    let ids: Vec<&str> = bills["bills"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(ids.last(), Some(&"HB1003"));
}

#[tokio::test]
async fn circuit_breaker_aborts_without_persisting() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 2);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");
    let bills_before = std::fs::read(pipeline.data_dir().bills_path()).unwrap();
    let manifest_before = std::fs::read(pipeline.data_dir().manifest_path()).unwrap();

    registry.fail_all();
    let err = pipeline
        .run_once(SyncMode::Incremental)
        .await
        .expect_err("breaker should trip");
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::CircuitBreakerTripped { consecutive: 2, .. })
    ));

    assert_eq!(std::fs::read(pipeline.data_dir().bills_path()).unwrap(), bills_before);
    assert_eq!(std::fs::read(pipeline.data_dir().manifest_path()).unwrap(), manifest_before);
    let log = read_log(&pipeline);
    assert_eq!(log.entries.len(), 2);
    assert_eq!(log.entries[0].status, "failed");
    assert_eq!(log.entries[0].failures, 2);
}

#[tokio::test]
async fn isolated_failures_are_skipped_and_retried_later() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    registry.fail(1002);
    let pipeline = pipeline(dir.path(), registry.clone(), 50);

    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("sync");
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.total_bills, 2);
    assert!(!read_manifest(&pipeline).bills.contains_key("HB1002"));

    registry.failing.lock().unwrap().clear();
    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("sync");
    assert_eq!(summary.new_fetched, 1);
    assert_eq!(summary.total_bills, 3);
}

#[tokio::test]
async fn hearing_failure_keeps_existing_hearings() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");

    registry.set_hearings(None);
    registry.set_history(1001, "First reading, referred to Education. Executive action taken.");
    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("second sync");
    assert!(!summary.hearings_refreshed);
    assert_eq!(summary.changed, 1);

    let bills = read_bills(&pipeline);
    let hb1001 = bills["bills"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["id"] == "HB1001")
        .unwrap();
    assert_eq!(hb1001["hearings"].as_array().unwrap().len(), 1);
    assert_eq!(hb1001["hearings"][0]["committee"], "Education");
}

#[tokio::test]
async fn empty_roster_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let registry = Arc::new(FakeRegistry::default());
    let pipeline = pipeline(dir.path(), registry, 50);

    let err = pipeline.run_once(SyncMode::Full).await.expect_err("no bills");
    assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NoBills)));
    assert!(!pipeline.data_dir().bills_path().exists());
    assert!(!pipeline.data_dir().manifest_path().exists());
    assert_eq!(read_log(&pipeline).entries[0].status, "failed");
}

#[tokio::test]
async fn partial_resync_after_lost_dataset_reports_data_loss() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");
    assert_eq!(read_manifest(&pipeline).bill_count, 3);

    std::fs::remove_file(pipeline.data_dir().bills_path()).unwrap();
    registry.fail(1001);
    registry.fail(1002);
    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("second sync");
    assert_eq!(summary.mode, SyncMode::Full);
    assert_eq!(summary.total_bills, 1);
    assert!(
        summary
            .validation_errors
            .iter()
            .any(|e| e.contains("dropped >10%") && e.contains("manifest knows 3 bills")),
        "{:?}",
        summary.validation_errors
    );

    let manifest = read_manifest(&pipeline);
    assert_eq!(manifest.bill_count, 3);
    assert_eq!(manifest.bills.len(), 3);
    let standalone = billsync_sync::validate(&pipeline.data_dir().bills_path(), &pipeline.data_dir().manifest_path());
    assert!(standalone.iter().any(|e| e.contains("dropped >10%")), "{standalone:?}");
}

#[tokio::test]
async fn renamed_upstream_id_still_advances_scheduled_entry() {
    let dir = tempdir().expect("tempdir");
    let registry = seeded_registry();
    let pipeline = pipeline(dir.path(), registry.clone(), 50);
    pipeline.run_once(SyncMode::Incremental).await.expect("first sync");
    let first_manifest = read_manifest(&pipeline);

    registry.set_id(1002, "SHB 1002");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let summary = pipeline.run_once(SyncMode::Incremental).await.expect("second sync");
    assert_eq!(summary.stale_checked, 2);

    let manifest = read_manifest(&pipeline);
    assert!(manifest.bills["HB1002"].last_fetched > first_manifest.bills["HB1002"].last_fetched);
    assert!(manifest.bills.contains_key("SHB1002"));
}
