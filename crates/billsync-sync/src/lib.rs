//! Incremental sync orchestration for the bill mirror.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use billsync_core::{
    canonical_bill_id, format_bill_number, normalize_status, BillDetail, BillKey, BillRecord, Chamber,
    HearingRef, Priority, SessionTag,
};
use billsync_registry::{HearingItem, LegislativeRegistry, RegistryError, SoapRegistry};
use billsync_storage::{BillsDocument, DataDir, DatasetMetadata, HttpClientConfig, Manifest, SyncLogEntry};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod enrich;
pub mod merge;
pub mod schedule;
pub mod validate;

pub use enrich::{backfill_committee, EnrichmentHook, KeywordEnrichment, NoopEnrichmentHook, DEFAULT_TOPIC};
pub use merge::merge_bills;
pub use schedule::{find_new_bill_numbers, select_bills_for_refresh, union_rosters};
pub use validate::{validate, validate_with_known_count, REQUIRED_FIELDS};

pub const CRATE_NAME: &str = "billsync-sync";

const DATASET_SOURCE: &str = "Washington State Legislature Web Services";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub session_year: i32,
    pub throttle: Duration,
    pub http_timeout_secs: u64,
    pub batch_size: usize,
    pub breaker_threshold: usize,
    pub user_agent: String,
    pub service_base: String,
    pub hearing_days_back: i64,
    pub hearing_days_ahead: i64,
    pub workspace_root: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            session_year: 2026,
            throttle: Duration::from_millis(100),
            http_timeout_secs: 60,
            batch_size: 400,
            breaker_threshold: 50,
            user_agent: "billsync/0.1".to_string(),
            service_base: billsync_registry::soap::DEFAULT_SERVICE_BASE.to_string(),
            hearing_days_back: 14,
            hearing_days_ahead: 30,
            workspace_root: PathBuf::from("."),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("BILLSYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            session_year: env_or("BILLSYNC_YEAR", defaults.session_year),
            throttle: std::env::var("WALEG_THROTTLE_SECONDS")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.throttle),
            http_timeout_secs: env_or("BILLSYNC_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            batch_size: env_or("BILLSYNC_BATCH_SIZE", defaults.batch_size),
            breaker_threshold: env_or("BILLSYNC_BREAKER_THRESHOLD", defaults.breaker_threshold),
            user_agent: std::env::var("BILLSYNC_USER_AGENT").unwrap_or(defaults.user_agent),
            service_base: std::env::var("BILLSYNC_SERVICE_BASE").unwrap_or(defaults.service_base),
            hearing_days_back: env_or("BILLSYNC_HEARING_DAYS_BACK", defaults.hearing_days_back),
            hearing_days_ahead: env_or("BILLSYNC_HEARING_DAYS_AHEAD", defaults.hearing_days_ahead),
            workspace_root: defaults.workspace_root,
        }
    }

    /// Two-year period containing `session_year`; bienniums start in odd years (`2025-26`).
    pub fn biennium(&self) -> String {
        let start = self.biennium_start();
        format!("{start}-{:02}", (start + 1).rem_euclid(100))
    }

    pub fn biennium_start(&self) -> i32 {
        if self.session_year.rem_euclid(2) == 0 {
            self.session_year - 1
        } else {
            self.session_year
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            min_interval: self.throttle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Incremental,
    Full,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Incremental => "incremental",
            SyncMode::Full => "full",
        }
    }
}

/// Why a single record could not be fetched this run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("transport: {0}")]
    Transport(String),
    #[error("parse: {0}")]
    Parse(String),
}

impl From<RegistryError> for FetchFailure {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        if err.is_transport() {
            FetchFailure::Transport(message)
        } else {
            FetchFailure::Parse(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Box<BillRecord>),
    Failed { number: u32, reason: FetchFailure },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("circuit breaker tripped after {consecutive} consecutive fetch failures (last: {last})")]
    CircuitBreakerTripped { consecutive: usize, last: FetchFailure },
    #[error("sync produced zero bills; refusing to persist an empty dataset")]
    NoBills,
}

/// Per-run tally of fetch outcomes; doubles as the consecutive-failure circuit breaker.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failures: Vec<(u32, FetchFailure)>,
    consecutive_failures: usize,
    threshold: usize,
}

impl BatchReport {
    pub fn new(threshold: usize) -> Self {
        Self {
            succeeded: 0,
            failures: Vec::new(),
            consecutive_failures: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    /// Records one outcome; errors once `threshold` failures have happened back to back.
    pub fn observe(&mut self, outcome: &FetchOutcome) -> Result<(), SyncError> {
        match outcome {
            FetchOutcome::Fetched(_) => {
                self.succeeded += 1;
                self.consecutive_failures = 0;
                Ok(())
            }
            FetchOutcome::Failed { number, reason } => {
                self.failures.push((*number, reason.clone()));
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.threshold {
                    Err(SyncError::CircuitBreakerTripped {
                        consecutive: self.consecutive_failures,
                        last: reason.clone(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: SyncMode,
    pub roster_size: usize,
    pub new_found: usize,
    pub new_fetched: usize,
    pub stale_checked: usize,
    pub changed: usize,
    pub failures: usize,
    pub total_bills: usize,
    pub hearings_refreshed: bool,
    pub snapshot: String,
    pub validation_errors: Vec<String>,
}

pub fn leg_url(number: u32, session_year: i32) -> String {
    format!("https://app.leg.wa.gov/billsummary?BillNumber={number}&Year={session_year}")
}

/// Builds the persisted record for a freshly fetched detail.
///
/// Hearings and committee carry over from `previous`; they are refreshed separately.
pub fn build_bill_record(
    detail: &BillDetail,
    session_year: i32,
    fetched_at: DateTime<Utc>,
    previous: Option<&BillRecord>,
    enrichment: &dyn EnrichmentHook,
) -> BillRecord {
    let mut record = BillRecord {
        id: canonical_bill_id(&detail.id),
        number: format_bill_number(&detail.id),
        title: detail.title.clone(),
        description: detail.description.clone(),
        sponsor: detail.sponsor.clone(),
        status: normalize_status(&detail.status_text, &detail.history_text, detail.chamber),
        status_text: detail.status_text.clone(),
        history_line: detail.history_text.clone(),
        committee: previous.and_then(|p| p.committee.clone()),
        priority: Priority::Medium,
        topic: DEFAULT_TOPIC.to_string(),
        introduced_date: detail.introduced_date,
        original_agency: detail.chamber,
        requested_by_governor: detail.requested_by_governor,
        hearings: previous.map(|p| p.hearings.clone()).unwrap_or_default(),
        last_updated: fetched_at,
        leg_url: leg_url(detail.number, session_year),
        session: SessionTag::derive(detail.introduced_date, session_year),
    };
    enrichment.apply(&mut record);
    record
}

/// Groups hearing items per bill id, ordered by date and deduplicated.
pub fn hearings_by_bill(items: Vec<HearingItem>) -> HashMap<String, Vec<HearingRef>> {
    let mut by_bill: HashMap<String, Vec<HearingRef>> = HashMap::new();
    for item in items {
        let hearings = by_bill.entry(canonical_bill_id(&item.bill_id)).or_default();
        if !hearings.contains(&item.hearing) {
            hearings.push(item.hearing);
        }
    }
    for hearings in by_bill.values_mut() {
        hearings.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.committee.cmp(&b.committee)));
    }
    by_bill
}

/// Replaces each record's hearings with the fresh mapping.
///
/// Agenda items may cite a substitute id (`SHB1001` for `HB1001`), so an exact id miss
/// falls back to the (chamber, number) pair.
pub fn apply_hearings(records: &mut [BillRecord], by_bill: &HashMap<String, Vec<HearingRef>>) {
    let mut by_key: HashMap<(Chamber, u32), &Vec<HearingRef>> = HashMap::new();
    for (id, hearings) in by_bill {
        if let Some(key) = BillKey::parse(id) {
            by_key.entry((key.chamber(), key.number)).or_insert(hearings);
        }
    }
    for record in records.iter_mut() {
        let fresh = by_bill.get(&record.id).or_else(|| {
            BillKey::parse(&record.id).and_then(|key| by_key.get(&(key.chamber(), key.number)).copied())
        });
        record.hearings = fresh.cloned().unwrap_or_default();
    }
}

#[derive(Default)]
struct RunCounters {
    roster_size: usize,
    new_found: usize,
    new_fetched: usize,
    stale_checked: usize,
    changed: usize,
}

pub struct SyncPipeline {
    config: SyncConfig,
    data: DataDir,
    registry: Arc<dyn LegislativeRegistry>,
    enrichment: Box<dyn EnrichmentHook>,
}

impl SyncPipeline {
    /// Pipeline against the live SOAP registry.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let registry = SoapRegistry::new(config.service_base.clone(), config.http_client_config())?;
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    pub fn with_registry(config: SyncConfig, registry: Arc<dyn LegislativeRegistry>) -> Self {
        let data = DataDir::new(config.data_dir.clone());
        Self {
            config,
            data,
            registry,
            enrichment: Box::<KeywordEnrichment>::default(),
        }
    }

    pub fn with_enrichment(mut self, enrichment: Box<dyn EnrichmentHook>) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data
    }

    /// One sync run. Fatal errors are appended to the sync log before being returned.
    pub async fn run_once(&self, requested: SyncMode) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        match self.run_inner(requested, started_at).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                let failures = match err.downcast_ref::<SyncError>() {
                    Some(SyncError::CircuitBreakerTripped { consecutive, .. }) => *consecutive,
                    _ => 0,
                };
                let entry = SyncLogEntry {
                    timestamp: Utc::now(),
                    status: "failed".to_string(),
                    bills_count: 0,
                    new_bills: 0,
                    stale_checked: 0,
                    changed: 0,
                    failures,
                    message: Some(format!("{err:#}")),
                };
                if let Err(log_err) = self.data.append_sync_log(entry).await {
                    warn!(error = %format!("{log_err:#}"), "could not record failed run in sync log");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(&self, requested: SyncMode, started_at: DateTime<Utc>) -> Result<SyncRunSummary> {
        let manifest_store = self.data.manifest_store();
        let mut manifest = manifest_store.load().await;
        let prior_known = manifest.bill_count.max(manifest.bills.len());
        let existing = self.data.load_bills().await;

        let mode = if requested == SyncMode::Full || manifest.is_empty() || existing.is_empty() {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        };
        if mode != requested {
            info!(
                manifest_entries = manifest.bills.len(),
                existing_bills = existing.len(),
                "no usable manifest/dataset; falling back to full resync"
            );
        }
        info!(mode = mode.as_str(), biennium = %self.config.biennium(), "sync run starting");

        let existing_by_id: HashMap<&str, &BillRecord> =
            existing.iter().map(|r| (r.id.as_str(), r)).collect();
        let mut counters = RunCounters::default();
        let mut report = BatchReport::new(self.config.breaker_threshold);
        let mut updates: BTreeMap<String, BillRecord> = BTreeMap::new();

        let roster = self.scan_roster().await;
        counters.roster_size = roster.len();
        let new_numbers = match mode {
            SyncMode::Full => roster.iter().map(|entry| entry.number).collect::<Vec<_>>(),
            SyncMode::Incremental => find_new_bill_numbers(&roster, &manifest),
        };
        counters.new_found = new_numbers.len();
        info!(count = new_numbers.len(), "bills to fetch from roster");

        for number in new_numbers {
            let outcome = self.fetch_record(number, &existing_by_id).await;
            report.observe(&outcome)?;
            if let FetchOutcome::Fetched(record) = outcome {
                counters.new_fetched += 1;
                if self.absorb(*record, &mut manifest, &existing_by_id, &mut updates) {
                    counters.changed += 1;
                }
            }
        }

        let budget = self.config.batch_size.saturating_sub(counters.new_fetched);
        let stale_ids = match mode {
            SyncMode::Incremental => select_bills_for_refresh(&manifest, budget),
            SyncMode::Full => Vec::new(),
        };
        info!(count = stale_ids.len(), budget, "refreshing stale bills");

        for id in stale_ids {
            let Some(key) = BillKey::parse(&id) else {
                warn!(bill_id = %id, "manifest id has no bill number; skipping refresh");
                continue;
            };
            counters.stale_checked += 1;
            let outcome = self.fetch_record(key.number, &existing_by_id).await;
            report.observe(&outcome)?;
            if let FetchOutcome::Fetched(record) = outcome {
                if record.id != id {
                    warn!(
                        scheduled = %id,
                        returned = %record.id,
                        "upstream returned a different bill id; marking the scheduled entry fetched"
                    );
                    manifest.touch(&id, record.last_updated);
                }
                if self.absorb(*record, &mut manifest, &existing_by_id, &mut updates) {
                    counters.changed += 1;
                }
            }
        }

        info!(
            fetched = report.succeeded,
            failures = report.failures.len(),
            updates = updates.len(),
            "fetch phase complete"
        );

        let mut merged = merge_bills(existing.clone(), updates);
        if merged.is_empty() {
            return Err(SyncError::NoBills.into());
        }

        let hearings_refreshed = self.refresh_hearings(&mut merged).await;
        backfill_committee(&mut merged);

        let doc = BillsDocument::new(
            merged,
            started_at,
            self.config.session_year,
            self.config.biennium(),
            DatasetMetadata {
                source: DATASET_SOURCE.to_string(),
                endpoint: self.registry.endpoint().to_string(),
                mode: mode.as_str().to_string(),
            },
        );
        let snapshot = self.data.save_bills(&doc).await?;
        self.data
            .write_stats(&doc.bills, started_at)
            .await
            .context("writing stats")?;

        for record in &doc.bills {
            if !manifest.contains(&record.id) {
                manifest.record_fetch(record, record.last_updated);
            }
        }
        if doc.total_bills < prior_known {
            warn!(
                known = prior_known,
                dataset = doc.total_bills,
                "dataset is smaller than the manifest's known count; keeping the known count"
            );
        }
        manifest.bill_count = doc.total_bills.max(prior_known);
        match mode {
            SyncMode::Full => manifest.last_full_sync = Some(started_at),
            SyncMode::Incremental => manifest.last_incremental_sync = Some(started_at),
        }
        manifest_store.save(&manifest).await.context("saving manifest")?;

        self.data
            .append_sync_log(SyncLogEntry {
                timestamp: started_at,
                status: "success".to_string(),
                bills_count: doc.total_bills,
                new_bills: counters.new_fetched,
                stale_checked: counters.stale_checked,
                changed: counters.changed,
                failures: report.failures.len(),
                message: None,
            })
            .await
            .context("appending sync log")?;

        let baseline = (prior_known > 0).then_some(prior_known);
        let validation_errors = validate_with_known_count(&self.data.bills_path(), baseline);
        for violation in &validation_errors {
            warn!(violation = %violation, "dataset validation failed");
        }

        let summary = SyncRunSummary {
            started_at,
            finished_at: Utc::now(),
            mode,
            roster_size: counters.roster_size,
            new_found: counters.new_found,
            new_fetched: counters.new_fetched,
            stale_checked: counters.stale_checked,
            changed: counters.changed,
            failures: report.failures.len(),
            total_bills: doc.total_bills,
            hearings_refreshed,
            snapshot: snapshot.display().to_string(),
            validation_errors,
        };
        info!(
            total_bills = summary.total_bills,
            changed = summary.changed,
            failures = summary.failures,
            "sync run complete"
        );
        Ok(summary)
    }

    /// Union of the by-year rosters for both years of the biennium and the prefiled list.
    ///
    /// A failed roster call only shrinks the union.
    async fn scan_roster(&self) -> Vec<billsync_core::RosterEntry> {
        let mut sources = Vec::new();
        let mut years = vec![self.config.session_year];
        if self.config.biennium_start() != self.config.session_year {
            years.push(self.config.biennium_start());
        }
        for year in years {
            match self.registry.roster_by_year(year).await {
                Ok(entries) => {
                    debug!(year, count = entries.len(), "roster by year");
                    sources.push(entries);
                }
                Err(err) => warn!(year, error = %err, "roster by year failed"),
            }
        }
        match self.registry.prefiled_roster().await {
            Ok(entries) => {
                debug!(count = entries.len(), "prefiled roster");
                sources.push(entries);
            }
            Err(err) => warn!(error = %err, "prefiled roster failed"),
        }
        union_rosters(sources)
    }

    async fn fetch_record(&self, number: u32, existing_by_id: &HashMap<&str, &BillRecord>) -> FetchOutcome {
        match self.registry.bill_detail(&self.config.biennium(), number).await {
            Ok(detail) => {
                let id = canonical_bill_id(&detail.id);
                let previous = existing_by_id.get(id.as_str()).copied();
                let record = build_bill_record(
                    &detail,
                    self.config.session_year,
                    Utc::now(),
                    previous,
                    self.enrichment.as_ref(),
                );
                debug!(bill_id = %record.id, number, status = %record.status, "fetched bill");
                FetchOutcome::Fetched(Box::new(record))
            }
            Err(err) => {
                warn!(number, error = %err, "bill detail fetch failed");
                FetchOutcome::Failed {
                    number,
                    reason: err.into(),
                }
            }
        }
    }

    /// Folds a fetched record into the manifest and, when its content changed, into `updates`.
    fn absorb(
        &self,
        record: BillRecord,
        manifest: &mut Manifest,
        existing_by_id: &HashMap<&str, &BillRecord>,
        updates: &mut BTreeMap<String, BillRecord>,
    ) -> bool {
        let fingerprint = record.fingerprint();
        let unchanged = existing_by_id.contains_key(record.id.as_str())
            && manifest
                .entry(&record.id)
                .is_some_and(|entry| entry.content_hash == fingerprint);
        if unchanged {
            manifest.touch(&record.id, record.last_updated);
            debug!(bill_id = %record.id, "content unchanged");
            return false;
        }
        manifest.record_fetch(&record, record.last_updated);
        updates.insert(record.id.clone(), record);
        true
    }

    /// Returns false when the hearing query failed and existing hearings were kept.
    async fn refresh_hearings(&self, records: &mut [BillRecord]) -> bool {
        let today = Utc::now().date_naive();
        let begin = today - ChronoDuration::days(self.config.hearing_days_back);
        let end = today + ChronoDuration::days(self.config.hearing_days_ahead);
        match self.registry.hearings(begin, end).await {
            Ok(items) => {
                let by_bill = hearings_by_bill(items);
                info!(bills_with_hearings = by_bill.len(), %begin, %end, "hearings refreshed");
                apply_hearings(records, &by_bill);
                true
            }
            Err(err) => {
                warn!(error = %err, "hearing query failed; keeping existing hearings");
                false
            }
        }
    }
}

pub async fn run_sync_once_from_env(requested: SyncMode) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let enrichment = KeywordEnrichment::from_workspace_root(&config.workspace_root)?;
    let pipeline = SyncPipeline::new(config)?.with_enrichment(Box::new(enrichment));
    pipeline.run_once(requested).await
}
