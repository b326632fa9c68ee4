//! Keyword classifiers for topic and priority, plus committee backfill.

use std::path::Path;

use anyhow::{Context, Result};
use billsync_core::{BillRecord, Priority};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_TOPIC: &str = "General Government";

pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, record: &mut BillRecord);
}

#[derive(Debug, Default)]
pub struct NoopEnrichmentHook;

impl EnrichmentHook for NoopEnrichmentHook {
    fn apply(&self, _record: &mut BillRecord) {}
}

#[derive(Debug, Clone, Deserialize)]
struct EnrichmentRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    default_topic: Option<String>,
    #[serde(default)]
    topics: Vec<TopicRule>,
    #[serde(default)]
    priority: Option<PriorityRules>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicRule {
    pub topic: String,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriorityRules {
    #[serde(default)]
    pub high: Vec<String>,
    #[serde(default)]
    pub low: Vec<String>,
}

/// Title keyword rules; the first matching topic wins.
#[derive(Debug, Clone)]
pub struct KeywordEnrichment {
    default_topic: String,
    topics: Vec<TopicRule>,
    priority: PriorityRules,
}

fn rule(topic: &str, needles: &[&str]) -> TopicRule {
    TopicRule {
        topic: topic.to_string(),
        contains_any: needles.iter().map(|n| n.to_string()).collect(),
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|needle| haystack.contains(&needle.to_ascii_lowercase()))
}

impl Default for KeywordEnrichment {
    fn default() -> Self {
        Self {
            default_topic: DEFAULT_TOPIC.to_string(),
            topics: vec![
                rule("Education", &["school", "education", "student", "teacher", "college", "university", "early learning", "child care"]),
                rule("Tax & Revenue", &["tax", "revenue", "budget", "appropriation", "levy", "fiscal"]),
                rule("Housing", &["housing", "rent", "landlord", "tenant", "homeless", "zoning"]),
                rule("Healthcare", &["health", "medical", "hospital", "medicaid", "pharmac", "behavioral"]),
                rule("Environment", &["environment", "climate", "energy", "salmon", "wildlife", "pollution", "emission", "water"]),
                rule("Transportation", &["transportation", "highway", "road", "vehicle", "transit", "ferr", "traffic"]),
                rule("Public Safety", &["crime", "criminal", "police", "law enforcement", "firearm", "sentencing", "correction"]),
                rule("Labor & Employment", &["employ", "wage", "labor", "worker", "workplace"]),
                rule("Business & Commerce", &["business", "commerce", "consumer", "insurance", "corporation"]),
                rule("Technology", &["technology", "privacy", "broadband", "cyber", "artificial intelligence", "internet"]),
                rule("Agriculture", &["agricultur", "farm", "livestock"]),
                rule("Elections", &["election", "ballot", "voter", "campaign"]),
            ],
            priority: PriorityRules {
                high: ["emergency", "budget", "appropriation", "public safety", "tax"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                low: ["honoring", "recognizing", "commemorat", "designating", "technical correction", "memorial"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
        }
    }
}

impl KeywordEnrichment {
    /// Loads `rules/enrichment.yaml` under `root`, falling back to the built-in rules when absent.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("enrichment.yaml");
        if !path.exists() {
            debug!(path = %path.display(), "no enrichment rules file; using built-in rules");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: EnrichmentRulesFile = serde_yaml::from_str(text)?;
        let builtin = Self::default();
        Ok(Self {
            default_topic: file.default_topic.unwrap_or(builtin.default_topic),
            topics: if file.topics.is_empty() { builtin.topics } else { file.topics },
            priority: file.priority.unwrap_or(builtin.priority),
        })
    }

    pub fn determine_topic(&self, title: &str) -> String {
        let title = title.to_ascii_lowercase();
        self.topics
            .iter()
            .find(|rule| contains_any(&title, &rule.contains_any))
            .map(|rule| rule.topic.clone())
            .unwrap_or_else(|| self.default_topic.clone())
    }

    pub fn determine_priority(&self, title: &str, requested_by_governor: bool) -> Priority {
        let title = title.to_ascii_lowercase();
        if requested_by_governor || contains_any(&title, &self.priority.high) {
            Priority::High
        } else if contains_any(&title, &self.priority.low) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }
}

impl EnrichmentHook for KeywordEnrichment {
    fn apply(&self, record: &mut BillRecord) {
        record.topic = self.determine_topic(&record.title);
        record.priority = self.determine_priority(&record.title, record.requested_by_governor);
    }
}

/// Records without a committee take the committee of their latest hearing.
pub fn backfill_committee(records: &mut [BillRecord]) {
    for record in records.iter_mut().filter(|r| r.committee.is_none()) {
        record.committee = record
            .hearings
            .iter()
            .max_by_key(|h| h.date)
            .map(|h| h.committee.clone())
            .filter(|c| !c.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billsync_core::{CanonicalStatus, Chamber, HearingRef, SessionTag};
    use chrono::{NaiveDate, Utc};

    #[test]
    fn topic_uses_first_matching_rule() {
        let rules = KeywordEnrichment::default();
        assert_eq!(rules.determine_topic("Concerning school safety"), "Education");
        assert_eq!(rules.determine_topic("Relating to the property TAX levy"), "Tax & Revenue");
        assert_eq!(rules.determine_topic("Concerning the state flag"), DEFAULT_TOPIC);
    }

    #[test]
    fn priority_prefers_governor_then_keywords() {
        let rules = KeywordEnrichment::default();
        assert_eq!(rules.determine_priority("Concerning the state flag", true), Priority::High);
        assert_eq!(rules.determine_priority("Making emergency appropriations", false), Priority::High);
        assert_eq!(rules.determine_priority("Honoring the Seahawks", false), Priority::Low);
        assert_eq!(rules.determine_priority("Concerning school safety", false), Priority::Medium);
    }

    #[test]
    fn yaml_overrides_rules() {
        let rules = KeywordEnrichment::from_yaml(
            r#"
version: 1
default_topic: Miscellaneous
topics:
  - topic: Parks
    contains_any: [park, trail]
priority:
  high: [trail]
"#,
        )
        .expect("yaml");
        assert_eq!(rules.determine_topic("Concerning state TRAILS"), "Parks");
        assert_eq!(rules.determine_topic("Concerning school safety"), "Miscellaneous");
        assert_eq!(rules.determine_priority("Concerning state trails", false), Priority::High);
        assert_eq!(rules.determine_priority("Honoring the Seahawks", false), Priority::Medium);
    }

    #[test]
    fn missing_rules_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rules = KeywordEnrichment::from_workspace_root(dir.path()).expect("builtin");
        assert_eq!(rules.determine_topic("Concerning school safety"), "Education");
    }

    #[test]
    fn committee_backfills_from_latest_hearing() {
        let hearing = |day, committee: &str| HearingRef {
            date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            committee: committee.into(),
            time: None,
            location: None,
        };
        let mut record = BillRecord {
            id: "HB1001".into(),
            number: "HB 1001".into(),
            title: "t".into(),
            description: String::new(),
            sponsor: "s".into(),
            status: CanonicalStatus::Committee,
            status_text: String::new(),
            history_line: String::new(),
            committee: None,
            priority: Priority::Medium,
            topic: DEFAULT_TOPIC.into(),
            introduced_date: None,
            original_agency: Chamber::House,
            requested_by_governor: false,
            hearings: vec![hearing(20, "Appropriations"), hearing(14, "Education")],
            last_updated: Utc::now(),
            leg_url: String::new(),
            session: SessionTag::Current,
        };
        let mut records = vec![record.clone()];
        backfill_committee(&mut records);
        assert_eq!(records[0].committee.as_deref(), Some("Appropriations"));

        record.committee = Some("Rules".into());
        let mut records = vec![record];
        backfill_committee(&mut records);
        assert_eq!(records[0].committee.as_deref(), Some("Rules"));
    }
}
