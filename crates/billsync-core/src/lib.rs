//! Core domain model for the mirrored bill dataset.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod fingerprint;
pub mod status;

pub use fingerprint::content_fingerprint;
pub use status::{normalize_status, CanonicalStatus, ParseStatusError};

pub const CRATE_NAME: &str = "billsync-core";

/// Chamber a bill originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chamber {
    House,
    Senate,
    #[serde(other)]
    Other,
}

impl Chamber {
    pub fn opposite(self) -> Option<Chamber> {
        match self {
            Chamber::House => Some(Chamber::Senate),
            Chamber::Senate => Some(Chamber::House),
            Chamber::Other => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Chamber::House => "House",
            Chamber::Senate => "Senate",
            Chamber::Other => "Other",
        }
    }

    /// Maps an upstream agency name ("House", "Senate", ...) to a chamber.
    pub fn from_agency(agency: &str) -> Self {
        let agency = agency.trim();
        if agency.eq_ignore_ascii_case("house") {
            Chamber::House
        } else if agency.eq_ignore_ascii_case("senate") {
            Chamber::Senate
        } else {
            Chamber::Other
        }
    }

    /// Derives the chamber from a bill-id prefix such as `HB`, `2SHB` or `SJM`.
    pub fn from_bill_prefix(prefix: &str) -> Self {
        let prefix = prefix.to_ascii_uppercase();
        if ["HB", "HJR", "HJM", "HCR"].iter().any(|t| prefix.ends_with(t)) {
            Chamber::House
        } else if ["SB", "SJR", "SJM", "SCR"].iter().any(|t| prefix.ends_with(t)) {
            Chamber::Senate
        } else {
            Chamber::Other
        }
    }
}

/// Prefix/number split of a bill id (`"2SHB 1037"` -> `2SHB`, `1037`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BillKey {
    pub prefix: String,
    pub number: u32,
}

impl BillKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let compact = canonical_bill_id(raw);
        let digits_start = compact
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(idx, _)| idx)?;
        let number = compact[digits_start..].parse().ok()?;
        Some(Self {
            prefix: compact[..digits_start].to_string(),
            number,
        })
    }

    pub fn chamber(&self) -> Chamber {
        Chamber::from_bill_prefix(&self.prefix)
    }
}

/// Dedup key used for records and manifest entries: whitespace removed, upper-cased.
pub fn canonical_bill_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Display form with a single space between prefix and number (`HB1001` -> `HB 1001`).
pub fn format_bill_number(raw: &str) -> String {
    match BillKey::parse(raw) {
        Some(key) if !key.prefix.is_empty() => format!("{} {}", key.prefix, key.number),
        _ => raw.trim().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Whether a record belongs to the active session or the concluded first year of the biennium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTag {
    Current,
    Prior,
}

impl SessionTag {
    pub fn derive(introduced: Option<NaiveDate>, session_year: i32) -> Self {
        match introduced {
            Some(date) if date.year() < session_year => SessionTag::Prior,
            _ => SessionTag::Current,
        }
    }
}

/// Committee meeting reference attached to a bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HearingRef {
    pub date: NaiveDate,
    pub committee: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Identity tuple from a roster listing; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub number: u32,
    pub chamber: Chamber,
    pub active: bool,
}

/// Validated detail response for one bill number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillDetail {
    pub id: String,
    pub number: u32,
    pub chamber: Chamber,
    pub title: String,
    pub description: String,
    pub sponsor: String,
    pub status_text: String,
    pub history_text: String,
    pub introduced_date: Option<NaiveDate>,
    pub requested_by_governor: bool,
}

/// Canonical persisted bill record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    pub id: String,
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub sponsor: String,
    pub status: CanonicalStatus,
    #[serde(default)]
    pub status_text: String,
    pub history_line: String,
    #[serde(default)]
    pub committee: Option<String>,
    pub priority: Priority,
    pub topic: String,
    pub introduced_date: Option<NaiveDate>,
    pub original_agency: Chamber,
    #[serde(default)]
    pub requested_by_governor: bool,
    #[serde(default)]
    pub hearings: Vec<HearingRef>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub leg_url: String,
    pub session: SessionTag,
}

impl BillRecord {
    pub fn introduced_date_text(&self) -> String {
        self.introduced_date
            .map(|d| d.to_string())
            .unwrap_or_default()
    }

    /// Fingerprint over the mutable fields watched for change detection.
    pub fn fingerprint(&self) -> String {
        content_fingerprint(
            self.status,
            &self.history_line,
            &self.introduced_date_text(),
            &self.sponsor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bill_key_splits_prefix_and_number() {
        let cases = [
            ("HB 1001", "HB", 1001),
            ("SB 5001", "SB", 5001),
            ("2SHB 1037", "2SHB", 1037),
            ("ESHB 1234", "ESHB", 1234),
            ("HB1001", "HB", 1001),
            ("HJR 4200", "HJR", 4200),
            ("SJM 8001", "SJM", 8001),
        ];
        for (raw, prefix, number) in cases {
            let key = BillKey::parse(raw).expect(raw);
            assert_eq!(key.prefix, prefix, "{raw}");
            assert_eq!(key.number, number, "{raw}");
        }
        assert!(BillKey::parse("HB").is_none());
    }

    #[test]
    fn chamber_follows_prefix_suffix() {
        assert_eq!(BillKey::parse("2SHB 1037").unwrap().chamber(), Chamber::House);
        assert_eq!(BillKey::parse("ESSB 5001").unwrap().chamber(), Chamber::Senate);
        assert_eq!(BillKey::parse("SJM 8001").unwrap().chamber(), Chamber::Senate);
        assert_eq!(BillKey::parse("XX 1").unwrap().chamber(), Chamber::Other);
        assert_eq!(Chamber::House.opposite(), Some(Chamber::Senate));
        assert_eq!(Chamber::Other.opposite(), None);
    }

    #[test]
    fn bill_number_formatting() {
        assert_eq!(format_bill_number("HB1001"), "HB 1001");
        assert_eq!(format_bill_number("HB 1001"), "HB 1001");
        assert_eq!(format_bill_number("2SSB5001"), "2SSB 5001");
        assert_eq!(canonical_bill_id("ESHB 1234"), "ESHB1234");
    }

    #[test]
    fn session_tag_uses_introduced_year() {
        let first_year = NaiveDate::from_ymd_opt(2025, 1, 13).unwrap();
        let second_year = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap();
        assert_eq!(SessionTag::derive(Some(first_year), 2026), SessionTag::Prior);
        assert_eq!(SessionTag::derive(Some(second_year), 2026), SessionTag::Current);
        assert_eq!(SessionTag::derive(None, 2026), SessionTag::Current);
    }

    #[test]
    fn unknown_agency_deserializes_as_other() {
        let chamber: Chamber = serde_json::from_str("\"Joint\"").unwrap();
        assert_eq!(chamber, Chamber::Other);
    }
}
