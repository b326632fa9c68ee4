//! Canonical lifecycle states and the classifier that maps raw status text onto them.
//!
//! History text accumulates over a bill's lifetime, so later-stage markers are
//! checked before origin-chamber ones.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Chamber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Prefiled,
    Introduced,
    Committee,
    Floor,
    PassedOrigin,
    OppositeCommittee,
    OppositeFloor,
    PassedLegislature,
    Governor,
    Enacted,
    PartialVeto,
    Vetoed,
    Failed,
}

impl CanonicalStatus {
    pub const ALL: [CanonicalStatus; 13] = [
        CanonicalStatus::Prefiled,
        CanonicalStatus::Introduced,
        CanonicalStatus::Committee,
        CanonicalStatus::Floor,
        CanonicalStatus::PassedOrigin,
        CanonicalStatus::OppositeCommittee,
        CanonicalStatus::OppositeFloor,
        CanonicalStatus::PassedLegislature,
        CanonicalStatus::Governor,
        CanonicalStatus::Enacted,
        CanonicalStatus::PartialVeto,
        CanonicalStatus::Vetoed,
        CanonicalStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalStatus::Prefiled => "prefiled",
            CanonicalStatus::Introduced => "introduced",
            CanonicalStatus::Committee => "committee",
            CanonicalStatus::Floor => "floor",
            CanonicalStatus::PassedOrigin => "passed_origin",
            CanonicalStatus::OppositeCommittee => "opposite_committee",
            CanonicalStatus::OppositeFloor => "opposite_floor",
            CanonicalStatus::PassedLegislature => "passed_legislature",
            CanonicalStatus::Governor => "governor",
            CanonicalStatus::Enacted => "enacted",
            CanonicalStatus::PartialVeto => "partial_veto",
            CanonicalStatus::Vetoed => "vetoed",
            CanonicalStatus::Failed => "failed",
        }
    }

    /// Terminal records are not expected to change and are skipped by refresh scheduling.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CanonicalStatus::Enacted
                | CanonicalStatus::PartialVeto
                | CanonicalStatus::Vetoed
                | CanonicalStatus::Failed
        )
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown canonical status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for CanonicalStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Session-law citation such as `C 123 L 26`, matched against lowercased history.
fn cites_chapter_law(history: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\bc\s+\d+\s+l\s+\d{2,4}\b").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(history))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Classifies raw upstream status/history text into one canonical state.
pub fn normalize_status(status_text: &str, history_text: &str, chamber: Chamber) -> CanonicalStatus {
    let status = status_text.to_lowercase();
    let history = history_text.to_lowercase();
    let opposite = chamber.opposite().map(|c| c.as_str().to_lowercase());

    if contains_any(&history, &["effective date", "governor signed"])
        || cites_chapter_law(&history)
    {
        return CanonicalStatus::Enacted;
    }
    if contains_any(&history, &["delivered to governor", "governor's desk"]) {
        return CanonicalStatus::Governor;
    }
    if contains_any(&history, &["partial veto", "partially vetoed"]) {
        return CanonicalStatus::PartialVeto;
    }
    if history.contains("veto") {
        return CanonicalStatus::Vetoed;
    }
    if contains_any(&history, &["died", "failed"]) {
        return CanonicalStatus::Failed;
    }
    if history.contains("passed") && history.contains("house") && history.contains("senate") {
        return CanonicalStatus::PassedLegislature;
    }
    if history.contains("third reading") && history.contains("passed") {
        return match &opposite {
            Some(other) if history.contains(other.as_str()) => CanonicalStatus::OppositeFloor,
            _ => CanonicalStatus::PassedOrigin,
        };
    }
    if let Some(other) = &opposite {
        if history.contains(&format!("referred to {other}")) {
            return CanonicalStatus::OppositeCommittee;
        }
    }

    if status.contains("passed") {
        return CanonicalStatus::PassedOrigin;
    }
    if status.contains("committee") {
        return CanonicalStatus::Committee;
    }
    if status.contains("introduced") {
        return CanonicalStatus::Introduced;
    }
    if contains_any(&status, &["prefiled", "pre-filed"]) {
        return CanonicalStatus::Prefiled;
    }

    if history.contains("referred to") {
        CanonicalStatus::Committee
    } else if history.contains("first reading") {
        CanonicalStatus::Introduced
    } else if contains_any(
        &history,
        &["second reading", "third reading", "rules committee", "placed on"],
    ) {
        CanonicalStatus::Floor
    } else if history.contains("passed") {
        CanonicalStatus::PassedOrigin
    } else {
        CanonicalStatus::Prefiled
    }
}
