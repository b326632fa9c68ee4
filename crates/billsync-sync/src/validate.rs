//! Post-write structural and data-loss checks over the persisted files.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use billsync_core::CanonicalStatus;
use serde_json::Value;
use tracing::debug;

pub const REQUIRED_FIELDS: [&str; 13] = [
    "id",
    "number",
    "title",
    "status",
    "sponsor",
    "historyLine",
    "introducedDate",
    "originalAgency",
    "hearings",
    "lastUpdated",
    "session",
    "priority",
    "topic",
];

/// Fraction of the manifest's known count the dataset must retain.
pub const DATA_LOSS_RATIO: f64 = 0.9;

/// Every violation found in the dataset at `bills_path`; empty means pass.
///
/// A missing or unparsable manifest only disables the data-loss check.
pub fn validate(bills_path: &Path, manifest_path: &Path) -> Vec<String> {
    validate_with_known_count(bills_path, manifest_known_count(manifest_path))
}

/// Same checks as [`validate`], with the data-loss baseline supplied by the caller.
///
/// A sync run passes the count it knew before rewriting the manifest.
pub fn validate_with_known_count(bills_path: &Path, known: Option<usize>) -> Vec<String> {
    let mut errors = Vec::new();

    if !bills_path.exists() {
        errors.push(format!("Bills file not found: {}", bills_path.display()));
        return errors;
    }
    let doc: Value = match std::fs::read_to_string(bills_path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(doc) => doc,
        Err(err) => {
            errors.push(format!("Bills file is not valid JSON: {}: {err}", bills_path.display()));
            return errors;
        }
    };
    let Some(bills) = doc.get("bills").and_then(Value::as_array) else {
        errors.push(format!("Bills file has no bills array: {}", bills_path.display()));
        return errors;
    };

    match doc.get("totalBills").and_then(Value::as_u64) {
        Some(declared) if declared as usize != bills.len() => errors.push(format!(
            "totalBills ({declared}) does not match actual bill count ({})",
            bills.len()
        )),
        Some(_) => {}
        None => errors.push("totalBills is missing or not a number".to_string()),
    }

    let mut seen = HashSet::new();
    for (index, bill) in bills.iter().enumerate() {
        let Some(fields) = bill.as_object() else {
            errors.push(format!("Bill index {index} is not an object"));
            continue;
        };
        let id = fields.get("id").and_then(Value::as_str).unwrap_or("<no id>");

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !fields.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            errors.push(format!("Bill index {index} ({id}) missing fields: {}", missing.join(", ")));
        }

        if fields.contains_key("id") && !seen.insert(id.to_string()) {
            errors.push(format!("Duplicate bill ID: {id}"));
        }

        if let Some(status) = fields.get("status") {
            let valid = status
                .as_str()
                .is_some_and(|s| CanonicalStatus::from_str(s).is_ok());
            if !valid {
                errors.push(format!("Bill {id} has invalid status: {status}"));
            }
        }
    }

    if let Some(known) = known {
        if known > 0 && (bills.len() as f64) < DATA_LOSS_RATIO * known as f64 {
            errors.push(format!(
                "Bill count dropped >10%: manifest knows {known} bills, dataset has {}",
                bills.len()
            ));
        }
    }

    errors
}

fn manifest_known_count(manifest_path: &Path) -> Option<usize> {
    let text = std::fs::read_to_string(manifest_path).ok()?;
    let manifest: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            debug!(path = %manifest_path.display(), error = %err, "manifest unreadable; skipping data-loss check");
            return None;
        }
    };
    let declared = manifest.get("billCount").and_then(Value::as_u64).map(|n| n as usize);
    let entries = manifest.get("bills").and_then(Value::as_object).map(|b| b.len());
    match (declared, entries) {
        (Some(declared), Some(entries)) => Some(declared.max(entries)),
        (declared, entries) => declared.or(entries),
    }
}
