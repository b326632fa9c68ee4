use std::collections::{BTreeMap, HashSet};

use billsync_core::BillRecord;

/// Overlay `updates` onto `existing`.
///
/// Records keep their position; ids only present in `updates` are appended in id order.
/// The first occurrence of an id wins, so the output never repeats an id.
pub fn merge_bills(existing: Vec<BillRecord>, mut updates: BTreeMap<String, BillRecord>) -> Vec<BillRecord> {
    let mut seen = HashSet::with_capacity(existing.len() + updates.len());
    let mut merged = Vec::with_capacity(existing.len() + updates.len());

    for record in existing {
        if !seen.insert(record.id.clone()) {
            continue;
        }
        match updates.remove(&record.id) {
            Some(update) => merged.push(update),
            None => merged.push(record),
        }
    }
    for (id, update) in updates {
        if seen.insert(id) {
            merged.push(update);
        }
    }
    merged
}
