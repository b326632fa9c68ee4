//! Roster scanning and staleness-ordered refresh selection.

use std::collections::HashSet;

use billsync_core::{canonical_bill_id, BillKey, Chamber, RosterEntry};
use billsync_storage::Manifest;

/// Union several roster listings, keeping the first entry seen for each bill number.
pub fn union_rosters<I>(sources: I) -> Vec<RosterEntry>
where
    I: IntoIterator<Item = Vec<RosterEntry>>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for source in sources {
        for entry in source {
            if seen.insert(entry.number) {
                out.push(entry);
            }
        }
    }
    out
}

/// Bill numbers in `roster` not yet represented in the manifest.
///
/// A manifest id such as `2SHB1037` covers roster entry `HB 1037`: ids are compared
/// both verbatim (canonicalized) and by their (chamber, number) pair.
pub fn find_new_bill_numbers(roster: &[RosterEntry], manifest: &Manifest) -> Vec<u32> {
    let known_keys: HashSet<(Chamber, u32)> = manifest
        .bills
        .keys()
        .filter_map(|id| BillKey::parse(id))
        .map(|key| (key.chamber(), key.number))
        .collect();

    let mut emitted = HashSet::new();
    roster
        .iter()
        .filter(|entry| {
            !manifest.contains(&canonical_bill_id(&entry.id))
                && !known_keys.contains(&(entry.chamber, entry.number))
        })
        .filter(|entry| emitted.insert(entry.number))
        .map(|entry| entry.number)
        .collect()
}

/// Oldest-fetched non-terminal ids, at most `budget` of them.
pub fn select_bills_for_refresh(manifest: &Manifest, budget: usize) -> Vec<String> {
    if budget == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<_> = manifest
        .bills
        .iter()
        .filter(|(_, entry)| !entry.status.is_terminal())
        .collect();
    candidates.sort_by(|(a_id, a), (b_id, b)| {
        a.last_fetched
            .cmp(&b.last_fetched)
            .then_with(|| a_id.cmp(b_id))
    });
    candidates
        .into_iter()
        .take(budget)
        .map(|(id, _)| id.clone())
        .collect()
}
