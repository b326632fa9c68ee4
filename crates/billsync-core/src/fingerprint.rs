use sha2::{Digest, Sha256};

use crate::CanonicalStatus;

/// Stable hex sha256 over the change-relevant fields of a record.
///
/// Fields are length-prefixed so that shifting text between adjacent fields
/// never produces the same digest.
pub fn content_fingerprint(
    status: CanonicalStatus,
    history: &str,
    introduced_date: &str,
    sponsor: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [status.as_str(), history, introduced_date, sponsor] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}
