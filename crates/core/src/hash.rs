//! Stable fingerprints for timeseries identities.

use sha2::{Digest, Sha256};

use crate::record::MetricRecord;

/// Fingerprint of one distinct timeseries: organization, name, and tag set.
pub type UnitHash = u64;

const FIELD_SEPARATOR: u8 = 0x1f;
const PAIR_SEPARATOR: u8 = 0x1e;

/// Computes the unit hash of a record.
///
/// Must stay stable across processes and releases: workers share the
/// backend's sets of admitted hashes, so `std` hashers cannot be used.
pub fn unit_hash(record: &MetricRecord) -> UnitHash {
    let mut hasher = Sha256::new();
    hasher.update(record.org_id.to_be_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(record.name.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    // BTreeMap iterates in key order.
    for (key, value) in &record.tags {
        hasher.update(key.as_bytes());
        hasher.update([PAIR_SEPARATOR]);
        hasher.update(value.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
    }
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
