use crate::game::types::{VersionOrigin, VersionRecord};
use std::collections::BTreeMap;

/// Merge per-source listings into one list, newest first.
///
/// `listings` must already be in source order (official, then mirrors by
/// priority): the first source reporting a version owns its tag. Exactly the
/// highest version is flagged `is_latest`.
pub fn merge_listings(listings: &[(VersionOrigin, Vec<u32>)]) -> Vec<VersionRecord> {
    let mut merged: BTreeMap<u32, &VersionOrigin> = BTreeMap::new();
    for (origin, versions) in listings {
        for version in versions.iter().filter(|v| **v > 0) {
            merged.entry(*version).or_insert(origin);
        }
    }

    merged
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, (version, origin))| VersionRecord {
            version,
            source: origin.clone(),
            is_latest: i == 0,
        })
        .collect()
}
