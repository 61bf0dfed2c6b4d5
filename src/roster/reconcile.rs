use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::roster::{Entry, OlsrRecord};

/// Merges the imported roster with the routing map.
///
/// Every entry whose phone number (first dot segment) has a routing record
/// gets that record attached. With `include_routable`, routable hosts absent
/// from the roster are appended as number-only entries; hosts whose name is
/// not purely a number are never synthesized. Original entries are neither
/// removed nor reordered, so running the merge twice over the same inputs
/// yields the same sequence.
pub fn merge(
    mut entries: Vec<Entry>,
    routing: &HashMap<String, OlsrRecord>,
    include_routable: bool,
) -> Vec<Entry> {
    let mut covered: HashSet<&str> = HashSet::new();
    for entry in entries.iter_mut() {
        let hostname = entry.phone_number.split('.').next().unwrap_or_default();
        if let Some((key, record)) = routing.get_key_value(hostname) {
            entry.olsr = Some(record.clone());
            covered.insert(key.as_str());
        }
    }
    debug!(
        "merged phonebook with routing data: {} entries, {} matches, {} known hosts",
        entries.len(),
        covered.len(),
        routing.len()
    );
    if !include_routable {
        return entries;
    }

    let mut routable: Vec<&OlsrRecord> = routing
        .iter()
        .filter(|(hostname, _)| !covered.contains(hostname.as_str()))
        .filter(|(hostname, _)| hostname.parse::<u64>().is_ok())
        .map(|(_, record)| record)
        .collect();
    // map order is arbitrary; keep the merged sequence deterministic
    routable.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    debug!("merge added {} routable entries", routable.len());
    entries.extend(routable.into_iter().map(Entry::from_olsr));
    entries
}
