pub mod import;
pub mod reconcile;
pub mod refresh;
pub mod routing;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::AREDN_DOMAIN;

/// A routing-table record for a reachable mesh host. Roster entries own a
/// clone so an old snapshot stays self-contained after a routing refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OlsrRecord {
    pub ip: String,
    pub hostname: String,
    pub comment: String,
}

/// One phonebook participant. The phone number doubles as the mesh hostname;
/// a set `olsr` field means the peer is currently routable ("active").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub first_name: String,
    pub last_name: String,
    pub callsign: String,
    pub phone_number: String,

    pub olsr: Option<OlsrRecord>,
}

impl Entry {
    /// Mesh hostname of the participant's phone.
    pub fn phone_fqdn(&self) -> String {
        format!("{}.{}", self.phone_number, AREDN_DOMAIN)
    }

    /// SIP identifier for calling the peer by mesh hostname.
    pub fn direct_call_address(&self) -> String {
        format!("{}@{}", self.phone_number, self.phone_fqdn())
    }

    /// Creates a roster entry for a routable host that has no phonebook row.
    /// Only the number (first dot segment of the hostname) and the routing
    /// record are known.
    pub fn from_olsr(olsr: &OlsrRecord) -> Entry {
        let phone_number = olsr
            .hostname
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        Entry {
            phone_number,
            olsr: Some(olsr.clone()),
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.olsr.is_some()
    }

    /// Human-readable contact name: `Last, First (Callsign)` with fallbacks
    /// when fields are blank. `None` when there is nothing to show.
    pub fn display_name(&self, prefix: &str) -> Option<String> {
        compose_name(self, prefix, ", ")
    }

    /// Ordering key: active entries lead (`*` sorts before alphanumerics),
    /// then last name, first name, callsign.
    pub fn name_key(&self) -> String {
        let pfx = if self.is_active() { "*" } else { "" };
        format!(
            "{}{}{}{}",
            pfx,
            self.last_name.to_lowercase(),
            self.first_name.to_lowercase(),
            self.callsign.to_lowercase()
        )
    }
}

/// Composes the contact name with a configurable last/first separator
/// (`", "` for phone directories, `" "` for LDAP).
pub fn compose_name(entry: &Entry, prefix: &str, separator: &str) -> Option<String> {
    let (first, last, call) = (
        entry.first_name.as_str(),
        entry.last_name.as_str(),
        entry.callsign.as_str(),
    );
    match (last.is_empty(), first.is_empty(), call.is_empty()) {
        (true, true, true) => None,
        (true, true, false) => Some(format!("{}{}", prefix, call)),
        (true, false, _) => Some(format!("{}{} ({})", prefix, first, call)),
        (false, true, _) => Some(format!("{}{} ({})", prefix, last, call)),
        (false, false, _) => Some(format!("{}{}{}{} ({})", prefix, last, separator, first, call)),
    }
}

/// Returns a copy of `entries` sorted by [`Entry::name_key`].
pub fn sorted_by_name(entries: &[Entry]) -> Vec<Entry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.name_key().cmp(&b.name_key()));
    sorted
}

/// The reconciled roster. Written only by the roster refresh loop, which
/// swaps in a complete snapshot; everyone else reads.
#[derive(Debug, Default)]
pub struct Records {
    pub entries: Vec<Entry>,
    pub updated: Option<DateTime<Utc>>,
}

pub type SharedRecords = Arc<RwLock<Records>>;

pub fn shared_records() -> SharedRecords {
    Arc::new(RwLock::new(Records::default()))
}

/// Node status as served by the sysinfo JSON API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysInfo {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub node_details: Option<NodeDetails>,
    #[serde(rename = "sysinfo", default)]
    pub system: Option<System>,

    #[serde(rename = "lon", default)]
    pub longitude: String,
    #[serde(rename = "lat", default)]
    pub latitude: String,
    #[serde(rename = "grid_square", default)]
    pub gridsquare: String,

    #[serde(default)]
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct System {
    #[serde(default)]
    pub uptime: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDetails {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub mesh_gateway: String,
    #[serde(default)]
    pub board_id: String,
    #[serde(default)]
    pub firmware_mfg: String,
    #[serde(default)]
    pub firmware_version: String,
}

/// Most recent sysinfo snapshot; written by the sysinfo refresh loop.
#[derive(Debug, Default)]
pub struct RuntimeInfo {
    pub sysinfo: Option<SysInfo>,
    pub updated: Option<DateTime<Utc>>,
}

pub type SharedRuntimeInfo = Arc<RwLock<RuntimeInfo>>;

pub fn shared_runtime_info() -> SharedRuntimeInfo {
    Arc::new(RwLock::new(RuntimeInfo::default()))
}

/// One operator notice pulled from an update URL. `info_type` selects the
/// rendering class: info, warn, danger, success; anything else is neutral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub info_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatesDocument {
    #[serde(default)]
    pub updates: Vec<Update>,
}

/// Most recent update banners; written by the updates refresh loop.
#[derive(Debug, Default)]
pub struct Updates {
    pub updates: Vec<Update>,
    pub updated: Option<DateTime<Utc>>,
}

pub type SharedUpdates = Arc<RwLock<Updates>>;

pub fn shared_updates() -> SharedUpdates {
    Arc::new(RwLock::new(Updates::default()))
}
