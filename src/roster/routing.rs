use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::roster::{OlsrRecord, SysInfo};
use crate::Result;

const COMMENT_PREFIX: &str = "#";

/// `<ip> <hostname> # <comment>` with an all-digit hostname. Hosts that are
/// not phone numbers never make it into the routing map.
fn phones_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9\.]+)\s+([0-9]+)\s?#\s*(.*)").unwrap())
}

fn phone_hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").unwrap())
}

/// Parses an OLSR hosts file into the hostname→record routing map.
pub async fn from_file(path: &str) -> Result<HashMap<String, OlsrRecord>> {
    let blob = crate::roster::import::read_from_file(path).await?;
    Ok(parse_hosts(&String::from_utf8_lossy(&blob)))
}

pub fn parse_hosts(text: &str) -> HashMap<String, OlsrRecord> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
            continue;
        }
        let caps = match phones_re().captures(line) {
            Some(caps) => caps,
            None => continue,
        };
        let record = OlsrRecord {
            ip: caps[1].to_string(),
            hostname: caps[2].to_string(),
            comment: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
        };
        map.insert(record.hostname.clone(), record);
    }
    map
}

/// Builds the routing map from a sysinfo host table, applying the same
/// phone-number hostname filter as the hosts-file reader.
pub fn from_sysinfo(sysinfo: &SysInfo) -> HashMap<String, OlsrRecord> {
    let mut map = HashMap::new();
    for host in &sysinfo.hosts {
        if !phone_hostname_re().is_match(&host.name) {
            continue;
        }
        map.insert(
            host.name.clone(),
            OlsrRecord {
                ip: host.ip.clone(),
                hostname: host.name.clone(),
                comment: String::new(),
            },
        );
    }
    map
}
