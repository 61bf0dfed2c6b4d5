use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::config::SharedConfig;
use crate::exporter::{ExportOptions, Format};
use crate::roster::{compose_name, sorted_by_name, SharedRecords};

pub const LDAP_RESULT_SUCCESS: u16 = 0;
pub const LDAP_RESULT_INVALID_CREDENTIALS: u16 = 49;

/// Single-term substring filters like `(cn=*ann*)` are all the phones send.
fn filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\w*=\*?([a-zA-Z0-9]+)\*?\)").unwrap())
}

pub fn cookie_to_idx(cookie: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&cookie[..4]);
    u32::from_le_bytes(bytes)
}

pub fn idx_to_cookie(idx: u32) -> Vec<u8> {
    idx.to_le_bytes().to_vec()
}

/// RFC 2696 paged-results control, reduced to what the adapter needs:
/// the page size and the progress cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagingControl {
    pub size: u32,
    pub cookie: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub base_dn: String,
    pub filter: String,
    pub size_limit: usize,
    pub paging: Option<PagingControl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl EntryAttribute {
    fn new(name: &str, value: &str) -> Self {
        EntryAttribute {
            name: name.to_string(),
            values: vec![value.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LdapEntry {
    pub dn: String,
    pub attributes: Vec<EntryAttribute>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entries: Vec<LdapEntry>,
    pub paging: Option<PagingControl>,
    pub result_code: u16,
}

/// LDAP address-book adapter
///
/// Translates the two operations mesh phones actually use, simple bind and
/// a one-term substring search, into roster scans. The wire protocol in
/// front of it stays external; these types are the interface a BER front-end
/// would drive.
#[derive(Clone)]
pub struct LdapDirectory {
    config: SharedConfig,
    records: SharedRecords,
}

impl LdapDirectory {
    pub fn new(config: SharedConfig, records: SharedRecords) -> Self {
        LdapDirectory { config, records }
    }

    /// Simple bind: credentials either match the configured pair or the
    /// bind fails, there are no per-user accounts.
    pub fn bind(&self, bind_dn: &str, bind_password: &str) -> u16 {
        let config = self.config.load();
        if bind_dn == config.ldap_user && bind_password == config.ldap_pwd {
            debug!("LDAP bind for DN {:?} (valid credentials)", bind_dn);
            LDAP_RESULT_SUCCESS
        } else {
            debug!("LDAP bind for DN {:?} (invalid credentials)", bind_dn);
            LDAP_RESULT_INVALID_CREDENTIALS
        }
    }

    pub async fn search(&self, request: &SearchRequest) -> SearchResult {
        let config = self.config.load();

        let mut query = String::new();
        if let Some(caps) = filter_re().captures(&request.filter) {
            if let Some(term) = caps.get(1) {
                query = term.as_str().to_lowercase();
            }
        }
        debug!(
            "LDAP search filter {:?}, searching for {:?}",
            request.filter, query
        );

        let snapshot = {
            let records = self.records.read().await;
            sorted_by_name(&records.entries)
        };

        let mut entries = Vec::new();
        for entry in &snapshot {
            if config.filter_inactive && !entry.is_active() {
                continue;
            }

            let prefix = if config.indicate_active && entry.is_active() {
                config.active_pfx.as_str()
            } else {
                ""
            };
            let name = match compose_name(entry, prefix, " ") {
                Some(name) => name,
                None => continue,
            };
            if !query.is_empty() && !name.to_lowercase().contains(&query) {
                continue;
            }

            // One sipPhone per unique telephone across the configured formats.
            let mut telephones: Vec<String> = Vec::new();
            for format in &config.formats {
                let format = Format::parse(format).unwrap_or(Format::Combined);
                let options = ExportOptions::from_config(&config, format);
                for telephone in crate::exporter::telephones(entry, &options) {
                    if !telephones.contains(&telephone) {
                        telephones.push(telephone);
                    }
                }
            }

            let mut attributes = vec![
                EntryAttribute::new("objectClass", "person"),
                EntryAttribute::new("displayname", &name),
                EntryAttribute::new("cn", &name),
                EntryAttribute::new("meshname", &name),
                EntryAttribute::new("firstname", &entry.first_name),
                EntryAttribute::new("gn", &entry.first_name),
                EntryAttribute::new("lastname", &entry.last_name),
                EntryAttribute::new("sn", &entry.last_name),
                EntryAttribute::new("callsign", &entry.callsign),
                EntryAttribute::new("telephoneNumber", &entry.phone_number),
                EntryAttribute::new("telephoneHostname", &entry.direct_call_address()),
            ];
            if let Some(olsr) = &entry.olsr {
                attributes.push(EntryAttribute::new("telephoneIP", &olsr.ip));
            }
            for telephone in &telephones {
                attributes.push(EntryAttribute::new("sipPhone", telephone));
            }

            entries.push(LdapEntry {
                dn: format!("sn={},{}", name, request.base_dn),
                attributes,
            });
        }

        // Small result sets are returned whole, everything else is paged
        // with a little-endian index cookie.
        if request.size_limit == 0 || entries.len() <= request.size_limit {
            return SearchResult {
                entries,
                paging: None,
                result_code: LDAP_RESULT_SUCCESS,
            };
        }

        let start = request
            .paging
            .as_ref()
            .and_then(|c| c.cookie.as_deref())
            .filter(|c| c.len() >= 4)
            .map(cookie_to_idx)
            .unwrap_or(0) as usize;
        let page: Vec<LdapEntry> = entries
            .into_iter()
            .skip(start)
            .take(request.size_limit)
            .collect();
        if page.len() >= request.size_limit {
            debug!(
                "LDAP search reached client size limit ({}), returning a page",
                request.size_limit
            );
        }

        let next = u32::try_from(start + page.len()).unwrap_or(u32::MAX);
        let size = request
            .paging
            .as_ref()
            .map(|c| c.size)
            .unwrap_or(request.size_limit as u32);
        SearchResult {
            entries: page,
            paging: Some(PagingControl {
                size,
                cookie: Some(idx_to_cookie(next)),
            }),
            result_code: LDAP_RESULT_SUCCESS,
        }
    }
}
