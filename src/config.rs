use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const MINIMAL_RELOAD_SECONDS: u64 = 60;
pub const MAX_RELOAD_SECONDS: u64 = 2 * 24 * 60 * 60;

pub const COUNTRY_PFX_DIGITS: usize = 3;
/// Maximal length of local phone numbers (i.e. without country prefix).
/// Numbers of this length or shorter are treated as local numbers.
pub const LOCAL_PHONE_NUMBER_MAX: usize = 7;

/// Service configuration, read from flags or a JSON file. Scalar fields are
/// updated pointwise by the config endpoint; readers always work from a
/// whole [`SharedConfig`] snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    // Generally applicable.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub olsr_file: String,
    #[serde(default)]
    pub sysinfo_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub server: bool,
    #[serde(default)]
    pub ldap_server: bool,
    #[serde(default)]
    pub sip_server: bool,
    #[serde(default)]
    pub web_server: bool,
    #[serde(default)]
    pub include_routable: bool,
    #[serde(default)]
    pub country_prefix: String,

    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub allow_runtime_config_changes: bool,
    #[serde(default)]
    pub allow_permanent_config_changes: bool,

    // Only relevant when running in non-server / ad-hoc mode.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub resolve: bool,
    #[serde(default)]
    pub indicate_active: bool,
    #[serde(default)]
    pub filter_inactive: bool,
    #[serde(default)]
    pub active_pfx: String,

    // Only relevant when running in server mode.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cache: String,
    #[serde(default)]
    pub reload_seconds: u64,
    #[serde(default)]
    pub web_user: String,
    #[serde(default)]
    pub web_pwd: String,
    #[serde(default)]
    pub update_urls: Vec<String>,
    // Only relevant when the LDAP server is on.
    #[serde(default)]
    pub ldap_port: u16,
    #[serde(default)]
    pub ldap_user: String,
    #[serde(default)]
    pub ldap_pwd: String,
    // Only relevant when the SIP server is on.
    #[serde(default)]
    pub sip_port: u16,
}

impl Config {
    pub fn reload(&self) -> Duration {
        Duration::from_secs(self.reload_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        validate_sources(&self.sources)?;
        validate_country_prefix(&self.country_prefix)?;

        if self.server {
            if self.reload_seconds < MINIMAL_RELOAD_SECONDS {
                return Err(Error::Config(format!(
                    "reload config/flag too low (<{}): {}",
                    MINIMAL_RELOAD_SECONDS, self.reload_seconds
                )));
            }
            if self.reload_seconds > MAX_RELOAD_SECONDS {
                return Err(Error::Config(format!(
                    "reload config/flag too high (>{}): {}",
                    MAX_RELOAD_SECONDS, self.reload_seconds
                )));
            }
        } else {
            if self.path.is_empty() {
                return Err(Error::Config("path needs to be set".to_string()));
            }
            if self.formats.is_empty() {
                return Err(Error::Config("formats need to be set".to_string()));
            }
            if self.targets.is_empty() {
                return Err(Error::Config("targets need to be set".to_string()));
            }
        }
        Ok(())
    }

    /// Numbers longer than the local maximum already carry a country prefix.
    pub fn is_local_number(&self, phone_number: &str) -> bool {
        phone_number.len() > LOCAL_PHONE_NUMBER_MAX
    }

    pub fn local_number(&self, phone_number: &str) -> String {
        if self.is_local_number(phone_number) {
            phone_number.to_string()
        } else {
            phone_number
                .chars()
                .skip(COUNTRY_PFX_DIGITS)
                .collect()
        }
    }

    pub fn global_number(&self, phone_number: &str) -> String {
        if self.is_local_number(phone_number) {
            format!("{}{}", self.country_prefix, phone_number)
        } else {
            phone_number.to_string()
        }
    }

    /// Pretty JSON rendering; passwords are censored unless explicitly kept
    /// for writing back to disk.
    pub fn to_json(&self, censor_sensitive: bool) -> Result<String> {
        let mut conf = self.clone();
        if censor_sensitive {
            conf.ldap_pwd = "***".to_string();
            conf.web_pwd = "***".to_string();
        }
        Ok(serde_json::to_string_pretty(&conf)?)
    }

    /// Line diff of the censored JSON renderings, `-` for lines only in
    /// `self` and `+` for lines only in `other`.
    pub fn diff(&self, other: &Config) -> Result<String> {
        let own = self.to_json(true)?;
        let theirs = other.to_json(true)?;

        let mut out = Vec::new();
        for line in own.lines() {
            if !theirs.lines().any(|l| l == line) {
                out.push(format!("- {}", line));
            }
        }
        for line in theirs.lines() {
            if !own.lines().any(|l| l == line) {
                out.push(format!("+ {}", line));
            }
        }
        Ok(out.join("\n"))
    }

    pub fn read_from_json(path: &str) -> Result<Config> {
        let blob = std::fs::read(path)?;
        Ok(serde_json::from_slice(&blob)?)
    }

    pub fn write_to_json(&self, path: &str, censor_sensitive: bool) -> Result<()> {
        let data = self.to_json(censor_sensitive)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

pub fn validate_country_prefix(pfx: &str) -> Result<()> {
    if pfx.is_empty() {
        return Err(Error::Config("country prefix needs to be set".to_string()));
    }
    if pfx.len() != COUNTRY_PFX_DIGITS {
        return Err(Error::Config(format!(
            "country prefix must be {} digits but isn't: {}",
            COUNTRY_PFX_DIGITS, pfx
        )));
    }
    if !pfx.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "country prefix is not a number: {}",
            pfx
        )));
    }
    Ok(())
}

pub fn validate_sources(sources: &[String]) -> Result<()> {
    if sources.is_empty() {
        return Err(Error::Config(
            "at least one source needs to be set".to_string(),
        ));
    }
    for source in sources {
        if source.starts_with('/') {
            continue;
        }
        validate_url(source).map_err(|_| {
            Error::Config(format!(
                "source needs to be a URL (http://, https://) or a local file path (/ prefix): {:?}",
                source
            ))
        })?;
    }
    Ok(())
}

pub fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::Config(
            "URL is not a http:// or https:// URL".to_string(),
        ));
    }
    if reqwest::Url::parse(url).is_err() {
        return Err(Error::Config("invalid URL".to_string()));
    }
    Ok(())
}

/// Read-mostly configuration cell. Readers take a cheap `Arc` snapshot;
/// the single mutator (the config endpoint) replaces the value wholesale,
/// so a reader never observes a half-applied change.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        SharedConfig {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn load(&self) -> Arc<Config> {
        self.inner.read().unwrap().clone()
    }

    pub fn store(&self, config: Config) {
        *self.inner.write().unwrap() = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_config() -> Config {
        Config {
            sources: vec!["https://example.org/phonebook.csv".to_string()],
            country_prefix: "312".to_string(),
            server: true,
            reload_seconds: 3600,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_server_config() {
        assert!(server_config().validate().is_ok());

        let mut cfg = server_config();
        cfg.reload_seconds = 59;
        assert!(cfg.validate().is_err());

        let mut cfg = server_config();
        cfg.reload_seconds = MAX_RELOAD_SECONDS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = server_config();
        cfg.sources = vec![];
        assert!(cfg.validate().is_err());

        let mut cfg = server_config();
        cfg.sources = vec!["ftp://example.org/pb.csv".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = server_config();
        cfg.sources = vec!["/var/lib/phonebook.csv".to_string()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_adhoc_config() {
        let mut cfg = server_config();
        cfg.server = false;
        assert!(cfg.validate().is_err()); // path missing

        cfg.path = "/tmp/out".to_string();
        assert!(cfg.validate().is_err()); // formats missing

        cfg.formats = vec!["combined".to_string()];
        assert!(cfg.validate().is_err()); // targets missing

        cfg.targets = vec!["yealink".to_string()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_country_prefix() {
        assert!(validate_country_prefix("312").is_ok());
        assert!(validate_country_prefix("").is_err());
        assert!(validate_country_prefix("31").is_err());
        assert!(validate_country_prefix("3124").is_err());
        assert!(validate_country_prefix("a12").is_err());
    }

    #[test]
    fn test_number_helpers() {
        let cfg = server_config();
        assert!(!cfg.is_local_number("4100"));
        assert_eq!(cfg.global_number("4100"), "4100");
        assert!(cfg.is_local_number("31241001"));
        assert_eq!(cfg.global_number("31241001"), "31231241001");
        assert_eq!(cfg.local_number("3124100"), "4100");
    }

    #[test]
    fn test_censored_json() {
        let mut cfg = server_config();
        cfg.web_pwd = "secret".to_string();
        cfg.ldap_pwd = "secret".to_string();
        let json = cfg.to_json(true).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("***"));
    }

    #[test]
    fn test_diff() {
        let a = server_config();
        let mut b = server_config();
        assert_eq!(a.diff(&b).unwrap(), "");

        b.reload_seconds = 60;
        let diff = a.diff(&b).unwrap();
        assert!(diff.contains("- ") && diff.contains("reload_seconds"));
        assert!(diff.contains("+ "));
        // passwords never leak into a diff
        b.web_pwd = "secret".to_string();
        assert!(!a.diff(&b).unwrap().contains("secret"));
    }

    #[test]
    fn test_shared_config_swap() {
        let shared = SharedConfig::new(server_config());
        let before = shared.load();
        assert!(!before.debug);

        let mut next = (*before).clone();
        next.debug = true;
        shared.store(next);

        assert!(shared.load().debug);
        // the old snapshot is unaffected
        assert!(!before.debug);
    }
}
