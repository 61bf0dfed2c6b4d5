use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SharedConfig;
use crate::exporter;
use crate::roster::{
    import, reconcile, routing, OlsrRecord, SharedRecords, SharedRuntimeInfo, SharedUpdates,
};
use crate::{Error, Result};

pub const SYSINFO_RELOAD: Duration = Duration::from_secs(5 * 60);
pub const UPDATE_INFO_RELOAD: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything the refresh loops need: the HTTP client, the config snapshot
/// cell and the three snapshot stores they feed.
#[derive(Clone)]
pub struct Refresher {
    pub client: reqwest::Client,
    pub config: SharedConfig,
    pub records: SharedRecords,
    pub runtime_info: SharedRuntimeInfo,
    pub updates: SharedUpdates,
}

impl Refresher {
    /// One roster pass: fetch from the first source that works (falling back
    /// to the cache file), merge with routing data and swap the new snapshot
    /// in. Returns where the roster was loaded from.
    pub async fn refresh_records(&self) -> Result<String> {
        let config = self.config.load();

        let mut entries = None;
        let mut updated_from = String::new();
        let mut last_err = Error::Import("no sources configured".to_string());
        for source in &config.sources {
            debug!("reading phonebook from {:?}", source);
            let cache = (!config.cache.is_empty()).then_some(config.cache.as_str());
            match import::read_phonebook(&self.client, source, cache).await {
                Ok(parsed) => {
                    updated_from = source.clone();
                    entries = Some(parsed);
                    break;
                }
                Err(e) => last_err = e,
            }
        }
        // Sources are unreachable, try the locally cached copy.
        if entries.is_none() && !config.cache.is_empty() {
            match import::read_phonebook(&self.client, &config.cache, None).await {
                Ok(parsed) => {
                    debug!("read phonebook from cache {:?}", config.cache);
                    updated_from = config.cache.clone();
                    entries = Some(parsed);
                }
                Err(e) => last_err = e,
            }
        }
        // Not even cached yet, keep the previous snapshot and try later.
        let entries = match entries {
            Some(entries) => entries,
            None => {
                return Err(Error::Import(format!(
                    "error reading phonebook: {}",
                    last_err
                )))
            }
        };

        let routing_map = self.read_routing(&config.olsr_file).await;
        let entries = reconcile::merge(entries, &routing_map, config.include_routable);

        let mut records = self.records.write().await;
        records.entries = entries;
        records.updated = Some(Utc::now());
        Ok(updated_from)
    }

    /// The routing map comes from the last sysinfo snapshot when there is
    /// one, otherwise from the OLSR hosts file.
    async fn read_routing(&self, olsr_file: &str) -> HashMap<String, OlsrRecord> {
        {
            let runtime_info = self.runtime_info.read().await;
            if let Some(sysinfo) = &runtime_info.sysinfo {
                return routing::from_sysinfo(sysinfo);
            }
        }
        if olsr_file.is_empty() {
            warn!("not reading network information: neither OLSR file nor sysinfo available");
            return HashMap::new();
        }
        match routing::from_file(olsr_file).await {
            Ok(map) => map,
            Err(e) => {
                warn!("error reading OLSR data from file {:?}: {}", olsr_file, e);
                HashMap::new()
            }
        }
    }

    /// Roster refresh plus the phonebook file export when an output path is
    /// configured.
    pub async fn refresh_records_and_export(&self) -> Result<String> {
        let updated_from = self.refresh_records().await?;
        let config = self.config.load();
        if config.path.is_empty() {
            debug!("not exporting phonebook because path is not set");
            return Ok(updated_from);
        }
        let records = self.records.read().await;
        exporter::write_files(&records.entries, &config)?;
        Ok(updated_from)
    }

    pub async fn refresh_sysinfo(&self) -> Result<()> {
        let config = self.config.load();
        let sysinfo = import::read_sysinfo(&self.client, &config.sysinfo_url)
            .await
            .map_err(|e| {
                Error::Import(format!(
                    "error reading sysinfo from {:?}: {}",
                    config.sysinfo_url, e
                ))
            })?;
        let mut runtime_info = self.runtime_info.write().await;
        runtime_info.sysinfo = Some(sysinfo);
        runtime_info.updated = Some(Utc::now());
        Ok(())
    }

    pub async fn refresh_updates(&self) -> Result<()> {
        let config = self.config.load();
        let updates = match import::read_updates(&self.client, &config.update_urls).await {
            Ok(updates) => updates,
            // no update available
            Err(_) => return Ok(()),
        };
        let mut shared = self.updates.write().await;
        shared.updates = updates;
        shared.updated = Some(Utc::now());
        Ok(())
    }

    /// Launches the three periodic tasks. Each loop owns its timer and runs
    /// until the token is cancelled; a failed tick leaves the previous
    /// snapshot intact.
    pub fn spawn_loops(&self, token: CancellationToken) {
        let refresher = self.clone();
        let roster_token = token.clone();
        tokio::spawn(async move {
            loop {
                match refresher.refresh_records_and_export().await {
                    Ok(updated_from) => {
                        info!("updated phonebook records from {:?}", updated_from)
                    }
                    Err(e) => warn!("error refreshing phone records: {}", e),
                }
                let reload = refresher.config.load().reload();
                select! {
                    _ = roster_token.cancelled() => break,
                    _ = tokio::time::sleep(reload) => {}
                }
            }
        });

        if !self.config.load().sysinfo_url.is_empty() {
            let refresher = self.clone();
            let sysinfo_token = token.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) = refresher.refresh_sysinfo().await {
                        warn!("error refreshing sysinfo: {}", e);
                    }
                    select! {
                        _ = sysinfo_token.cancelled() => break,
                        _ = tokio::time::sleep(SYSINFO_RELOAD) => {}
                    }
                }
            });
        }

        if !self.config.load().update_urls.is_empty() {
            let refresher = self.clone();
            let updates_token = token;
            tokio::spawn(async move {
                loop {
                    refresher.refresh_updates().await.ok();
                    select! {
                        _ = updates_token.cancelled() => break,
                        _ = tokio::time::sleep(UPDATE_INFO_RELOAD) => {}
                    }
                }
            });
        }
    }
}
