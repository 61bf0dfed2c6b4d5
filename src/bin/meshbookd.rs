use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshbook::config::{Config, SharedConfig};
use meshbook::roster::refresh::Refresher;
use meshbook::roster::{shared_records, shared_runtime_info, shared_updates};
use meshbook::sip::server::local_identities;
use meshbook::sip::SipServer;
use meshbook::web::{self, AppState, AppStateInner};
use meshbook::{exporter, Error, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Phonebook and SIP redirect service for AREDN mesh networks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON config file instead of parsing flags
    #[arg(long)]
    conf: Option<String>,

    /// Comma separated paths or URLs to fetch the phonebook CSV from
    #[arg(long, default_value = "")]
    sources: String,

    /// Path to the OLSR hosts file
    #[arg(long, default_value = "/tmp/run/hosts_olsr")]
    olsr: String,

    /// URL of the sysinfo JSON API, usually
    /// http://localnode.local.mesh/cgi-bin/sysinfo.json?hosts=1
    #[arg(long, default_value = "")]
    sysinfo: String,

    /// Run as a server
    #[arg(long)]
    server: bool,

    /// Also run a SIP server when in server mode
    #[arg(long)]
    sip_server: bool,

    /// Also serve the roster over LDAP when in server mode
    #[arg(long)]
    ldap_server: bool,

    /// Run a webserver when in server mode (pass false to disable)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    web_server: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Allow runtime config changes via the web server
    #[arg(long)]
    allow_runtime_config_changes: bool,

    /// Allow permanent config changes via the web server
    #[arg(long)]
    allow_permanent_config_changes: bool,

    /// Also include routable phone numbers not in the phonebook
    #[arg(long)]
    include_routable: bool,

    /// Three digit country prefix for phone numbers
    #[arg(long, default_value = "")]
    country_prefix: String,

    /// Folder to write the phonebooks to locally (ad-hoc mode)
    #[arg(long, default_value = "")]
    path: String,

    /// Comma separated list of formats to export: pbx,direct,combined
    #[arg(long, default_value = "combined")]
    formats: String,

    /// Comma separated list of targets to export:
    /// generic,yealink,cisco,snom,grandstream,vcard
    #[arg(long, default_value = "")]
    targets: String,

    /// Resolve hostnames to IPs using routing data
    #[arg(long)]
    resolve: bool,

    /// Prefix active participants in the phonebook with the active prefix
    #[arg(long)]
    indicate_active: bool,

    /// Hide inactive participants from the phonebook
    #[arg(long)]
    filter_inactive: bool,

    /// Prefix to add when --indicate-active is set
    #[arg(long, default_value = "*")]
    active_pfx: String,

    /// Port the web server listens on
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Path to locally cache the downloaded CSV in
    #[arg(long, default_value = "/www/phonebook.csv")]
    cache: String,

    /// Seconds after which to try to reload the phonebook source
    #[arg(long, default_value = "3600")]
    reload: u64,

    /// Username protecting the mutating web endpoints (BasicAuth)
    #[arg(long, default_value = "")]
    web_user: String,

    /// Password protecting the mutating web endpoints (BasicAuth)
    #[arg(long, default_value = "")]
    web_pwd: String,

    /// LDAP bind username
    #[arg(long, default_value = "aredn")]
    ldap_user: String,

    /// LDAP bind password
    #[arg(long, default_value = "aredn")]
    ldap_pwd: String,

    /// LDAP port
    #[arg(long, default_value = "3890")]
    ldap_port: u16,

    /// Port to listen on for SIP traffic
    #[arg(long, default_value = "5060")]
    sip_port: u16,

    /// Comma separated list of URLs to pull update notifications from
    #[arg(long, default_value = "")]
    update_urls: String,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl Args {
    fn into_config(self) -> Result<(Config, Option<String>)> {
        if let Some(path) = self.conf {
            let mut config = Config::read_from_json(&path)
                .map_err(|e| Error::Config(format!("unable to read config: {}", e)))?;
            // the server flag wins even when reading a config file
            if self.server {
                config.server = true;
            }
            return Ok((config, Some(path)));
        }

        let config = Config {
            sources: split_list(&self.sources),
            olsr_file: self.olsr,
            sysinfo_url: self.sysinfo,
            server: self.server,
            ldap_server: self.ldap_server,
            sip_server: self.sip_server,
            web_server: self.web_server,
            debug: self.debug,
            allow_runtime_config_changes: self.allow_runtime_config_changes,
            allow_permanent_config_changes: self.allow_permanent_config_changes,
            include_routable: self.include_routable,
            country_prefix: self.country_prefix,
            path: self.path,
            formats: split_list(&self.formats),
            targets: split_list(&self.targets),
            resolve: self.resolve,
            indicate_active: self.indicate_active,
            filter_inactive: self.filter_inactive,
            active_pfx: self.active_pfx,
            port: self.port,
            cache: self.cache,
            reload_seconds: self.reload,
            web_user: self.web_user,
            web_pwd: self.web_pwd,
            update_urls: split_list(&self.update_urls),
            ldap_port: self.ldap_port,
            ldap_user: self.ldap_user,
            ldap_pwd: self.ldap_pwd,
            sip_port: self.sip_port,
        };
        Ok((config, None))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .ok();
    info!("meshbook starting {:?}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        eprintln!("unable to run: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let (config, config_path) = args.into_config()?;
    config.validate()?;

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(Error::Http)?;

    let shared_config = SharedConfig::new(config.clone());
    let refresher = Refresher {
        client,
        config: shared_config.clone(),
        records: shared_records(),
        runtime_info: shared_runtime_info(),
        updates: shared_updates(),
    };

    if config.server {
        debug!("running in server mode");
        run_server(config, config_path, shared_config, refresher).await
    } else {
        debug!("running as a one-time export");
        run_local(refresher).await
    }
}

/// Ad-hoc mode: one refresh pass, write the phonebook files, exit.
async fn run_local(refresher: Refresher) -> Result<()> {
    let config = refresher.config.load();
    if !config.sysinfo_url.is_empty() {
        refresher.refresh_sysinfo().await?;
    }
    let updated_from = refresher.refresh_records().await?;
    info!("updated phonebook records from {:?}", updated_from);

    let records = refresher.records.read().await;
    exporter::write_files(&records.entries, &config)?;
    Ok(())
}

async fn run_server(
    config: Config,
    config_path: Option<String>,
    shared_config: SharedConfig,
    refresher: Refresher,
) -> Result<()> {
    let token = CancellationToken::new();

    let sip = if config.sip_server {
        let identities = match local_identities() {
            Ok(identities) => {
                debug!("using local SIP identities: {:?}", identities);
                identities
            }
            Err(e) => {
                debug!("unable to look up local identities, using empty set: {}", e);
                HashSet::new()
            }
        };
        let server = SipServer::new(
            shared_config.clone(),
            refresher.records.clone(),
            identities,
        );
        let serve = server.clone();
        let sip_token = token.clone();
        let addr: SocketAddr = ([0, 0, 0, 0], config.sip_port).into();
        tokio::spawn(async move {
            info!("starting SIP listener");
            if let Err(e) = serve.serve(addr, sip_token).await {
                warn!("SIP server failed: {}", e);
            }
        });
        Some(server)
    } else {
        None
    };

    if config.ldap_server {
        // The roster is reachable over LDAP through ldap::LdapDirectory;
        // this build ships no BER listener to put in front of it.
        warn!("ldap_server is set but this build has no LDAP wire front-end");
    }

    refresher.spawn_loops(token.clone());

    let web_state = config.web_server.then(|| AppState {
        inner: Arc::new(AppStateInner {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: shared_config,
            config_path,
            records: refresher.records.clone(),
            runtime_info: refresher.runtime_info.clone(),
            updates: refresher.updates.clone(),
            refresher: refresher.clone(),
            sip,
        }),
    });

    let web_token = token.clone();
    let web = async {
        match web_state {
            Some(state) => {
                let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
                web::serve(state, addr, web_token).await
            }
            None => std::future::pending().await,
        }
    };

    select! {
        r = web => {
            info!("web server finished: {:?}", r);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            token.cancel();
        }
    }
    Ok(())
}
