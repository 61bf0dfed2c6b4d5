use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{
    self, SharedConfig, MAX_RELOAD_SECONDS, MINIMAL_RELOAD_SECONDS,
};
use crate::exporter::{self, ExportOptions, Format};
use crate::roster::refresh::Refresher;
use crate::roster::{
    sorted_by_name, NodeDetails, SharedRecords, SharedRuntimeInfo, SharedUpdates, Update,
};
use crate::sip::message::{Header, Method, Request as SipRequest};
use crate::sip::{Address, SipServer, Uri};
use crate::Result;

pub struct AppStateInner {
    pub version: String,
    pub config: SharedConfig,
    pub config_path: Option<String>,
    pub records: SharedRecords,
    pub runtime_info: SharedRuntimeInfo,
    pub updates: SharedUpdates,
    pub refresher: Refresher,
    /// Present when the SIP server is enabled; /message needs it.
    pub sip: Option<SipServer>,
}

/// Shared state of the HTTP front-end, one task per connection.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/message", get(send_message).post(send_message))
        .route("/updateconfig", get(update_config).post(update_config))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/info", get(serve_info))
        .route("/phonebook", get(serve_phonebook))
        .route("/reload", get(reload_phonebook))
        .route("/showconfig", get(show_config))
        .merge(protected)
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr, token: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(state, listener, token).await
}

/// Serves the router on an already bound listener until the token is
/// cancelled.
pub async fn serve_listener(
    state: AppState,
    listener: tokio::net::TcpListener,
    token: CancellationToken,
) -> Result<()> {
    let app = router(state);
    info!("web server listening on {}", listener.local_addr()?);
    select! {
        r = axum::serve(listener, app) => r.map_err(crate::Error::Io),
        _ = token.cancelled() => Ok(()),
    }
}

/// HTTP basic auth in front of the mutating endpoints. Only active when both
/// user and password are configured; compares SHA-256 digests so the
/// comparison does not leak lengths.
async fn basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let config = state.inner.config.load();
    if config.web_user.is_empty() || config.web_pwd.is_empty() {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| check_credentials(v, &config.web_user, &config.web_pwd))
        .unwrap_or(false);
    if authorized {
        return next.run(req).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            "Basic realm=\"restricted\", charset=\"UTF-8\"",
        )],
        "Unauthorized",
    )
        .into_response()
}

fn check_credentials(authorization: &str, user: &str, password: &str) -> bool {
    let encoded = match authorization.strip_prefix("Basic ") {
        Some(encoded) => encoded,
        None => return false,
    };
    let decoded = match BASE64.decode(encoded) {
        Ok(decoded) => decoded,
        Err(_) => return false,
    };
    let decoded = String::from_utf8_lossy(&decoded);
    let (got_user, got_password) = match decoded.split_once(':') {
        Some(parts) => parts,
        None => return false,
    };
    digest_eq(got_user, user) && digest_eq(got_password, password)
}

fn digest_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}

#[derive(Serialize)]
struct IndexResponse {
    version: String,
    updated: Option<DateTime<Utc>>,
    updates: Vec<Update>,
    sources: Vec<String>,
    update_urls: Vec<String>,
    exporters: Vec<String>,
}

async fn index(State(state): State<AppState>) -> Response {
    let config = state.inner.config.load();
    let updated = state.inner.records.read().await.updated;
    let updates = state.inner.updates.read().await.updates.clone();
    axum::Json(IndexResponse {
        version: state.inner.version.clone(),
        updated,
        updates,
        sources: config.sources.clone(),
        update_urls: config.update_urls.clone(),
        exporters: exporter::exporters().keys().map(|k| k.to_string()).collect(),
    })
    .into_response()
}

#[derive(Serialize)]
struct RecordStats {
    count: usize,
    updated: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct RuntimeStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    uptime: String,
    details: NodeDetails,
    updated: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct InfoResponse {
    version: String,
    records_stats: RecordStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    registered_phones: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime: Option<RuntimeStatus>,
}

async fn serve_info(State(state): State<AppState>) -> Response {
    let records = state.inner.records.read().await;
    let mut info = InfoResponse {
        version: state.inner.version.clone(),
        records_stats: RecordStats {
            count: records.entries.len(),
            updated: records.updated,
        },
        registered_phones: None,
        runtime: None,
    };
    drop(records);

    if let Some(sip) = &state.inner.sip {
        let mut registered = BTreeMap::new();
        for key in sip.register_cache().keys() {
            if let Some(client) = sip.register_cache().get(&key) {
                registered.insert(key, format!("{} ({})", client.address, client.user_agent));
            }
        }
        info.registered_phones = Some(registered);
    }

    let runtime_info = state.inner.runtime_info.read().await;
    if let Some(sysinfo) = &runtime_info.sysinfo {
        info.runtime = Some(RuntimeStatus {
            node: sysinfo.node.clone(),
            uptime: sysinfo
                .system
                .as_ref()
                .map(|s| s.uptime.clone())
                .unwrap_or_default(),
            details: sysinfo.node_details.clone().unwrap_or_default(),
            updated: runtime_info.updated,
        });
    }
    axum::Json(info).into_response()
}

fn form_value(params: &HashMap<String, String>, key: &str) -> String {
    params
        .get(key)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn form_flag(params: &HashMap<String, String>, key: &str) -> bool {
    form_value(params, key).eq_ignore_ascii_case("true")
}

async fn serve_phonebook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let format = form_value(&params, "format");
    let format = match Format::parse(&format) {
        Some(format) => format,
        None => {
            debug!("/phonebook: bad 'format': {:?}", format);
            return (
                StatusCode::BAD_REQUEST,
                "'format' must be specified: [direct,pbx,combined]",
            )
                .into_response();
        }
    };

    let target = form_value(&params, "target").to_lowercase();
    if target.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "'target' must be specified: [generic,cisco,snom,yealink,grandstream,vcard]",
        )
            .into_response();
    }
    let exporters = exporter::exporters();
    let exp = match exporters.get(target.as_str()) {
        Some(exp) => exp,
        None => {
            debug!("/phonebook: unknown 'target': {:?}", target);
            return (StatusCode::BAD_REQUEST, "Unknown target.").into_response();
        }
    };

    let config = state.inner.config.load();
    let options = ExportOptions {
        format,
        active_pfx: config.active_pfx.clone(),
        resolve: form_flag(&params, "resolve"),
        indicate_active: form_flag(&params, "ia"),
        filter_inactive: form_flag(&params, "fi"),
    };

    let entries = {
        let records = state.inner.records.read().await;
        sorted_by_name(&records.entries)
    };
    match exp.export(&entries, &options) {
        Ok(body) => {
            let content_type = if target == "vcard" {
                "text/vcard"
            } else {
                "text/xml"
            };
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            debug!("/phonebook: export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "export failed").into_response()
        }
    }
}

#[derive(Serialize)]
struct ReloadResponse {
    success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    source: String,
    updated: Option<DateTime<Utc>>,
}

async fn reload_phonebook(State(state): State<AppState>) -> Response {
    let mut resp = ReloadResponse {
        success: true,
        source: String::new(),
        updated: None,
    };
    match state.inner.refresher.refresh_records_and_export().await {
        Ok(source) => {
            debug!("/reload: phonebook reloaded from {:?}", source);
            resp.source = source;
        }
        Err(e) => {
            debug!("/reload: unable to reload phonebook: {}", e);
            resp.success = false;
        }
    }
    resp.updated = state.inner.records.read().await.updated;
    axum::Json(resp).into_response()
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    from: String,
    to: String,
    message: String,
}

impl MessageResponse {
    fn failure(message: &str) -> Response {
        axum::Json(MessageResponse {
            success: false,
            from: String::new(),
            to: String::new(),
            message: message.to_string(),
        })
        .into_response()
    }
}

/// Sends a short text message on behalf of a locally registered phone.
async fn send_message(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let sip = match &state.inner.sip {
        Some(sip) => sip,
        None => return MessageResponse::failure("SIP server is not enabled"),
    };

    let from = form_value(&params, "from").to_lowercase();
    if from.is_empty() {
        return MessageResponse::failure("'from' not specified");
    }
    if sip.register_cache().get(&from).is_none() {
        debug!("/message: 'from' not in locally registered phones: {}", from);
        return MessageResponse::failure("'from' phone number is not locally registered");
    }

    let to = form_value(&params, "to").to_lowercase();
    if to.is_empty() {
        return MessageResponse::failure("'to' not specified");
    }

    let msg = form_value(&params, "msg");
    if msg.is_empty() {
        return MessageResponse::failure("'msg' not specified");
    }

    let records = state.inner.records.read().await;
    let to_entry = match records.entries.iter().find(|e| e.phone_number == to) {
        Some(entry) => entry.clone(),
        None => {
            debug!("/message: destination not found in phonebook: {}", to);
            return MessageResponse::failure("destination specified not found in phonebook");
        }
    };
    let from_entry = records
        .entries
        .iter()
        .find(|e| e.phone_number == from)
        .cloned()
        .unwrap_or_else(|| crate::roster::Entry {
            phone_number: from.clone(),
            ..Default::default()
        });
    drop(records);

    let to_addr = Address::new(
        &to_entry.display_name("").unwrap_or_default(),
        Uri::new(&to, &to_entry.phone_fqdn()),
    );
    let from_addr = Address::new(
        &from_entry.display_name("").unwrap_or_default(),
        Uri::new(&from, &from_entry.phone_fqdn()),
    );
    let headers = vec![Header::new("Content-Type", "text/plain")];
    let req = SipRequest::new(
        Method::Message,
        &from_addr,
        &to_addr,
        1,
        headers,
        msg.clone().into_bytes(),
    );

    let mut resp = MessageResponse {
        success: true,
        from: format!("{}, {}", from_addr.display_name, from),
        to: format!("{}, {}", to_addr.display_name, to),
        message: msg,
    };
    match sip.send_message(&req).await {
        Err(e) => {
            debug!("/message: message could not be sent: {}", e);
            resp.success = false;
            resp.message = "message could not be sent".to_string();
        }
        Ok(sip_resp) if sip_resp.status_code != 200 => {
            debug!(
                "/message: message response not successful ({})",
                sip_resp.status_code
            );
            resp.success = false;
            resp.message = format!(
                "message sent but response not ok ({})",
                sip_resp.status_code
            );
        }
        Ok(_) => {}
    }
    axum::Json(resp).into_response()
}

#[derive(Serialize, Default)]
struct ShowConfigResponse {
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    content: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    diff: bool,
}

impl ShowConfigResponse {
    fn failure(message: &str) -> Response {
        axum::Json(ShowConfigResponse {
            success: false,
            messages: vec![message.to_string()],
            ..Default::default()
        })
        .into_response()
    }
}

async fn show_config(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let kind = form_value(&params, "type").to_lowercase();
    let config = match kind.as_str() {
        "r" | "runtime" => (*state.inner.config.load()).clone(),
        "d" | "disk" | "diff" => {
            let path = match &state.inner.config_path {
                Some(path) => path.clone(),
                None => {
                    return ShowConfigResponse::failure(
                        "service was not started with a config path so the config file can't be loaded",
                    );
                }
            };
            match config::Config::read_from_json(&path) {
                Ok(config) => config,
                Err(e) => {
                    debug!("/showconfig: unable to read config: {}", e);
                    return ShowConfigResponse::failure("unable to read config");
                }
            }
        }
        _ => {
            return ShowConfigResponse::failure("'type' must be specified: [disk,runtime,diff]");
        }
    };

    // runtime vs disk comparison instead of a plain dump
    if kind == "diff" {
        return match state.inner.config.load().diff(&config) {
            Ok(content) => axum::Json(ShowConfigResponse {
                success: true,
                content,
                diff: true,
                ..Default::default()
            })
            .into_response(),
            Err(e) => {
                debug!("/showconfig: unable to diff configs: {}", e);
                ShowConfigResponse::failure("unable to diff config")
            }
        };
    }

    match config.to_json(true) {
        Ok(content) => axum::Json(ShowConfigResponse {
            success: true,
            content,
            ..Default::default()
        })
        .into_response(),
        Err(e) => {
            debug!("/showconfig: unable to convert config: {}", e);
            ShowConfigResponse::failure("unable to convert config")
        }
    }
}

#[derive(Serialize)]
struct UpdateConfigResponse {
    success: bool,
    messages: Vec<String>,
}

impl UpdateConfigResponse {
    fn failure(message: &str) -> Response {
        axum::Json(UpdateConfigResponse {
            success: false,
            messages: vec![message.to_string()],
        })
        .into_response()
    }
}

/// Applies validated pointwise config changes and swaps the whole config in
/// one step; optionally persists them to the config file.
async fn update_config(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let current = state.inner.config.load();
    if !current.allow_runtime_config_changes {
        debug!("/updateconfig: updating config is not allowed by config");
        return UpdateConfigResponse::failure(
            "updating config is not allowed by config flag (allow_runtime_config_changes)",
        );
    }

    let permanent = form_flag(&params, "perm");
    if permanent && !current.allow_permanent_config_changes {
        debug!("/updateconfig: updating config on disk is not allowed by config");
        return UpdateConfigResponse::failure(
            "updating config on disk is not allowed by config flag (allow_permanent_config_changes)",
        );
    }

    let mut messages = Vec::new();
    let persist_path = match (&state.inner.config_path, permanent) {
        (None, _) => {
            messages
                .push("service was not started with a config path so the config file won't be updated".to_string());
            None
        }
        (Some(_), false) => {
            messages.push("config changes are not going to be written to disk".to_string());
            None
        }
        (Some(path), true) => Some(path.clone()),
    };

    // Validate everything first so a bad field changes nothing.
    let mut update_urls = Vec::new();
    for url in form_value(&params, "updates")
        .lines()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        if config::validate_url(url).is_err() {
            debug!("/updateconfig: invalid update URL: {:?}", url);
            return UpdateConfigResponse::failure("specified update URL is not valid");
        }
        update_urls.push(url.to_string());
    }

    let mut sources = Vec::new();
    for source in form_value(&params, "sources")
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sources.push(source.to_string());
    }
    if !sources.is_empty() && config::validate_sources(&sources).is_err() {
        debug!("/updateconfig: invalid sources: {:?}", sources);
        return UpdateConfigResponse::failure(
            "specified sources cannot all be read, make sure they exist and are either a valid, absolute file path or an http/https URL",
        );
    }

    let reload_raw = form_value(&params, "reload");
    let mut reload_seconds = None;
    if !reload_raw.is_empty() {
        match reload_raw.parse::<u64>() {
            Ok(seconds)
                if (MINIMAL_RELOAD_SECONDS..=MAX_RELOAD_SECONDS).contains(&seconds) =>
            {
                reload_seconds = Some(seconds)
            }
            Ok(_) => {
                return UpdateConfigResponse::failure(&format!(
                    "reload value too high or low (<{} or >{})",
                    MINIMAL_RELOAD_SECONDS, MAX_RELOAD_SECONDS
                ));
            }
            Err(_) => return UpdateConfigResponse::failure("invalid reload value"),
        }
    }

    let active_pfx = form_value(&params, "apfx").to_lowercase();
    if active_pfx.chars().count() > 1 {
        return UpdateConfigResponse::failure(
            "invalid active prefix value (can only be one character)",
        );
    }

    let country_prefix = form_value(&params, "cpfx").to_lowercase();
    if !country_prefix.is_empty() && config::validate_country_prefix(&country_prefix).is_err() {
        return UpdateConfigResponse::failure("invalid country prefix value");
    }

    let debug_raw = form_value(&params, "debug").to_lowercase();
    if !debug_raw.is_empty() && debug_raw != "true" && debug_raw != "false" {
        return UpdateConfigResponse::failure("invalid debug value");
    }

    let routable_raw = form_value(&params, "routable").to_lowercase();
    if !routable_raw.is_empty() && routable_raw != "true" && routable_raw != "false" {
        return UpdateConfigResponse::failure("invalid routable value");
    }

    let web_user = form_value(&params, "webuser");
    let web_pwd = form_value(&params, "webpwd");

    // Apply to a copy and swap it in whole.
    let mut changed = false;
    let mut next = (*current).clone();
    if !sources.is_empty() {
        changed = true;
        messages.push(format!("- sources now set to {:?}", sources));
        next.sources = sources;
    }
    if !update_urls.is_empty() {
        changed = true;
        messages.push(format!("- update URLs now set to {:?}", update_urls));
        next.update_urls = update_urls;
    }
    if let Some(seconds) = reload_seconds {
        changed = true;
        messages.push(format!("- reload duration now set to {} seconds", seconds));
        next.reload_seconds = seconds;
    }
    if !active_pfx.is_empty() {
        changed = true;
        messages.push(format!("- active prefix set to {:?}", active_pfx));
        next.active_pfx = active_pfx;
    }
    if !country_prefix.is_empty() {
        changed = true;
        messages.push(format!("- country prefix set to {:?}", country_prefix));
        next.country_prefix = country_prefix;
    }
    if !debug_raw.is_empty() {
        changed = true;
        messages.push(format!("- debug now set to {}", debug_raw == "true"));
        next.debug = debug_raw == "true";
    }
    if !routable_raw.is_empty() {
        changed = true;
        messages.push(format!(
            "- include_routable now set to {}",
            routable_raw == "true"
        ));
        next.include_routable = routable_raw == "true";
    }
    if !web_user.is_empty() {
        changed = true;
        messages.push(format!("- web_user now set to {:?}", web_user));
        next.web_user = web_user;
    }
    if !web_pwd.is_empty() {
        changed = true;
        messages.push("- web_pwd now set".to_string());
        next.web_pwd = web_pwd;
    }

    if !changed {
        messages.push("no changes were made".to_string());
        return axum::Json(UpdateConfigResponse {
            success: true,
            messages,
        })
        .into_response();
    }

    if let Some(path) = persist_path {
        if let Err(e) = next.write_to_json(&path, false) {
            debug!("/updateconfig: unable to write config: {}", e);
            return UpdateConfigResponse::failure("unable to write config");
        }
        messages.push(format!("config updated in {:?}", path));
    } else {
        messages.push("only runtime (!) config updated".to_string());
    }
    state.inner.config.store(next);

    axum::Json(UpdateConfigResponse {
        success: true,
        messages,
    })
    .into_response()
}
