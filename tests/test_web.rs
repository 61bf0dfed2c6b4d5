use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use meshbook::config::{Config, SharedConfig};
use meshbook::roster::refresh::Refresher;
use meshbook::roster::{shared_records, shared_runtime_info, shared_updates, Entry, OlsrRecord};
use meshbook::web::{self, AppState, AppStateInner};

fn entry(first: &str, last: &str, call: &str, phone: &str, active: bool) -> Entry {
    Entry {
        first_name: first.to_string(),
        last_name: last.to_string(),
        callsign: call.to_string(),
        phone_number: phone.to_string(),
        olsr: active.then(|| OlsrRecord {
            ip: "10.0.0.1".to_string(),
            hostname: phone.to_string(),
            comment: String::new(),
        }),
    }
}

fn base_config() -> Config {
    Config {
        sources: vec!["/nonexistent/phonebook.csv".to_string()],
        active_pfx: "*".to_string(),
        formats: vec!["combined".to_string()],
        ..Default::default()
    }
}

/// Starts the web front-end on a loopback listener and returns its base URL.
async fn start_web(config: Config, entries: Vec<Entry>) -> (String, SharedConfig, CancellationToken) {
    let shared_config = SharedConfig::new(config);
    let records = shared_records();
    records.try_write().unwrap().entries = entries;

    let refresher = Refresher {
        client: reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .expect("client"),
        config: shared_config.clone(),
        records: records.clone(),
        runtime_info: shared_runtime_info(),
        updates: shared_updates(),
    };
    let state = AppState {
        inner: Arc::new(AppStateInner {
            version: "test".to_string(),
            config: shared_config.clone(),
            config_path: None,
            records,
            runtime_info: refresher.runtime_info.clone(),
            updates: refresher.updates.clone(),
            refresher,
            sip: None,
        }),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let token = CancellationToken::new();
    let serve_token = token.clone();
    tokio::spawn(async move {
        web::serve_listener(state, listener, serve_token).await.ok();
    });

    (format!("http://{}", addr), shared_config, token)
}

#[tokio::test]
async fn test_index_and_info() {
    let (base, _, token) = start_web(
        base_config(),
        vec![entry("Ann", "Ng", "K1AA", "100", true)],
    )
    .await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/", base))
        .send()
        .await
        .expect("GET /")
        .text()
        .await
        .expect("body");
    let index: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(index["version"], "test");
    assert!(index["exporters"]
        .as_array()
        .expect("exporters")
        .iter()
        .any(|e| e == "yealink"));

    let body = client
        .get(format!("{}/info", base))
        .send()
        .await
        .expect("GET /info")
        .text()
        .await
        .expect("body");
    let info: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(info["records_stats"]["count"], 1);
    token.cancel();
}

#[tokio::test]
async fn test_phonebook_endpoint() {
    let (base, _, token) = start_web(
        base_config(),
        vec![
            entry("Ann", "Ng", "K1AA", "100", true),
            entry("Bob", "Oslo", "K2BB", "200", false),
        ],
    )
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "{}/phonebook?format=combined&target=generic&resolve=true&ia=true",
            base
        ))
        .send()
        .await
        .expect("GET /phonebook");
    assert!(resp.status().is_success());
    let body = resp.text().await.expect("body");
    assert!(body.contains("<IPPhoneDirectory>"));
    assert!(body.contains("<Name>*Ng, Ann (K1AA)</Name>"));
    assert!(body.contains("<Telephone>10.0.0.1</Telephone>"));

    // missing parameters are client errors
    let resp = client
        .get(format!("{}/phonebook?target=generic", base))
        .send()
        .await
        .expect("GET");
    assert_eq!(resp.status(), 400);
    let resp = client
        .get(format!("{}/phonebook?format=combined&target=doesnotexist", base))
        .send()
        .await
        .expect("GET");
    assert_eq!(resp.status(), 400);
    token.cancel();
}

#[tokio::test]
async fn test_showconfig_censors_passwords() {
    let mut config = base_config();
    config.web_pwd = "supersecret".to_string();
    config.web_user = "admin".to_string();
    let (base, _, token) = start_web(config, vec![]).await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/showconfig?type=runtime", base))
        .send()
        .await
        .expect("GET /showconfig")
        .text()
        .await
        .expect("body");
    assert!(!body.contains("supersecret"));
    assert!(body.contains("***"));
    token.cancel();
}

#[tokio::test]
async fn test_updateconfig_swaps_whole_config() {
    let mut config = base_config();
    config.allow_runtime_config_changes = true;
    let (base, shared_config, token) = start_web(config, vec![]).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!(
            "{}/updateconfig?reload=7200&routable=true&cpfx=312",
            base
        ))
        .send()
        .await
        .expect("POST /updateconfig")
        .text()
        .await
        .expect("body");
    let resp: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(resp["success"], true);

    let updated = shared_config.load();
    assert_eq!(updated.reload_seconds, 7200);
    assert!(updated.include_routable);
    assert_eq!(updated.country_prefix, "312");
    token.cancel();
}

#[tokio::test]
async fn test_updateconfig_rejects_invalid_values() {
    let mut config = base_config();
    config.allow_runtime_config_changes = true;
    let (base, shared_config, token) = start_web(config, vec![]).await;
    let client = reqwest::Client::new();

    for query in ["reload=10", "reload=abc", "cpfx=12", "debug=maybe"] {
        let body = client
            .post(format!("{}/updateconfig?{}", base, query))
            .send()
            .await
            .expect("POST /updateconfig")
            .text()
            .await
            .expect("body");
        let resp: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(resp["success"], false, "query {:?} must be rejected", query);
    }
    assert_eq!(shared_config.load().reload_seconds, 0);
    token.cancel();
}

#[tokio::test]
async fn test_updateconfig_disallowed_by_default() {
    let (base, _, token) = start_web(base_config(), vec![]).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("{}/updateconfig?reload=7200", base))
        .send()
        .await
        .expect("POST /updateconfig")
        .text()
        .await
        .expect("body");
    let resp: serde_json::Value = serde_json::from_str(&body).expect("json");
    assert_eq!(resp["success"], false);
    token.cancel();
}

#[tokio::test]
async fn test_basic_auth_guards_mutating_endpoints() {
    let mut config = base_config();
    config.allow_runtime_config_changes = true;
    config.web_user = "admin".to_string();
    config.web_pwd = "pass".to_string();
    let (base, _, token) = start_web(config, vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/updateconfig?reload=7200", base))
        .send()
        .await
        .expect("POST");
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/updateconfig?reload=7200", base))
        .basic_auth("admin", Some("wrong"))
        .send()
        .await
        .expect("POST");
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/updateconfig?reload=7200", base))
        .basic_auth("admin", Some("pass"))
        .send()
        .await
        .expect("POST");
    assert_eq!(resp.status(), 200);

    // read-only endpoints stay open
    let resp = client
        .get(format!("{}/info", base))
        .send()
        .await
        .expect("GET /info");
    assert_eq!(resp.status(), 200);
    token.cancel();
}
