use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SharedConfig};
use crate::roster::{shared_records, Entry, OlsrRecord, SharedRecords};
use crate::sip::message::{HeadersExt, Response};
use crate::sip::server::SipServer;

fn test_records(entries: Vec<Entry>) -> SharedRecords {
    let records = shared_records();
    records.try_write().unwrap().entries = entries;
    records
}

fn roster_entry(phone: &str, callsign: &str, active: bool) -> Entry {
    Entry {
        first_name: "Ann".to_string(),
        last_name: "Ng".to_string(),
        callsign: callsign.to_string(),
        phone_number: phone.to_string(),
        olsr: active.then(|| OlsrRecord {
            ip: "10.11.12.13".to_string(),
            hostname: phone.to_string(),
            comment: String::new(),
        }),
    }
}

/// Starts a server on a loopback socket and returns its address plus a
/// client socket to talk to it with.
async fn start_server(
    server: &SipServer,
    token: &CancellationToken,
) -> (SocketAddr, UdpSocket) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
    let addr = socket.local_addr().expect("local addr");
    let serve = server.clone();
    let serve_token = token.clone();
    tokio::spawn(async move {
        serve.serve_socket(socket, serve_token).await.ok();
    });

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
    client.connect(addr).await.expect("connect");
    (addr, client)
}

async fn roundtrip(client: &UdpSocket, request: &str) -> Response {
    client.send(request.as_bytes()).await.expect("send");
    let mut buf = vec![0u8; 2048];
    let n = timeout(Duration::from_secs(1), client.recv(&mut buf))
        .await
        .expect("timed out waiting for response")
        .expect("recv");
    Response::parse(&buf[..n]).expect("parse response")
}

fn register_for(user: &str, contact_host: &str) -> String {
    format!(
        "REGISTER sip:localnode.local.mesh SIP/2.0\r\n\
         Via: SIP/2.0/UDP {host}:5060\r\n\
         To: <sip:{user}@localnode.local.mesh>\r\n\
         From: <sip:{user}@localnode.local.mesh>;tag=a1\r\n\
         Call-ID: 1@{host}\r\n\
         CSeq: 1 REGISTER\r\n\
         Contact: <sip:{user}@{host}>\r\n\
         User-Agent: TestPhone/1.0\r\n\
         \r\n",
        user = user,
        host = contact_host
    )
}

fn invite_for(user: &str, target_host: &str) -> String {
    format!(
        "INVITE sip:{user}@{target} SIP/2.0\r\n\
         Via: SIP/2.0/UDP 127.0.0.1:5060\r\n\
         To: <sip:{user}@{target}>\r\n\
         From: <sip:900@127.0.0.1>;tag=b2\r\n\
         Call-ID: 2@127.0.0.1\r\n\
         CSeq: 1 INVITE\r\n\
         \r\n",
        user = user,
        target = target_host
    )
}

fn test_server(entries: Vec<Entry>, resolve: bool, identities: HashSet<String>) -> SipServer {
    let config = Config {
        resolve,
        ..Default::default()
    };
    SipServer::new(SharedConfig::new(config), test_records(entries), identities)
}

#[tokio::test]
async fn test_register_gets_ok_with_allow() {
    let token = CancellationToken::new();
    let server = test_server(vec![], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(&client, &register_for("500", "10.0.0.7")).await;
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.status_message, "OK");
    assert_eq!(resp.header_value("Allow"), Some("INVITE, ACK, MESSAGE"));
    assert_eq!(resp.header_value("Expires"), Some("600"));
    // dialog headers copied from the request
    assert_eq!(resp.header_value("CSeq"), Some("1 REGISTER"));

    let cached = server.register_cache().get(&"500".to_string()).expect("cached client");
    assert_eq!(cached.user_agent, "TestPhone/1.0");
    assert_eq!(cached.address.uri.host, "10.0.0.7");
    token.cancel();
}

#[tokio::test]
async fn test_invite_redirects_to_roster_entry() {
    let token = CancellationToken::new();
    let server = test_server(vec![roster_entry("100", "K1AA", true)], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(&client, &invite_for("100", "localnode.local.mesh")).await;
    assert_eq!(resp.status_code, 302);
    assert_eq!(resp.status_message, "Moved Temporarily");
    assert_eq!(
        resp.header_value("Contact"),
        Some("\"K1AA\" <sip:100@100.local.mesh>")
    );
    assert_eq!(
        resp.header_value("Diversion"),
        Some("\"K1AA\" <sip:100@100.local.mesh>;reason=unconditional")
    );
    token.cancel();
}

#[tokio::test]
async fn test_invite_resolves_to_ip() {
    let token = CancellationToken::new();
    let server = test_server(vec![roster_entry("100", "K1AA", true)], true, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(&client, &invite_for("100", "localnode.local.mesh")).await;
    assert_eq!(resp.status_code, 302);
    assert_eq!(
        resp.header_value("Contact"),
        Some("\"K1AA\" <sip:100@10.11.12.13>")
    );
    token.cancel();
}

#[tokio::test]
async fn test_register_then_invite_redirects_to_contact() {
    let token = CancellationToken::new();
    // the roster does not know 500, only the REGISTER cache does
    let server = test_server(vec![roster_entry("400", "K4DD", false)], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(&client, &register_for("500", "host.local.mesh")).await;
    assert_eq!(resp.status_code, 200);

    let resp = roundtrip(&client, &invite_for("500", "localnode.local.mesh")).await;
    assert_eq!(resp.status_code, 302);
    assert_eq!(
        resp.header_value("Contact"),
        Some("<sip:500@host.local.mesh>")
    );
    token.cancel();
}

#[tokio::test]
async fn test_invite_unknown_target_is_not_found() {
    let token = CancellationToken::new();
    let server = test_server(vec![roster_entry("400", "K4DD", false)], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(&client, &invite_for("999", "localnode.local.mesh")).await;
    assert_eq!(resp.status_code, 404);
    assert_eq!(resp.status_message, "Not Found");
    token.cancel();
}

#[tokio::test]
async fn test_invite_to_non_local_identity_is_not_found() {
    let token = CancellationToken::new();
    let identities: HashSet<String> = ["localnode.local.mesh".to_string()].into();
    let server = test_server(vec![roster_entry("100", "K1AA", true)], false, identities);
    let (_, client) = start_server(&server, &token).await;

    // the identity gate fires before the roster lookup
    let resp = roundtrip(&client, &invite_for("100", "othernode.local.mesh")).await;
    assert_eq!(resp.status_code, 404);

    let resp = roundtrip(&client, &invite_for("100", "LOCALNODE.local.mesh")).await;
    assert_eq!(resp.status_code, 302);
    token.cancel();
}

#[tokio::test]
async fn test_unsupported_method_not_allowed() {
    let token = CancellationToken::new();
    let server = test_server(vec![], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    let resp = roundtrip(
        &client,
        "OPTIONS sip:localnode.local.mesh SIP/2.0\r\n\
         Via: SIP/2.0/UDP 127.0.0.1\r\n\
         CSeq: 1 OPTIONS\r\n\
         \r\n",
    )
    .await;
    assert_eq!(resp.status_code, 405);
    assert_eq!(resp.status_message, "Method Not Allowed");
    token.cancel();
}

#[tokio::test]
async fn test_keepalive_and_ack_get_no_response() {
    let token = CancellationToken::new();
    let server = test_server(vec![], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    client.send(b"\r\n").await.expect("send keepalive");
    client
        .send(
            b"ACK sip:100@localnode.local.mesh SIP/2.0\r\n\
              Via: SIP/2.0/UDP 127.0.0.1\r\n\
              \r\n",
        )
        .await
        .expect("send ack");

    let mut buf = vec![0u8; 2048];
    let got = timeout(Duration::from_millis(200), client.recv(&mut buf)).await;
    assert!(got.is_err(), "neither keep-alive nor ACK may be answered");
    token.cancel();
}

#[tokio::test]
async fn test_message_relay_roundtrip() {
    use crate::sip::address::{Address, Uri};
    use crate::sip::message::{Header, Method, Request, Response as SipResponse};

    // The relay always dials the well-known phone port; a busy 5060 means
    // another process owns it and this test cannot run.
    let phone = match UdpSocket::bind("127.0.0.1:5060").await {
        Ok(phone) => phone,
        Err(_) => return,
    };
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let (n, peer) = phone.recv_from(&mut buf).await.expect("phone recv");
        let req = Request::parse(&buf[..n]).expect("phone parse");
        assert_eq!(req.method, Some(Method::Message));
        assert_eq!(req.body, b"hello");
        let resp = SipResponse::from_request(&req, 200, "OK");
        phone
            .send_to(&resp.serialize(), peer)
            .await
            .expect("phone send");
    });

    let server = test_server(vec![], false, HashSet::new());
    let from = Address::new("", Uri::new("900", "900.local.mesh"));
    let to = Address::new("", Uri::new("500", "127.0.0.1"));
    let req = Request::new(
        Method::Message,
        &from,
        &to,
        1,
        vec![Header::new("Content-Type", "text/plain")],
        b"hello".to_vec(),
    );

    let resp = server.send_message(&req).await.expect("relay");
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.status_message, "OK");
}

#[tokio::test]
async fn test_malformed_packet_is_dropped() {
    let token = CancellationToken::new();
    let server = test_server(vec![], false, HashSet::new());
    let (_, client) = start_server(&server, &token).await;

    client.send(b"complete garbage").await.expect("send");
    let mut buf = vec![0u8; 2048];
    let got = timeout(Duration::from_millis(200), client.recv(&mut buf)).await;
    assert!(got.is_err(), "malformed packets are silently dropped");
    token.cancel();
}
