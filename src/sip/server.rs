use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cache::TtlCache;
use crate::config::SharedConfig;
use crate::roster::SharedRecords;
use crate::sip::address::{Address, Uri};
use crate::sip::message::{HeadersExt, Method, Request, Response};
use crate::{Error, Result, AREDN_DOMAIN, AREDN_LOCAL_NODE};

const REGISTER_EXPIRATION: Duration = Duration::from_secs(600);

/// UDP port phones are expected to listen on.
const EXPECTED_PHONE_SIP_PORT: u16 = 5060;

const MAX_PACKET_SIZE: usize = 1500;

/// How long a MESSAGE relay waits for the peer's response datagram.
const RELAY_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUPPORTED_METHODS: &str = "INVITE, ACK, MESSAGE";

/// Addresses that never identify this node to callers.
const IGNORED_IDENTITY_PREFIXES: &[&str] = &["127.0.0.", "fe80:", "::1"];

/// A phone known from a REGISTER, kept in the TTL cache under the user part
/// of its contact URI.
#[derive(Debug, Clone)]
pub struct SipClient {
    pub address: Address,
    pub user_agent: String,
}

impl SipClient {
    pub fn key(&self) -> &str {
        &self.address.uri.user
    }

    /// Builds the cache value from a REGISTER: the contact address with all
    /// parameters stripped, plus the first User-Agent header.
    pub fn from_register(req: &Request) -> Option<SipClient> {
        if req.method != Some(Method::Register) {
            return None;
        }
        let mut address = req.contact()?.clone();
        address.uri.params.clear();
        address.params.clear();

        let user_agent = req.header_value("User-Agent").unwrap_or_default().to_string();
        Some(SipClient {
            address,
            user_agent,
        })
    }
}

struct SipServerInner {
    config: SharedConfig,
    records: SharedRecords,
    register_cache: TtlCache<String, SipClient>,

    /// Local hostnames and IPs to react to. Empty disables the check.
    local_identities: HashSet<String>,
}

/// Redirecting SIP server
///
/// `SipServer` listens on a single UDP socket and answers a small RFC 3261
/// subset: REGISTER fills the TTL cache and gets a `200 OK`, INVITE is
/// answered with a `302 Moved Temporarily` redirect to the target's mesh
/// host (or `404 Not Found`), MESSAGE is relayed to the target phone over
/// UDP, ACK is dropped and everything else gets `405 Method Not Allowed`.
/// No call media or dialog state is kept.
#[derive(Clone)]
pub struct SipServer {
    inner: Arc<SipServerInner>,
}

impl SipServer {
    pub fn new(
        config: SharedConfig,
        records: SharedRecords,
        local_identities: HashSet<String>,
    ) -> Self {
        SipServer {
            inner: Arc::new(SipServerInner {
                config,
                records,
                register_cache: TtlCache::new(),
                local_identities,
            }),
        }
    }

    /// The REGISTER cache, shared with the read-only HTTP endpoints.
    pub fn register_cache(&self) -> &TtlCache<String, SipClient> {
        &self.inner.register_cache
    }

    pub async fn serve(&self, addr: SocketAddr, token: CancellationToken) -> Result<()> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            Error::SipServer(format!("unable to listen on {}: {}", addr, e))
        })?;
        self.serve_socket(socket, token).await
    }

    /// Accept loop: every datagram is handled in its own task. Runs until
    /// the token is cancelled.
    pub async fn serve_socket(&self, socket: UdpSocket, token: CancellationToken) -> Result<()> {
        let socket = Arc::new(socket);
        info!("SIP server listening on {}", socket.local_addr()?);
        self.inner.register_cache.spawn_sweeper(token.clone());

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, peer) = select! {
                _ = token.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        error!("error reading from SIP socket: {}", e);
                        continue;
                    }
                },
            };
            if len == 0 {
                continue;
            }
            if is_keepalive(&buf[..len]) {
                trace!("received keep alive CRLF from {}", peer);
                continue;
            }
            let data = buf[..len].to_vec();
            let server = self.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                server.handle_packet(socket, peer, data).await;
            });
        }
    }

    async fn handle_packet(&self, socket: Arc<UdpSocket>, peer: SocketAddr, data: Vec<u8>) {
        trace!("received {} bytes from {}", data.len(), peer);
        let req = match Request::parse(&data) {
            Ok(req) => req,
            Err(e) => {
                // ill-formed datagram, drop it
                debug!("unparseable SIP packet from {}: {}", peer, e);
                return;
            }
        };

        let resp = match self.handle_request(req).await {
            Ok(Some(resp)) => resp,
            Ok(None) => return,
            Err(e) => {
                debug!("error handling SIP request from {}: {}", peer, e);
                return;
            }
        };

        let out = resp.serialize();
        if let Err(e) = socket.send_to(&out, peer).await {
            warn!("unable to write SIP response to {}: {}", peer, e);
        }
    }

    async fn handle_request(&self, req: Request) -> Result<Option<Response>> {
        match req.method {
            Some(Method::Register) => Ok(self.handle_register(&req)),
            Some(Method::Invite) => self.handle_invite(&req).await,
            Some(Method::Message) => {
                debug!(
                    "SIP/MESSAGE from {:?} to {:?}",
                    req.from().map(|a| a.to_string()),
                    req.to().map(|a| a.to_string())
                );
                self.send_message(&req).await.map(Some)
            }
            // fire and forget
            Some(Method::Ack) => Ok(None),
            // not reacting to empty requests
            None => Ok(None),
            Some(_) => Ok(Some(Response::from_request(
                &req,
                405,
                "Method Not Allowed",
            ))),
        }
    }

    fn handle_register(&self, req: &Request) -> Option<Response> {
        if let Some(client) = SipClient::from_register(req) {
            debug!("SIP/REGISTER from {}", client.key());
            self.inner
                .register_cache
                .set(client.key().to_string(), client, REGISTER_EXPIRATION);
        }

        let mut resp = Response::from_request(req, 200, "OK");
        resp.add_header("Allow", SUPPORTED_METHODS);
        resp.add_header("Expires", &REGISTER_EXPIRATION.as_secs().to_string());
        Some(resp)
    }

    async fn handle_invite(&self, req: &Request) -> Result<Option<Response>> {
        let to = match req.to() {
            Some(to) => to.clone(),
            None => return Ok(Some(Response::from_request(req, 404, "Not Found"))),
        };
        debug!(
            "SIP/INVITE from {:?} to {}",
            req.from().map(|a| a.to_string()),
            to
        );

        // Calls not directed at a local identity are ignored. This also
        // keeps retry storms from some clients (e.g. Linphone) down.
        let identities = &self.inner.local_identities;
        if !identities.is_empty() && !identities.contains(&to.uri.host.to_lowercase()) {
            debug!("ignoring call to non-local server: {}", to);
            return Ok(Some(Response::from_request(req, 404, "Not Found")));
        }

        let config = self.inner.config.load();
        let mut redirect: Option<Address> = None;
        {
            let records = self.inner.records.read().await;
            for entry in &records.entries {
                if entry.phone_number != to.uri.user {
                    continue;
                }
                let host = match &entry.olsr {
                    Some(olsr) if config.resolve => olsr.ip.clone(),
                    _ => entry.phone_fqdn(),
                };
                redirect = Some(Address::new(
                    &entry.callsign,
                    Uri::new(&entry.phone_number, &host),
                ));
                break;
            }
        }

        // Not in the phonebook: try locally registered clients.
        if redirect.is_none() {
            if let Some(client) = self.inner.register_cache.get(&to.uri.user) {
                let mut address = client.address.clone();
                address.uri.params.clear();
                address.params.clear();
                redirect = Some(address);
            }
        }

        let mut redirect = match redirect {
            Some(redirect) => redirect,
            None => {
                debug!("no redirect destination for {}", to);
                return Ok(Some(Response::from_request(req, 404, "Not Found")));
            }
        };

        let mut resp = Response::from_request(req, 302, "Moved Temporarily");
        resp.add_header("Contact", &redirect.to_string());
        redirect
            .params
            .insert("reason".to_string(), "unconditional".to_string());
        resp.add_header("Diversion", &redirect.to_string());
        Ok(Some(resp))
    }

    /// Relays a request to the To host on the well-known phone port and
    /// waits for a single response datagram.
    pub async fn send_message(&self, req: &Request) -> Result<Response> {
        let to = req
            .to()
            .ok_or_else(|| Error::SipServer("request has no To address".to_string()))?;
        let target = format!("{}:{}", to.uri.host, EXPECTED_PHONE_SIP_PORT);

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&target).await.map_err(|e| {
            Error::SipServer(format!("error resolving destination {}: {}", target, e))
        })?;
        socket.send(&req.serialize()).await?;

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let n = timeout(RELAY_READ_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::RelayTimeout(target))??;
        Response::parse(&buf[..n])
    }
}

/// A datagram of at most 4 bytes consisting only of CR/LF is a keep-alive.
fn is_keepalive(data: &[u8]) -> bool {
    data.len() <= 4 && data.iter().all(|&b| b == b'\r' || b == b'\n')
}

fn ignore_identity_prefix(id: &str) -> bool {
    IGNORED_IDENTITY_PREFIXES
        .iter()
        .any(|pfx| id.starts_with(pfx))
}

fn read_hostname() -> Result<String> {
    for path in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
        if let Ok(hostname) = std::fs::read_to_string(path) {
            let hostname = hostname.trim().to_string();
            if !hostname.is_empty() {
                return Ok(hostname);
            }
        }
    }
    Err(Error::SipServer("unable to look up hostname".to_string()))
}

/// Collects the names and addresses this node answers INVITEs for: the
/// well-known localnode alias, the machine hostname (with the mesh suffix
/// added when missing) and every non-loopback, non-link-local interface
/// address.
pub fn local_identities() -> Result<HashSet<String>> {
    let mut identities = HashSet::new();
    identities.insert(AREDN_LOCAL_NODE.to_string());

    let hostname = read_hostname()?;
    let hostname = hostname.to_lowercase().trim_matches('.').to_string();
    if !ignore_identity_prefix(&hostname) {
        identities.insert(hostname.clone());
        if !hostname.ends_with(AREDN_DOMAIN) {
            identities.insert(format!("{}.{}", hostname, AREDN_DOMAIN));
        }
    }

    for iface in get_if_addrs::get_if_addrs()? {
        let ip = iface.ip().to_string();
        if !ignore_identity_prefix(&ip) {
            identities.insert(ip);
        }
    }
    Ok(identities)
}
