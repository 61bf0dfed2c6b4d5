use std::fmt;

use rand::Rng;

use crate::error::ParseErrorKind;
use crate::sip::address::Address;
use crate::{Error, Result};

pub const SIP_VERSION: &str = "SIP/2.0";
pub const DEFAULT_MAX_FORWARDS: &str = "30";

const CRLF: &str = "\r\n";

/// SIP request method. Unknown tokens are preserved verbatim (upper-cased)
/// so a parsed message re-serializes unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Register,
    Invite,
    Ack,
    Message,
    Bye,
    Cancel,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Method {
        match token.to_uppercase().as_str() {
            "REGISTER" => Method::Register,
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "MESSAGE" => Method::Message,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Message => "MESSAGE",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Other(m) => m,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single header line. Name case and insertion order are preserved;
/// lookups are case-insensitive. To, From and Contact values additionally
/// carry the parsed [`Address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    pub address: Option<Address>,
}

impl Header {
    pub fn new(name: &str, value: &str) -> Self {
        Header {
            name: name.to_string(),
            value: value.to_string(),
            address: None,
        }
    }

    pub fn parse(line: &str) -> Result<Header> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::SipParse(ParseErrorKind::Header, line.to_string()))?;
        let name = name.trim();
        let value = value.trim();

        let address = match name.to_lowercase().as_str() {
            "to" | "from" | "contact" => Address::parse(value).ok(),
            _ => None,
        };
        Ok(Header {
            name: name.to_string(),
            value: value.to_string(),
            address,
        })
    }

    fn serialize(&self) -> String {
        format!("{}: {}", self.name, self.value)
    }
}

/// Shared header and body accessors for [`Request`] and [`Response`].
pub trait HeadersExt {
    fn headers(&self) -> &[Header];
    fn headers_mut(&mut self) -> &mut Vec<Header>;
    fn body(&self) -> &[u8];

    fn find_headers(&self, name: &str) -> Vec<&Header> {
        let name = name.to_lowercase();
        self.headers()
            .iter()
            .filter(|h| h.name.to_lowercase() == name)
            .collect()
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers()
            .iter()
            .find(|h| h.name.to_lowercase() == name)
            .map(|h| h.value.as_str())
    }

    fn add_header(&mut self, name: &str, value: &str) {
        self.headers_mut().push(Header::new(name, value));
    }

    fn remove_headers(&mut self, name: &str) {
        let name = name.to_lowercase();
        self.headers_mut().retain(|h| h.name.to_lowercase() != name);
    }

    fn to(&self) -> Option<&Address> {
        address_of(self.headers(), "to")
    }

    fn from(&self) -> Option<&Address> {
        address_of(self.headers(), "from")
    }

    fn contact(&self) -> Option<&Address> {
        address_of(self.headers(), "contact")
    }

    /// The declared Content-Length. With `update` set, a declared value that
    /// disagrees with the actual body size is rewritten in place.
    fn content_length(&mut self, update: bool) -> Option<usize> {
        let actual = self.body().len();
        let name = "content-length";
        for h in self.headers_mut().iter_mut() {
            if h.name.to_lowercase() != name {
                continue;
            }
            let declared: usize = match h.value.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if update && declared != actual {
                h.value = actual.to_string();
            }
            return Some(declared);
        }
        None
    }
}

fn address_of<'a>(headers: &'a [Header], name: &str) -> Option<&'a Address> {
    headers
        .iter()
        .find(|h| h.name.to_lowercase() == name)
        .and_then(|h| h.address.as_ref())
}

/// SIP request over the line-based RFC 3261 wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: Option<Method>,
    pub uri: String,
    pub version: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HeadersExt for Request {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
    fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Request {
    /// Synthesizes a request the way a user agent would: Via, From, To,
    /// Call-ID, CSeq and Max-Forwards, then the extra headers, then the body.
    /// The request URI is the target's URI.
    pub fn new(
        method: Method,
        from: &Address,
        to: &Address,
        cseq: u32,
        extra_headers: Vec<Header>,
        body: Vec<u8>,
    ) -> Request {
        let mut headers = vec![
            Header::new(
                "Via",
                &format!("{}/UDP {}", SIP_VERSION, from.uri.host),
            ),
            Header {
                name: "From".to_string(),
                value: from.to_string(),
                address: Some(from.clone()),
            },
            Header {
                name: "To".to_string(),
                value: to.to_string(),
                address: Some(to.clone()),
            },
            Header::new("Call-ID", &generate_call_id(&from.uri.host)),
            Header::new("CSeq", &format!("{} {}", cseq, method)),
            Header::new("Max-Forwards", DEFAULT_MAX_FORWARDS),
        ];
        headers.extend(extra_headers);
        Request {
            uri: to.uri.to_string(),
            version: SIP_VERSION.to_string(),
            method: Some(method),
            headers,
            body,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Request> {
        let mut req = Request::default();
        let (head, body) = split_head_body(data)?;
        let mut first = true;
        for line in head.lines() {
            let line = line.trim();
            if line.is_empty() {
                // an empty line ends the header section
                break;
            }
            if first {
                req.parse_start_line(line)?;
                first = false;
            } else {
                req.headers.push(Header::parse(line)?);
            }
        }
        req.body = body.to_vec();
        req.content_length(true);
        Ok(req)
    }

    fn parse_start_line(&mut self, line: &str) -> Result<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(Error::SipParse(ParseErrorKind::StartLine, line.to_string()));
        }
        self.method = Some(Method::parse(parts[0]));
        self.uri = parts[1].to_string();
        self.version = parts[2].to_string();
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let method = self.method.as_ref().map(|m| m.as_str()).unwrap_or_default();
        serialize(
            &format!("{} {} {}", method, self.uri, self.version),
            &self.headers,
            &self.body,
        )
    }
}

/// SIP response over the same wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HeadersExt for Response {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Vec<Header> {
        &mut self.headers
    }
    fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Response {
    /// Builds a response to `req`, copying the dialog-identifying headers
    /// over verbatim. Timestamp only travels on `100 Trying`.
    pub fn from_request(req: &Request, status_code: u16, status_message: &str) -> Response {
        let mut resp = Response {
            version: req.version.clone(),
            status_code,
            status_message: status_message.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        };
        for name in ["Record-Route", "Via", "From", "To", "Call-ID", "CSeq"] {
            copy_header(name, req, &mut resp);
        }
        if status_code == 100 {
            copy_header("Timestamp", req, &mut resp);
        }
        resp
    }

    pub fn parse(data: &[u8]) -> Result<Response> {
        let mut resp = Response::default();
        let (head, body) = split_head_body(data)?;
        let mut first = true;
        for line in head.lines() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if first {
                resp.parse_status_line(line)?;
                first = false;
            } else {
                resp.headers.push(Header::parse(line)?);
            }
        }
        resp.body = body.to_vec();
        resp.content_length(true);
        Ok(resp)
    }

    fn parse_status_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.splitn(3, ' ');
        let (version, code, message) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(c), Some(m)) => (v, c, m),
            _ => return Err(Error::SipParse(ParseErrorKind::StartLine, line.to_string())),
        };
        self.status_code = code
            .parse()
            .map_err(|_| Error::SipParse(ParseErrorKind::StatusCode, line.to_string()))?;
        self.version = version.to_uppercase();
        self.status_message = message.to_string();
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        serialize(
            &format!(
                "{} {} {}",
                self.version, self.status_code, self.status_message
            ),
            &self.headers,
            &self.body,
        )
    }
}

fn copy_header(name: &str, req: &Request, resp: &mut Response) {
    let lower = name.to_lowercase();
    if let Some(h) = req.headers.iter().find(|h| h.name.to_lowercase() == lower) {
        resp.headers.push(h.clone());
    }
}

/// Splits raw datagram bytes into the header section and the body. The body
/// starts after the first empty line and stays byte-verbatim.
fn split_head_body(data: &[u8]) -> Result<(&str, &[u8])> {
    let (head, body) = match find_blank_line(data) {
        Some((end, skip)) => (&data[..end], &data[end + skip..]),
        None => (data, &data[data.len()..]),
    };
    let head = std::str::from_utf8(head)
        .map_err(|_| Error::SipParse(ParseErrorKind::Header, "invalid utf-8".to_string()))?;
    Ok((head, body))
}

fn find_blank_line(data: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    data.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

fn serialize(start_line: &str, headers: &[Header], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(start_line.as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());

    // The parsed Content-Length is dropped and re-emitted from the actual
    // body size so serialization always carries the exact length.
    for hdr in headers {
        if hdr.name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        buf.extend_from_slice(hdr.serialize().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
    }
    buf.extend_from_slice(format!("Content-Length: {}", body.len()).as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", rand::thread_rng().gen::<u64>(), host)
}
