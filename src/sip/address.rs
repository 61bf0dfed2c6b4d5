use std::collections::BTreeMap;
use std::fmt;

use crate::error::ParseErrorKind;
use crate::{Error, Result};

/// SIP URI
///
/// `Uri` is the `sip:[user@]host[:port][;params]` form used in start lines
/// and address headers. Both `sip:` and `sips:` are accepted on input and
/// normalized away; a password in the user part is dropped.
///
/// # Examples
///
/// ```rust
/// use meshbook::sip::Uri;
///
/// let uri = Uri::parse("sip:100@node.local.mesh:5060;transport=udp");
/// assert_eq!(uri.user, "100");
/// assert_eq!(uri.host, "node.local.mesh");
/// assert_eq!(uri.port, Some(5060));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
    pub params: BTreeMap<String, String>,
}

impl Uri {
    pub fn new(user: &str, host: &str) -> Self {
        Uri {
            user: user.to_string(),
            host: host.to_string(),
            port: None,
            params: BTreeMap::new(),
        }
    }

    /// Parses a URI the way phones actually write them. Never fails: missing
    /// pieces stay empty, a malformed port is ignored.
    pub fn parse(s: &str) -> Uri {
        let mut s = s.trim();
        s = s.strip_prefix("sip:").unwrap_or(s);
        s = s.strip_prefix("sips:").unwrap_or(s);

        let (head, params) = match s.split_once(';') {
            Some((head, rest)) => (head, parse_parameters(rest)),
            None => (s, BTreeMap::new()),
        };

        let mut uri = Uri {
            params,
            ..Default::default()
        };
        let hostport = match head.split_once('@') {
            Some((userinfo, hostport)) => {
                // drop any password after ':'
                uri.user = userinfo.split(':').next().unwrap_or_default().to_string();
                hostport
            }
            None => head,
        };
        match hostport.split_once(':') {
            Some((host, port)) => {
                uri.host = host.to_string();
                uri.port = port.parse().ok();
            }
            None => uri.host = hostport.to_string(),
        }
        uri
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sip:")?;
        if !self.user.is_empty() {
            write!(f, "{}@", self.user)?;
        }
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", params_to_string(&self.params))?;
        }
        Ok(())
    }
}

/// SIP address as used in To, From and Contact headers: an optional display
/// name, a URI and header parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub display_name: String,
    pub uri: Uri,
    pub params: BTreeMap<String, String>,
}

impl Address {
    pub fn new(display_name: &str, uri: Uri) -> Self {
        Address {
            display_name: display_name.to_string(),
            uri,
            params: BTreeMap::new(),
        }
    }

    /// Parses an address header value.
    ///
    /// When the value contains `<`, the display name is everything before it
    /// (or the text between the last pair of double quotes) and the URI sits
    /// between `<` and `>`. Without angle brackets everything after the first
    /// `;` outside quotes is header parameters, per RFC 3261 §20.10.
    pub fn parse(line: &str) -> Result<Address> {
        let l = line.trim();
        if l.is_empty() {
            return Err(Error::SipParse(
                ParseErrorKind::Address,
                "empty address".to_string(),
            ));
        }

        let mut start_quote = None;
        let mut end_quote = None;
        for (i, c) in l.char_indices() {
            match c {
                '"' => {
                    if start_quote.is_none() {
                        start_quote = Some(i);
                    } else {
                        end_quote = Some(i);
                    }
                }
                '<' => {
                    let display_name = match (start_quote, end_quote) {
                        (Some(s), Some(e)) => l[s + 1..e].to_string(),
                        _ => l[..i].trim().to_string(),
                    };
                    let rest = &l[i + 1..];
                    let uri_part = match rest.find('>') {
                        Some(e) => &rest[..e],
                        None => rest,
                    };
                    let params = match l[i..].split_once(">;") {
                        Some((_, p)) => parse_parameters(p),
                        None => BTreeMap::new(),
                    };
                    return Ok(Address {
                        display_name,
                        uri: Uri::parse(uri_part),
                        params,
                    });
                }
                ';' if start_quote.is_none() => {
                    // no angle brackets: URI first, header params after
                    return Ok(Address {
                        display_name: String::new(),
                        uri: Uri::parse(&l[..i]),
                        params: parse_parameters(&l[i + 1..]),
                    });
                }
                _ => {}
            }
        }
        Ok(Address {
            display_name: String::new(),
            uri: Uri::parse(l),
            params: BTreeMap::new(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "<{}>", self.uri)?;
        } else {
            write!(f, "\"{}\" <{}>", self.display_name, self.uri)?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", params_to_string(&self.params))?;
        }
        Ok(())
    }
}

/// Parses `key[=value]` pairs separated by `;`.
pub fn parse_parameters(s: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for part in s.split(';') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => params.insert(k.to_string(), v.to_string()),
            None => params.insert(part.to_string(), String::new()),
        };
    }
    params
}

fn params_to_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| {
            let (k, v) = (k.trim(), v.trim());
            if v.is_empty() {
                k.to_string()
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join(";")
}
