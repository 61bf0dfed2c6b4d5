use thiserror::Error as ThisError;

/// Which part of a SIP message failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    StartLine,
    StatusCode,
    Header,
    Address,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::StartLine => write!(f, "start line"),
            ParseErrorKind::StatusCode => write!(f, "status code"),
            ParseErrorKind::Header => write!(f, "header"),
            ParseErrorKind::Address => write!(f, "address"),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("SIP parse error ({0}): {1}")]
    SipParse(ParseErrorKind, String),

    #[error("config error: {0}")]
    Config(String),

    #[error("import error: {0}")]
    Import(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("SIP server error: {0}")]
    SipServer(String),

    #[error("relay timeout waiting for response from {0}")]
    RelayTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("error: {0}")]
    Error(String),
}
