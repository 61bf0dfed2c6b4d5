// A phonebook and SIP redirect service for AREDN mesh networks
pub type Result<T> = std::result::Result<T, crate::error::Error>;
pub use crate::error::Error;
pub mod cache;
pub mod config;
pub mod error;
pub mod exporter;
pub mod ldap;
pub mod roster;
pub mod sip;
pub mod web;

/// DNS suffix of the AREDN mesh overlay.
pub const AREDN_DOMAIN: &str = "local.mesh";
/// Well-known alias every node answers to.
pub const AREDN_LOCAL_NODE: &str = "localnode.local.mesh";
