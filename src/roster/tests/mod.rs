mod test_routing;

use crate::roster::{Entry, OlsrRecord};

pub(super) fn olsr(ip: &str, hostname: &str) -> OlsrRecord {
    OlsrRecord {
        ip: ip.to_string(),
        hostname: hostname.to_string(),
        comment: String::new(),
    }
}

pub(super) fn entry(first: &str, last: &str, call: &str, phone: &str) -> Entry {
    Entry {
        first_name: first.to_string(),
        last_name: last.to_string(),
        callsign: call.to_string(),
        phone_number: phone.to_string(),
        olsr: None,
    }
}
