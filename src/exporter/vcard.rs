use crate::exporter::{active_prefix, telephones, ExportOptions, Exporter};
use crate::roster::{compose_name, Entry};
use crate::Result;

const CRLF: &str = "\r\n";

pub struct VCard;

/// vCard 4 text output: one card per entry with `FN`, one `TEL` per
/// telephone and an `N` carrying sort hints (last name, callsign, first
/// name).
impl Exporter for VCard {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        let mut out = String::new();
        for entry in entries {
            if options.filter_inactive && !entry.is_active() {
                continue;
            }
            let prefix = active_prefix(entry, options);
            let name = match compose_name(entry, prefix, ", ") {
                Some(name) => name,
                None => continue,
            };

            out.push_str("BEGIN:VCARD");
            out.push_str(CRLF);
            out.push_str("VERSION:4.0");
            out.push_str(CRLF);
            out.push_str(&format!("FN:{}", escape_value(&name)));
            out.push_str(CRLF);
            for telephone in telephones(entry, options) {
                out.push_str(&format!("TEL:{}", escape_value(&telephone)));
                out.push_str(CRLF);
            }
            out.push_str(&format!(
                "N;SORT-AS=\"{},{},{}\":{}",
                escape_param(&entry.last_name),
                escape_param(&entry.callsign),
                escape_param(&entry.first_name),
                escape_value(&name)
            ));
            out.push_str(CRLF);
            out.push_str("END:VCARD");
            out.push_str(CRLF);
        }
        Ok(out.into_bytes())
    }
}

fn escape_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

fn escape_param(v: &str) -> String {
    v.replace('"', "").replace(',', "\\,")
}
