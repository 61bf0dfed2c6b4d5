use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::exporter::xml::write_text_element;
use crate::exporter::{active_prefix, Exporter, ExportOptions, Format};
use crate::roster::Entry;
use crate::Result;

/// Grandstream address-book account slots: IP calls on the first account,
/// PBX calls on the second.
const IP_CALL_ACCOUNT_IDX: u8 = 0;
const PBX_ACCOUNT_IDX: u8 = 1;

pub struct Grandstream;

/// Grandstream's book splits names into first/last fields rather than one
/// display string; the active prefix and callsign ride along in the
/// first-name field, which is what these phones display first.
impl Exporter for Grandstream {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("AddressBook")))?;

        for entry in entries {
            if options.filter_inactive && !entry.is_active() {
                continue;
            }
            let pfx = active_prefix(entry, options);
            let (first, last) = match (
                entry.last_name.is_empty(),
                entry.first_name.is_empty(),
                entry.callsign.is_empty(),
            ) {
                (true, true, true) => continue,
                (true, true, false) => (format!("{}{}", pfx, entry.callsign), String::new()),
                (true, false, _) => (
                    format!("{}{} ({})", pfx, entry.first_name, entry.callsign),
                    String::new(),
                ),
                (false, true, _) => (
                    format!("{}{}", pfx, entry.callsign),
                    entry.last_name.clone(),
                ),
                (false, false, _) => (
                    format!("{}{} ({})", pfx, entry.first_name, entry.callsign),
                    entry.last_name.clone(),
                ),
            };

            let direct = match &entry.olsr {
                Some(olsr) if options.resolve => olsr.ip.clone(),
                _ => entry.direct_call_address(),
            };
            let phones: Vec<(u8, String)> = match options.format {
                Format::Direct => vec![(IP_CALL_ACCOUNT_IDX, direct)],
                Format::Pbx => vec![(PBX_ACCOUNT_IDX, entry.phone_number.clone())],
                Format::Combined => vec![
                    (IP_CALL_ACCOUNT_IDX, direct),
                    (PBX_ACCOUNT_IDX, entry.phone_number.clone()),
                ],
            };

            writer.write_event(Event::Start(BytesStart::new("Contact")))?;
            write_text_element(&mut writer, "FirstName", &first)?;
            write_text_element(&mut writer, "LastName", &last)?;
            for (account, number) in phones {
                writer.write_event(Event::Start(BytesStart::new("Phone")))?;
                write_text_element(&mut writer, "accountindex", &account.to_string())?;
                write_text_element(&mut writer, "phonenumber", &number)?;
                writer.write_event(Event::End(BytesEnd::new("Phone")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("Contact")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("AddressBook")))?;
        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::OlsrRecord;

    #[test]
    fn test_grandstream_combined() {
        let entries = vec![Entry {
            first_name: "Ann".to_string(),
            last_name: "Ng".to_string(),
            callsign: "K1AA".to_string(),
            phone_number: "100".to_string(),
            olsr: Some(OlsrRecord {
                ip: "10.0.0.1".to_string(),
                hostname: "100".to_string(),
                comment: String::new(),
            }),
        }];
        let options = ExportOptions {
            format: Format::Combined,
            active_pfx: "*".to_string(),
            resolve: true,
            indicate_active: true,
            filter_inactive: false,
        };
        let out = Grandstream.export(&entries, &options).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<AddressBook>"));
        assert!(text.contains("<FirstName>*Ann (K1AA)</FirstName>"));
        assert!(text.contains("<LastName>Ng</LastName>"));
        assert!(text.contains("<accountindex>0</accountindex>"));
        assert!(text.contains("<phonenumber>10.0.0.1</phonenumber>"));
        assert!(text.contains("<accountindex>1</accountindex>"));
        assert!(text.contains("<phonenumber>100</phonenumber>"));
    }

    #[test]
    fn test_grandstream_callsign_only() {
        let entries = vec![Entry {
            callsign: "K1AA".to_string(),
            phone_number: "100".to_string(),
            ..Default::default()
        }];
        let options = ExportOptions {
            format: Format::Pbx,
            active_pfx: "*".to_string(),
            resolve: false,
            indicate_active: false,
            filter_inactive: false,
        };
        let out = Grandstream.export(&entries, &options).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<FirstName>K1AA</FirstName>"));
        assert!(text.contains("<LastName"));
    }
}
