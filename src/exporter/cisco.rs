use crate::exporter::{project, xml, Exporter, ExportOptions};
use crate::roster::Entry;
use crate::Result;

pub struct Cisco;

impl Exporter for Cisco {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        xml::write_directory(
            "CiscoIPPhoneDirectory",
            &[
                ("Title", "Cisco Coporate Directory"),
                ("Prompt", "Select the User"),
            ],
            &project(entries, options),
        )
    }
}
