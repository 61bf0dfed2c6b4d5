use crate::exporter::{project, xml, Exporter, ExportOptions};
use crate::roster::Entry;
use crate::Result;

pub struct Yealink;

impl Exporter for Yealink {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        xml::write_directory("YealinkIPPhoneDirectory", &[], &project(entries, options))
    }
}
