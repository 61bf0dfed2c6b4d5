use crate::exporter::{project, xml, Exporter, ExportOptions};
use crate::roster::Entry;
use crate::Result;

pub struct Snom;

impl Exporter for Snom {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        xml::write_directory("SnomIPPhoneDirectory", &[], &project(entries, options))
    }
}
