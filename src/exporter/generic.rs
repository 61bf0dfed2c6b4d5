use crate::exporter::{project, xml, Exporter, ExportOptions};
use crate::roster::Entry;
use crate::Result;

pub struct Generic;

impl Exporter for Generic {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>> {
        xml::write_directory("IPPhoneDirectory", &[], &project(entries, options))
    }
}
