pub mod cisco;
pub mod generic;
pub mod grandstream;
pub mod snom;
pub mod vcard;
pub mod xml;
pub mod yealink;

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::config::Config;
use crate::roster::{compose_name, sorted_by_name, Entry};
use crate::{Error, Result};

pub use cisco::Cisco;
pub use generic::Generic;
pub use grandstream::Grandstream;
pub use snom::Snom;
pub use vcard::VCard;
pub use yealink::Yealink;

const DEFAULT_EXTENSION: &str = ".xml";

/// Which number(s) a directory entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Call peers by mesh hostname (or IP when resolving).
    Direct,
    /// Call peers by PBX extension.
    Pbx,
    /// Both, direct first.
    Combined,
}

impl Format {
    pub fn parse(s: &str) -> Option<Format> {
        match s.trim().to_lowercase().as_str() {
            "d" | "direct" => Some(Format::Direct),
            "p" | "pbx" => Some(Format::Pbx),
            "c" | "combined" => Some(Format::Combined),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Direct => "direct",
            Format::Pbx => "pbx",
            Format::Combined => "combined",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: Format,
    pub active_pfx: String,
    pub resolve: bool,
    pub indicate_active: bool,
    pub filter_inactive: bool,
}

impl ExportOptions {
    pub fn from_config(config: &Config, format: Format) -> Self {
        ExportOptions {
            format,
            active_pfx: config.active_pfx.clone(),
            resolve: config.resolve,
            indicate_active: config.indicate_active,
            filter_inactive: config.filter_inactive,
        }
    }
}

/// One projected directory entry, the common input of all back-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericEntry {
    pub name: String,
    pub telephones: Vec<String>,
}

/// Projects roster entries into the generic directory form: inactive
/// filtering, active prefix, name composition and the per-format telephone
/// list.
pub fn project(entries: &[Entry], options: &ExportOptions) -> Vec<GenericEntry> {
    let mut projected = Vec::new();
    for entry in entries {
        if options.filter_inactive && !entry.is_active() {
            debug!("filtering inactive entry: {:?}", entry.phone_number);
            continue;
        }
        let prefix = active_prefix(entry, options);
        let name = match compose_name(entry, prefix, ", ") {
            Some(name) => name,
            // there's no point in adding an empty contact
            None => continue,
        };
        projected.push(GenericEntry {
            name,
            telephones: telephones(entry, options),
        });
    }
    projected
}

pub(crate) fn active_prefix<'a>(entry: &Entry, options: &'a ExportOptions) -> &'a str {
    if options.indicate_active && entry.is_active() {
        options.active_pfx.as_str()
    } else {
        ""
    }
}

/// The number list for one entry: `direct` is the mesh address (or the
/// routed IP when resolving), `pbx` the extension, `combined` both.
pub(crate) fn telephones(entry: &Entry, options: &ExportOptions) -> Vec<String> {
    let direct = match &entry.olsr {
        Some(olsr) if options.resolve => olsr.ip.clone(),
        _ => entry.direct_call_address(),
    };
    match options.format {
        Format::Direct => vec![direct],
        Format::Pbx => vec![entry.phone_number.clone()],
        Format::Combined => vec![direct, entry.phone_number.clone()],
    }
}

/// A vendor back-end turning projected entries into phonebook bytes.
pub trait Exporter: Send + Sync {
    fn export(&self, entries: &[Entry], options: &ExportOptions) -> Result<Vec<u8>>;
}

/// All known back-ends by target name.
pub fn exporters() -> BTreeMap<&'static str, Box<dyn Exporter>> {
    let mut map: BTreeMap<&'static str, Box<dyn Exporter>> = BTreeMap::new();
    map.insert("generic", Box::new(Generic));
    map.insert("cisco", Box::new(Cisco));
    map.insert("yealink", Box::new(Yealink));
    map.insert("snom", Box::new(Snom));
    map.insert("grandstream", Box::new(Grandstream));
    map.insert("vcard", Box::new(VCard));
    map
}

pub fn extension(target: &str) -> &'static str {
    match target {
        "vcard" => ".vcf",
        _ => DEFAULT_EXTENSION,
    }
}

/// Renders `phonebook_<target>_<format>` files for every configured target
/// and format into the configured output directory.
pub fn write_files(entries: &[Entry], config: &Config) -> Result<()> {
    let entries = sorted_by_name(entries);
    let exporters = exporters();

    for target in &config.targets {
        let target = target.trim().to_lowercase();
        debug!("exporting for target {:?}", target);
        let exporter = exporters
            .get(target.as_str())
            .ok_or_else(|| Error::Export(format!("unknown target {:?}", target)))?;

        for format in &config.formats {
            let format = Format::parse(format)
                .ok_or_else(|| Error::Export(format!("unknown format: {:?}", format)))?;
            let options = ExportOptions::from_config(config, format);
            let body = exporter.export(&entries, &options)?;
            let filename = format!(
                "phonebook_{}_{}{}",
                target,
                format.as_str(),
                extension(&target)
            );
            std::fs::write(Path::new(&config.path).join(filename), body)?;
        }
    }
    Ok(())
}
