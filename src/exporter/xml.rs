use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::exporter::GenericEntry;
use crate::Result;

/// Writes an XML phone directory: declaration header, a vendor root
/// element, optional leading elements (Cisco's Title/Prompt) and one
/// `DirectoryEntry` per projected entry, indented with four spaces.
pub fn write_directory(
    root: &str,
    leading: &[(&str, &str)],
    entries: &[GenericEntry],
) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer.write_event(Event::Start(BytesStart::new(root)))?;
    for (name, value) in leading {
        write_text_element(&mut writer, name, value)?;
    }
    for entry in entries {
        writer.write_event(Event::Start(BytesStart::new("DirectoryEntry")))?;
        write_text_element(&mut writer, "Name", &entry.name)?;
        for telephone in &entry.telephones {
            write_text_element(&mut writer, "Telephone", telephone)?;
        }
        writer.write_event(Event::End(BytesEnd::new("DirectoryEntry")))?;
    }
    writer.write_event(Event::End(BytesEnd::new(root)))?;

    Ok(writer.into_inner())
}

pub(crate) fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
