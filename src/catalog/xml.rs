//! XML payloads exchanged with BisQue.

use std::collections::BTreeMap;
use std::fmt::Display;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};

use crate::error::OpsError;

/// One element of a parsed document, flattened in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    /// Nesting depth; the root element is 0.
    pub depth: usize,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn malformed(err: impl Display) -> OpsError {
    OpsError::Operation(format!("malformed XML: {}", err))
}

fn element_of(start: &BytesStart<'_>, depth: usize) -> crate::Result<Element> {
    let mut attributes = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        attributes.insert(key, value);
    }
    Ok(Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        attributes,
        depth,
    })
}

/// Every element of `doc` in document order.
pub fn elements(doc: &str) -> crate::Result<Vec<Element>> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);
    let mut found = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                found.push(element_of(&start, depth)?);
                depth += 1;
            }
            Event::Empty(start) => found.push(element_of(&start, depth)?),
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }
    if found.is_empty() {
        return Err(malformed("document has no root element"));
    }
    Ok(found)
}

/// The root element's attributes.
pub fn root(doc: &str) -> crate::Result<Element> {
    let mut all = elements(doc)?;
    Ok(all.swap_remove(0))
}

/// Direct children of the root element.
pub fn children(doc: &str) -> crate::Result<Vec<Element>> {
    Ok(elements(doc)?
        .into_iter()
        .filter(|e| e.depth == 1)
        .collect())
}

/// First element named `name` anywhere in the document.
pub fn find_first(doc: &str, name: &str) -> crate::Result<Option<Element>> {
    Ok(elements(doc)?.into_iter().find(|e| e.name == name))
}

/// Render `<resource value=.. permission=..>` with the children of the tag
/// document's root element (if any) nested inside.
pub fn resource_document(
    value: &str,
    permission: &str,
    tags: Option<&str>,
) -> crate::Result<String> {
    let mut writer = Writer::new(Vec::new());
    let start = BytesStart::new("resource")
        .with_attributes([("value", value), ("permission", permission)]);

    match tags {
        None => writer.write_event(Event::Empty(start)).map_err(malformed)?,
        Some(tags) => {
            writer.write_event(Event::Start(start)).map_err(malformed)?;
            copy_root_children(tags, &mut writer)?;
            writer
                .write_event(Event::End(BytesEnd::new("resource")))
                .map_err(malformed)?;
        }
    }

    String::from_utf8(writer.into_inner()).map_err(malformed)
}

fn copy_root_children(doc: &str, writer: &mut Writer<Vec<u8>>) -> crate::Result<()> {
    let mut reader = Reader::from_str(doc);
    reader.config_mut().trim_text(true);
    let mut depth = 0usize;
    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(_) => {
                depth += 1;
                if depth > 1 {
                    writer.write_event(event).map_err(malformed)?;
                }
            }
            Event::End(_) => {
                if depth > 1 {
                    writer.write_event(event).map_err(malformed)?;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            Event::Decl(_) | Event::DocType(_) | Event::PI(_) => {}
            Event::Comment(_) if depth == 0 => {}
            _ if depth >= 1 => writer.write_event(event).map_err(malformed)?,
            _ => {}
        }
    }
    Ok(())
}
