//! Canonical XIP XML serialization.
//!
//! Written with `quick_xml`'s event writer rather than a serde derive: the
//! required entity order interleaves several of the catalog's vectors (with
//! one of them re-sorted) and metadata fragments embed an already-serialized
//! raw subtree, neither of which maps cleanly onto a single derived struct.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::Cursor;

use crate::{
    Bitstream, Catalog, CatalogError, ContentObject, Generation, Identifier, InformationObject,
    Metadata, Representation, RepresentationType, Result, StructuralObject,
};

const XIP_NS: &str = "http://preservica.com/XIP/v6.0";

/// Serialize a catalog to the canonical `<XIP>` document: entity kinds in
/// the order StructuralObject, InformationObject, Representation (sorted by
/// name descending), ContentObject, Generation, Bitstream, Identifier,
/// Metadata.
pub fn to_xip_xml(catalog: &Catalog) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
        .map_err(CatalogError::Xml)?;

    let mut root = BytesStart::new("XIP");
    root.push_attribute(("xmlns", XIP_NS));
    writer.write_event(Event::Start(root.clone())).map_err(CatalogError::Xml)?;

    for so in &catalog.structural_objects {
        write_element(&mut writer, "StructuralObject", |w| {
            write_text_el(w, "Ref", &so.ref_)?;
            write_text_el(w, "Title", &so.title)?;
            write_text_el(w, "SecurityTag", &so.security_tag)?;
            if let Some(parent) = &so.parent_ref {
                write_text_el(w, "Parent", parent)?;
            }
            Ok(())
        })?;
    }

    for io in &catalog.information_objects {
        write_element(&mut writer, "InformationObject", |w| {
            write_text_el(w, "Ref", &io.ref_)?;
            write_text_el(w, "Title", &io.title)?;
            write_text_el(w, "SecurityTag", &io.security_tag)?;
            write_text_el(w, "Parent", &io.parent_ref)?;
            Ok(())
        })?;
    }

    let mut representations: Vec<&crate::Representation> = catalog.representations.iter().collect();
    representations.sort_by(|a, b| b.name.cmp(&a.name));
    for rep in representations {
        write_element(&mut writer, "Representation", |w| {
            write_text_el(w, "Ref", &rep.ref_)?;
            write_text_el(w, "Name", &rep.name)?;
            write_text_el(w, "Type", rep.type_.as_str())?;
            write_text_el(w, "InformationObject", &rep.information_object_ref)?;
            write_element(w, "ContentObjects", |w| {
                for co_ref in &rep.content_object_refs {
                    write_text_el(w, "ContentObject", co_ref)?;
                }
                Ok(())
            })
        })?;
    }

    for co in &catalog.content_objects {
        write_element(&mut writer, "ContentObject", |w| {
            write_text_el(w, "Ref", &co.ref_)?;
            write_text_el(w, "Title", &co.title)?;
            write_text_el(w, "SecurityTag", &co.security_tag)?;
            write_text_el(w, "Parent", &co.parent_ref)?;
            Ok(())
        })?;
    }

    for gen in &catalog.generations {
        write_element_with_attrs(
            &mut writer,
            "Generation",
            &[("original", bool_str(gen.original)), ("active", bool_str(gen.active))],
            |w| {
                write_text_el(w, "Ref", &gen.ref_)?;
                write_text_el(w, "ContentObject", &gen.content_object_ref)?;
                write_text_el(w, "Label", &gen.label)?;
                write_text_el(w, "EffectiveDate", &gen.effective_date)?;
                write_element(w, "Bitstreams", |w| {
                    for path in &gen.bitstream_paths {
                        write_text_el(w, "Bitstream", path)?;
                    }
                    Ok(())
                })
            },
        )?;
    }

    for bs in &catalog.bitstreams {
        write_element(&mut writer, "Bitstream", |w| {
            write_text_el(w, "Ref", &bs.ref_)?;
            write_text_el(w, "Filename", &bs.filename)?;
            write_element(w, "PhysicalLocation", |w| {
                write_text_el(w, "Directory", &bs.directory)?;
                write_text_el(w, "Filename", &bs.filename)
            })?;
            write_text_el(w, "FileSize", &bs.file_size.to_string())?;
            write_element(w, "Fixities", |w| {
                for (algorithm, value) in &bs.fixities {
                    write_element(w, "Fixity", |w| {
                        write_text_el(w, "FixityAlgorithmRef", algorithm)?;
                        write_text_el(w, "FixityValue", value)
                    })?;
                }
                Ok(())
            })
        })?;
    }

    for ident in &catalog.identifiers {
        write_element(&mut writer, "Identifier", |w| {
            write_text_el(w, "Ref", &ident.ref_)?;
            write_text_el(w, "Entity", &ident.entity_ref)?;
            write_text_el(w, "Type", &ident.type_)?;
            write_text_el(w, "Value", &ident.value)
        })?;
    }

    for meta in &catalog.metadata {
        write_element(&mut writer, "Metadata", |w| {
            write_text_el(w, "Ref", &meta.ref_)?;
            write_text_el(w, "Entity", &meta.entity_ref)?;
            write_text_el(w, "SchemaUri", &meta.schema_uri)?;
            w.write_event(Event::Start(BytesStart::new("Content")))
                .map_err(CatalogError::Xml)?;
            w.get_mut()
                .write_all(meta.content.as_bytes())
                .map_err(|e| CatalogError::Xml(quick_xml::Error::Io(e.into())))?;
            w.write_event(Event::End(BytesEnd::new("Content"))).map_err(CatalogError::Xml)
        })?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("XIP")))
        .map_err(CatalogError::Xml)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| CatalogError::Xml(quick_xml::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())))
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

fn write_text_el(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(CatalogError::Xml)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(CatalogError::Xml)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(CatalogError::Xml)
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    body: impl FnOnce(&mut Writer<Cursor<Vec<u8>>>) -> Result<()>,
) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(CatalogError::Xml)?;
    body(writer)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(CatalogError::Xml)
}

fn write_element_with_attrs(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    attrs: &[(&str, &str)],
    body: impl FnOnce(&mut Writer<Cursor<Vec<u8>>>) -> Result<()>,
) -> Result<()> {
    let mut start = BytesStart::new(tag);
    for (key, value) in attrs {
        start.push_attribute((*key, *value));
    }
    writer.write_event(Event::Start(start)).map_err(CatalogError::Xml)?;
    body(writer)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(CatalogError::Xml)
}

/// Parse a previously-serialized `<XIP>` document back into a catalog.
///
/// Only understands documents in the shape [`to_xip_xml`] produces; it is
/// not a general-purpose XIP reader. That is sufficient for open-append,
/// whose only source of existing `metadata.xml` files is this crate itself.
pub fn from_xip_xml(xml: &str) -> Result<Catalog> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut catalog = Catalog::new();

    loop {
        match next_event(&mut reader)? {
            Event::Decl(_) => continue,
            Event::Start(e) if e.name().as_ref() == b"XIP" => break,
            Event::Eof => return Err(CatalogError::Parse("missing <XIP> root element".into())),
            _ => continue,
        }
    }

    loop {
        match next_event(&mut reader)? {
            Event::End(e) if e.name().as_ref() == b"XIP" => break,
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"StructuralObject" => catalog.structural_objects.push(parse_structural_object(&mut reader)?),
                    b"InformationObject" => catalog.information_objects.push(parse_information_object(&mut reader)?),
                    b"Representation" => catalog.representations.push(parse_representation(&mut reader)?),
                    b"ContentObject" => catalog.content_objects.push(parse_content_object(&mut reader)?),
                    b"Generation" => {
                        let original = attr_bool(&e, "original")?;
                        let active = attr_bool(&e, "active")?;
                        catalog.generations.push(parse_generation(&mut reader, original, active)?);
                    }
                    b"Bitstream" => catalog.bitstreams.push(parse_bitstream(&mut reader)?),
                    b"Identifier" => catalog.identifiers.push(parse_identifier(&mut reader)?),
                    b"Metadata" => catalog.metadata.push(parse_metadata(xml, &mut reader)?),
                    other => {
                        return Err(CatalogError::Parse(format!(
                            "unexpected top-level element <{}>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                }
            }
            Event::Eof => return Err(CatalogError::Parse("unexpected eof inside <XIP>".into())),
            _ => {}
        }
    }

    catalog.reindex();
    Ok(catalog)
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>> {
    loop {
        let ev = reader.read_event().map_err(CatalogError::Xml)?;
        if let Event::Text(t) = &ev {
            let s = t.unescape().map_err(CatalogError::Xml)?;
            if s.trim().is_empty() {
                continue;
            }
        }
        return Ok(ev);
    }
}

fn attr_bool(start: &BytesStart<'_>, name: &str) -> Result<bool> {
    let attr = start
        .try_get_attribute(name)
        .map_err(|e| CatalogError::Parse(e.to_string()))?
        .ok_or_else(|| CatalogError::Parse(format!("missing @{name} attribute")))?;
    let value = attr.unescape_value().map_err(CatalogError::Xml)?;
    Ok(value == "true")
}

fn expect_end(reader: &mut Reader<&[u8]>, tag: &str) -> Result<()> {
    match next_event(reader)? {
        Event::End(e) if e.name().as_ref() == tag.as_bytes() => Ok(()),
        other => Err(CatalogError::Parse(format!("expected </{tag}>, got {other:?}"))),
    }
}

/// Read the text content of an element whose start tag has already been
/// consumed by the caller, then its closing tag.
fn read_leaf_text(reader: &mut Reader<&[u8]>, tag: &str) -> Result<String> {
    match next_event(reader)? {
        Event::Text(t) => {
            let s = t.unescape().map_err(CatalogError::Xml)?.into_owned();
            expect_end(reader, tag)?;
            Ok(s)
        }
        Event::End(e) if e.name().as_ref() == tag.as_bytes() => Ok(String::new()),
        other => Err(CatalogError::Parse(format!("expected text or </{tag}>, got {other:?}"))),
    }
}

/// Read `<tag>text</tag>`, expecting the start tag to come next.
fn read_child_text(reader: &mut Reader<&[u8]>, tag: &str) -> Result<String> {
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == tag.as_bytes() => read_leaf_text(reader, tag),
        other => Err(CatalogError::Parse(format!("expected <{tag}>, got {other:?}"))),
    }
}

fn parse_structural_object(reader: &mut Reader<&[u8]>) -> Result<StructuralObject> {
    let ref_ = read_child_text(reader, "Ref")?;
    let title = read_child_text(reader, "Title")?;
    let security_tag = read_child_text(reader, "SecurityTag")?;
    let parent_ref = match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"Parent" => {
            let parent = read_leaf_text(reader, "Parent")?;
            expect_end(reader, "StructuralObject")?;
            Some(parent)
        }
        Event::End(e) if e.name().as_ref() == b"StructuralObject" => None,
        other => return Err(CatalogError::Parse(format!("unexpected token in StructuralObject: {other:?}"))),
    };
    Ok(StructuralObject {
        ref_,
        title,
        security_tag,
        parent_ref,
    })
}

fn parse_information_object(reader: &mut Reader<&[u8]>) -> Result<InformationObject> {
    let ref_ = read_child_text(reader, "Ref")?;
    let title = read_child_text(reader, "Title")?;
    let security_tag = read_child_text(reader, "SecurityTag")?;
    let parent_ref = read_child_text(reader, "Parent")?;
    expect_end(reader, "InformationObject")?;
    Ok(InformationObject {
        ref_,
        title,
        security_tag,
        parent_ref,
    })
}

fn parse_content_object(reader: &mut Reader<&[u8]>) -> Result<ContentObject> {
    let ref_ = read_child_text(reader, "Ref")?;
    let title = read_child_text(reader, "Title")?;
    let security_tag = read_child_text(reader, "SecurityTag")?;
    let parent_ref = read_child_text(reader, "Parent")?;
    expect_end(reader, "ContentObject")?;
    Ok(ContentObject {
        ref_,
        title,
        security_tag,
        parent_ref,
    })
}

fn parse_representation(reader: &mut Reader<&[u8]>) -> Result<Representation> {
    let ref_ = read_child_text(reader, "Ref")?;
    let name = read_child_text(reader, "Name")?;
    let type_ = RepresentationType::parse(&read_child_text(reader, "Type")?)?;
    let information_object_ref = read_child_text(reader, "InformationObject")?;
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"ContentObjects" => {}
        other => return Err(CatalogError::Parse(format!("expected <ContentObjects>, got {other:?}"))),
    }
    let mut content_object_refs = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"ContentObject" => {
                content_object_refs.push(read_leaf_text(reader, "ContentObject")?);
            }
            Event::End(e) if e.name().as_ref() == b"ContentObjects" => break,
            other => return Err(CatalogError::Parse(format!("unexpected token in ContentObjects: {other:?}"))),
        }
    }
    expect_end(reader, "Representation")?;
    Ok(Representation {
        ref_,
        name,
        type_,
        information_object_ref,
        content_object_refs,
    })
}

fn parse_generation(reader: &mut Reader<&[u8]>, original: bool, active: bool) -> Result<Generation> {
    let ref_ = read_child_text(reader, "Ref")?;
    let content_object_ref = read_child_text(reader, "ContentObject")?;
    let label = read_child_text(reader, "Label")?;
    let effective_date = read_child_text(reader, "EffectiveDate")?;
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"Bitstreams" => {}
        other => return Err(CatalogError::Parse(format!("expected <Bitstreams>, got {other:?}"))),
    }
    let mut bitstream_paths = Vec::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"Bitstream" => {
                bitstream_paths.push(read_leaf_text(reader, "Bitstream")?);
            }
            Event::End(e) if e.name().as_ref() == b"Bitstreams" => break,
            other => return Err(CatalogError::Parse(format!("unexpected token in Bitstreams: {other:?}"))),
        }
    }
    expect_end(reader, "Generation")?;
    Ok(Generation {
        ref_,
        content_object_ref,
        label,
        effective_date,
        bitstream_paths,
        original,
        active,
    })
}

fn parse_bitstream(reader: &mut Reader<&[u8]>) -> Result<Bitstream> {
    let ref_ = read_child_text(reader, "Ref")?;
    let _filename_toplevel = read_child_text(reader, "Filename")?;
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"PhysicalLocation" => {}
        other => return Err(CatalogError::Parse(format!("expected <PhysicalLocation>, got {other:?}"))),
    }
    let directory = read_child_text(reader, "Directory")?;
    let filename = read_child_text(reader, "Filename")?;
    expect_end(reader, "PhysicalLocation")?;
    let file_size: u64 = read_child_text(reader, "FileSize")?
        .parse()
        .map_err(|_| CatalogError::Parse("non-numeric FileSize".into()))?;
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"Fixities" => {}
        other => return Err(CatalogError::Parse(format!("expected <Fixities>, got {other:?}"))),
    }
    let mut fixities = crate::Fixities::new();
    loop {
        match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"Fixity" => {
                let algorithm = read_child_text(reader, "FixityAlgorithmRef")?;
                let value = read_child_text(reader, "FixityValue")?;
                expect_end(reader, "Fixity")?;
                fixities.insert(algorithm, value);
            }
            Event::End(e) if e.name().as_ref() == b"Fixities" => break,
            other => return Err(CatalogError::Parse(format!("unexpected token in Fixities: {other:?}"))),
        }
    }
    expect_end(reader, "Bitstream")?;
    Ok(Bitstream {
        ref_,
        directory,
        filename,
        file_size,
        fixities,
    })
}

fn parse_identifier(reader: &mut Reader<&[u8]>) -> Result<Identifier> {
    let ref_ = read_child_text(reader, "Ref")?;
    let entity_ref = read_child_text(reader, "Entity")?;
    let type_ = read_child_text(reader, "Type")?;
    let value = read_child_text(reader, "Value")?;
    expect_end(reader, "Identifier")?;
    Ok(Identifier {
        ref_,
        entity_ref,
        type_,
        value,
    })
}

fn parse_metadata(source: &str, reader: &mut Reader<&[u8]>) -> Result<Metadata> {
    let ref_ = read_child_text(reader, "Ref")?;
    let entity_ref = read_child_text(reader, "Entity")?;
    let schema_uri = read_child_text(reader, "SchemaUri")?;
    match next_event(reader)? {
        Event::Start(e) if e.name().as_ref() == b"Content" => {}
        other => return Err(CatalogError::Parse(format!("expected <Content>, got {other:?}"))),
    }
    let start_pos = reader.buffer_position() as usize;
    let mut prev_pos = start_pos;
    let mut depth: i32 = 0;
    let content_end;
    loop {
        let ev = next_event(reader)?;
        match &ev {
            Event::End(_) if depth == 0 => {
                content_end = prev_pos;
                break;
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            _ => {}
        }
        prev_pos = reader.buffer_position() as usize;
    }
    let content = source[start_pos..content_end].to_string();
    expect_end(reader, "Metadata")?;
    Ok(Metadata {
        ref_,
        entity_ref,
        schema_uri,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RepresentationType;

    #[test]
    fn orders_representations_descending_by_name() {
        let mut cat = Catalog::new();
        let so = cat.add_structural_object("root", None, "open").unwrap();
        let io = cat.add_information_object("a", so, "open").unwrap();
        let co1 = cat.add_content_object("p1.wav", io.clone(), "open").unwrap();
        let co2 = cat.add_content_object("p2.wav", io.clone(), "open").unwrap();
        cat.add_representation("Preservation-1", io.clone(), vec![co1.clone()], RepresentationType::Preservation)
            .unwrap();
        cat.add_representation("Preservation-2", io, vec![co2], RepresentationType::Preservation)
            .unwrap();

        let xml = to_xip_xml(&cat).unwrap();
        let first = xml.find("Preservation-2").unwrap();
        let second = xml.find("Preservation-1").unwrap();
        assert!(first < second, "Preservation-2 should sort before Preservation-1");
    }

    #[test]
    fn root_carries_xip_namespace_and_declaration() {
        let cat = Catalog::new();
        let xml = to_xip_xml(&cat).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"));
        assert!(xml.contains("xmlns=\"http://preservica.com/XIP/v6.0\""));
    }

    #[test]
    fn metadata_content_is_embedded_verbatim() {
        let mut cat = Catalog::new();
        let so = cat.add_structural_object("root", None, "open").unwrap();
        cat.add_metadata(so, "urn:example:schema", "<mods:mods><mods:title>x</mods:title></mods:mods>")
            .unwrap();
        let xml = to_xip_xml(&cat).unwrap();
        assert!(xml.contains("<mods:mods><mods:title>x</mods:title></mods:mods>"));
    }

    #[test]
    fn round_trips_a_full_catalog() {
        let mut cat = Catalog::new();
        let so = cat.add_structural_object("root", None, "open").unwrap();
        let io = cat.add_information_object("a", so.clone(), "open").unwrap();
        let co = cat.add_content_object("a.tif", io.clone(), "open").unwrap();
        let gen_ref = cat
            .add_generation(co.clone(), "v1", "2024-01-01T00:00:00Z", vec!["a.tif".into()], true, true)
            .unwrap();
        let mut fixities = crate::Fixities::new();
        fixities.insert("SHA256".into(), "deadbeef".into());
        cat.add_bitstream("", "a.tif", 10, fixities).unwrap();
        cat.add_representation("Preservation-1", io.clone(), vec![co.clone()], RepresentationType::Preservation)
            .unwrap();
        cat.add_identifier(io.clone(), "123", "code").unwrap();
        cat.add_metadata(io, "urn:example:schema", "<x>1</x>").unwrap();

        let xml = to_xip_xml(&cat).unwrap();
        let reloaded = from_xip_xml(&xml).unwrap();

        assert_eq!(reloaded.structural_objects.len(), 1);
        assert_eq!(reloaded.information_objects.len(), 1);
        assert_eq!(reloaded.content_objects.len(), 1);
        assert_eq!(reloaded.generations.len(), 1);
        assert_eq!(reloaded.generations[0].ref_, gen_ref);
        assert_eq!(reloaded.bitstreams.len(), 1);
        assert_eq!(reloaded.bitstreams[0].fixities.get("SHA256").map(String::as_str), Some("deadbeef"));
        assert_eq!(reloaded.representations.len(), 1);
        assert_eq!(reloaded.identifiers.len(), 1);
        assert_eq!(reloaded.metadata.len(), 1);
        assert_eq!(reloaded.metadata[0].content, "<x>1</x>");
        assert!(reloaded.contains_ref(&so));
    }
}
