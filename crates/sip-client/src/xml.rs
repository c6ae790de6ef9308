//! Minimal XML parsing for the entity-API response shapes this client
//! consumes: identifier lookups, entity documents, and children listings.
//!
//! Like the XIP catalog's writer, this only understands well-formed
//! documents shaped the way the preservation service actually emits
//! them; it is not a general-purpose XML reader.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::entity::{Entity, EntityKind, IdentifiedEntity, MetadataFragmentRef};
use crate::error::{IngestError, Result};

fn malformed(path: &str, reason: impl Into<String>) -> IngestError {
    IngestError::MalformedResponse {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn next_event<'a>(reader: &mut Reader<&'a [u8]>, path: &str) -> Result<Event<'a>> {
    loop {
        let ev = reader
            .read_event()
            .map_err(|e| malformed(path, e.to_string()))?;
        if let Event::Text(t) = &ev {
            let s = t.unescape().map_err(|e| malformed(path, e.to_string()))?;
            if s.trim().is_empty() {
                continue;
            }
        }
        return Ok(ev);
    }
}

fn read_leaf_text(reader: &mut Reader<&[u8]>, tag: &str, path: &str) -> Result<String> {
    match next_event(reader, path)? {
        Event::Text(t) => {
            let s = t.unescape().map_err(|e| malformed(path, e.to_string()))?.into_owned();
            match next_event(reader, path)? {
                Event::End(e) if e.name().as_ref() == tag.as_bytes() => Ok(s),
                other => Err(malformed(path, format!("expected </{tag}>, got {other:?}"))),
            }
        }
        Event::End(e) if e.name().as_ref() == tag.as_bytes() => Ok(String::new()),
        other => Err(malformed(path, format!("expected text in <{tag}>, got {other:?}"))),
    }
}

fn read_child_text(reader: &mut Reader<&[u8]>, tag: &str, path: &str) -> Result<String> {
    match next_event(reader, path)? {
        Event::Start(e) if e.name().as_ref() == tag.as_bytes() => read_leaf_text(reader, tag, path),
        other => Err(malformed(path, format!("expected <{tag}>, got {other:?}"))),
    }
}

/// Parse a `GET /api/entity/entities/by-identifier` response into the
/// list of matching entities.
pub fn parse_by_identifier(xml: &str, path: &str) -> Result<Vec<IdentifiedEntity>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();

    loop {
        match next_event(&mut reader, path)? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == b"Entity" => {
                let type_ = read_child_text(&mut reader, "Type", path)?;
                let ref_ = read_child_text(&mut reader, "Ref", path)?;
                let title = read_child_text(&mut reader, "Title", path)?;
                let uri = read_child_text(&mut reader, "Uri", path)?;
                match next_event(&mut reader, path)? {
                    Event::End(e) if e.name().as_ref() == b"Entity" => {}
                    other => return Err(malformed(path, format!("expected </Entity>, got {other:?}"))),
                }
                let kind = EntityKind::parse_short(&type_)
                    .ok_or_else(|| malformed(path, format!("unknown entity type {type_:?}")))?;
                out.push(IdentifiedEntity { kind, ref_, title, uri });
            }
            _ => continue,
        }
    }
    Ok(out)
}

/// Parse a `GET /api/entity/<kind>/<ref>` response into an [`Entity`].
pub fn parse_entity(xml: &str, path: &str) -> Result<Entity> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ref_ = None;
    let mut title = None;
    let mut security_tag = None;
    let mut parent_ref = None;
    let mut self_uri = None;
    let mut parent_uri = None;
    let mut children_uri = None;
    let mut metadata = Vec::new();

    loop {
        match next_event(&mut reader, path)? {
            Event::Eof => break,
            Event::Start(e) => match e.name().as_ref() {
                b"Ref" => ref_ = Some(read_leaf_text(&mut reader, "Ref", path)?),
                b"Title" => title = Some(read_leaf_text(&mut reader, "Title", path)?),
                b"SecurityTag" => security_tag = Some(read_leaf_text(&mut reader, "SecurityTag", path)?),
                b"Parent" => parent_ref = Some(read_leaf_text(&mut reader, "Parent", path)?),
                b"Self" => self_uri = Some(read_leaf_text(&mut reader, "Self", path)?),
                b"ParentUri" => parent_uri = Some(read_leaf_text(&mut reader, "ParentUri", path)?),
                b"Children" => children_uri = Some(read_leaf_text(&mut reader, "Children", path)?),
                b"Fragment" => {
                    let schema_uri = e
                        .try_get_attribute("schemaUri")
                        .map_err(|err| malformed(path, err.to_string()))?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()
                        .map_err(|err| malformed(path, err.to_string()))?
                        .unwrap_or_default();
                    let uri = read_leaf_text(&mut reader, "Fragment", path)?;
                    metadata.push(MetadataFragmentRef { schema_uri, uri });
                }
                _ => {}
            },
            _ => continue,
        }
    }

    Ok(Entity {
        ref_: ref_.ok_or_else(|| malformed(path, "missing <Ref>"))?,
        title: title.unwrap_or_default(),
        security_tag: security_tag.unwrap_or_else(|| "open".to_string()),
        parent_ref,
        uri: self_uri.unwrap_or_default(),
        parent_uri,
        children_uri,
        metadata,
    })
}

/// Parse a children-collection response into the list of child entity URIs.
pub fn parse_children_uris(xml: &str, path: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut out = Vec::new();
    loop {
        match next_event(&mut reader, path)? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == b"Child" => {
                out.push(read_leaf_text(&mut reader, "Child", path)?);
            }
            _ => continue,
        }
    }
    Ok(out)
}

/// Parse the `{token, refresh-token}` pair from a login or refresh response.
pub fn parse_token_pair(xml: &str, path: &str) -> Result<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut token = None;
    let mut refresh_token = None;
    loop {
        match next_event(&mut reader, path)? {
            Event::Eof => break,
            Event::Start(e) => match e.name().as_ref() {
                b"Token" => token = Some(read_leaf_text(&mut reader, "Token", path)?),
                b"RefreshToken" => refresh_token = Some(read_leaf_text(&mut reader, "RefreshToken", path)?),
                _ => {}
            },
            _ => continue,
        }
    }
    Ok((
        token.ok_or_else(|| malformed(path, "missing <Token>"))?,
        refresh_token.ok_or_else(|| malformed(path, "missing <RefreshToken>"))?,
    ))
}

/// Build the XML request body POSTed to the login endpoint's sibling
/// metadata-fragment and envelope-update operations. The fragment is
/// embedded verbatim; callers own the outer wrapper.
pub fn wrap_metadata_fragment(fragment_xml: &str) -> String {
    format!(
        "<MetadataContainer xmlns=\"http://preservica.com/XIP/v6.0\"><Content>{fragment_xml}</Content></MetadataContainer>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identifier_lookup_with_two_entities() {
        let xml = r#"<EntitiesResponse xmlns="http://preservica.com/EntityAPI/v6.0">
            <Entities>
                <Entity><Type>IO</Type><Ref>ref-1</Ref><Title>a</Title><Uri>https://h/api/entity/information-objects/ref-1</Uri></Entity>
                <Entity><Type>SO</Type><Ref>ref-2</Ref><Title>b</Title><Uri>https://h/api/entity/structural-objects/ref-2</Uri></Entity>
            </Entities>
        </EntitiesResponse>"#;
        let entities = parse_by_identifier(xml, "by-identifier").unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].kind, EntityKind::InformationObject);
        assert_eq!(entities[1].kind, EntityKind::StructuralObject);
        assert_eq!(entities[0].ref_, "ref-1");
    }

    #[test]
    fn parses_entity_document_with_metadata_fragments() {
        let xml = r#"<EntityResponse xmlns="http://preservica.com/EntityAPI/v6.0">
            <Ref>ref-1</Ref>
            <Title>a</Title>
            <SecurityTag>open</SecurityTag>
            <Parent>parent-ref</Parent>
            <Self>https://h/api/entity/information-objects/ref-1</Self>
            <Children>https://h/api/entity/information-objects/ref-1/children</Children>
            <Fragment schemaUri="http://preservica.com/ExtendedXIP/v6.0">https://h/frag-1</Fragment>
        </EntityResponse>"#;
        let entity = parse_entity(xml, "entity").unwrap();
        assert_eq!(entity.ref_, "ref-1");
        assert_eq!(entity.parent_ref.as_deref(), Some("parent-ref"));
        assert_eq!(entity.metadata.len(), 1);
        assert_eq!(entity.metadata[0].schema_uri, "http://preservica.com/ExtendedXIP/v6.0");
    }

    #[test]
    fn parses_token_pair() {
        let xml = r#"<LoginResponse xmlns="http://preservica.com/AccessTokenAPI/v6.0">
            <Token>tok-1</Token>
            <RefreshToken>ref-1</RefreshToken>
        </LoginResponse>"#;
        let (token, refresh) = parse_token_pair(xml, "login").unwrap();
        assert_eq!(token, "tok-1");
        assert_eq!(refresh, "ref-1");
    }

    #[test]
    fn parses_children_uri_list() {
        let xml = r#"<ChildrenResponse xmlns="http://preservica.com/EntityAPI/v6.0">
            <Children>
                <Child>https://h/api/entity/information-objects/c1</Child>
                <Child>https://h/api/entity/information-objects/c2</Child>
            </Children>
        </ChildrenResponse>"#;
        let uris = parse_children_uris(xml, "children").unwrap();
        assert_eq!(uris, vec!["https://h/api/entity/information-objects/c1", "https://h/api/entity/information-objects/c2"]);
    }
}
