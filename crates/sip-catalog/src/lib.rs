//! In-memory XIP catalog: a forest of structural, information and content
//! objects plus their representations, generations, bitstreams, identifiers
//! and metadata fragments, with a canonical XML serialization.
//!
//! Entities are stored in flat per-kind vectors plus a ref -> (kind, index)
//! map, per the source system's own reference model: every ref is an opaque
//! UUID string, parent/child linkage is expressed purely through refs, and
//! no cycles are representable because a child never stores anything but
//! its parent's ref.

mod xml;

use std::collections::HashMap;

use uuid::Uuid;

pub use xml::{from_xip_xml, to_xip_xml};

/// Errors raised by catalog mutation and lookup operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown entity reference: {0}")]
    UnknownRef(String),
    #[error("entity {0} is not a {1}")]
    WrongKind(String, &'static str),
    #[error("representation type must be Preservation or Access, got {0:?}")]
    InvalidRepresentationType(String),
    #[error("xml serialization failed: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xip parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Opaque, immutable catalog reference (a lowercase, hyphenated UUIDv4).
pub type EntityRef = String;

fn new_ref() -> EntityRef {
    Uuid::new_v4().to_string()
}

/// Representation classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationType {
    Preservation,
    Access,
}

impl RepresentationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RepresentationType::Preservation => "Preservation",
            RepresentationType::Access => "Access",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Preservation" => Ok(RepresentationType::Preservation),
            "Access" => Ok(RepresentationType::Access),
            other => Err(CatalogError::InvalidRepresentationType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructuralObject {
    pub ref_: EntityRef,
    pub title: String,
    pub security_tag: String,
    pub parent_ref: Option<EntityRef>,
}

#[derive(Debug, Clone)]
pub struct InformationObject {
    pub ref_: EntityRef,
    pub title: String,
    pub security_tag: String,
    pub parent_ref: EntityRef,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub ref_: EntityRef,
    pub name: String,
    pub type_: RepresentationType,
    pub information_object_ref: EntityRef,
    pub content_object_refs: Vec<EntityRef>,
}

#[derive(Debug, Clone)]
pub struct ContentObject {
    pub ref_: EntityRef,
    pub title: String,
    pub security_tag: String,
    pub parent_ref: EntityRef,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub ref_: EntityRef,
    pub content_object_ref: EntityRef,
    pub label: String,
    /// ISO-8601, stamped at creation.
    pub effective_date: String,
    pub bitstream_paths: Vec<String>,
    pub original: bool,
    pub active: bool,
}

/// Fixity values for one bitstream, keyed by uppercase algorithm name.
pub type Fixities = std::collections::BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct Bitstream {
    pub ref_: EntityRef,
    /// Directory component of the physical location, POSIX-relative.
    pub directory: String,
    pub filename: String,
    pub file_size: u64,
    pub fixities: Fixities,
}

impl Bitstream {
    /// The full relative path this entry occupies under `content/`.
    pub fn path(&self) -> String {
        if self.directory.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.directory, self.filename)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub ref_: EntityRef,
    pub entity_ref: EntityRef,
    pub type_: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub ref_: EntityRef,
    pub entity_ref: EntityRef,
    pub schema_uri: String,
    /// Opaque, already-serialized XML subtree.
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    StructuralObject,
    InformationObject,
    Representation,
    ContentObject,
    Generation,
    Bitstream,
}

/// The catalog tree for one package: every entity kind in its own vector,
/// plus an index from ref to the vector it lives in.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub structural_objects: Vec<StructuralObject>,
    pub information_objects: Vec<InformationObject>,
    pub representations: Vec<Representation>,
    pub content_objects: Vec<ContentObject>,
    pub generations: Vec<Generation>,
    pub bitstreams: Vec<Bitstream>,
    pub identifiers: Vec<Identifier>,
    pub metadata: Vec<Metadata>,
    index: HashMap<EntityRef, (Kind, usize)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, entity_ref: &str) -> Result<(Kind, usize)> {
        self.index
            .get(entity_ref)
            .copied()
            .ok_or_else(|| CatalogError::UnknownRef(entity_ref.to_string()))
    }

    fn require_kind(&self, entity_ref: &str, kind: Kind, label: &'static str) -> Result<()> {
        let (found, _) = self.resolve(entity_ref)?;
        if found != kind {
            return Err(CatalogError::WrongKind(entity_ref.to_string(), label));
        }
        Ok(())
    }

    pub fn add_structural_object(
        &mut self,
        title: impl Into<String>,
        parent_ref: Option<EntityRef>,
        security_tag: impl Into<String>,
    ) -> Result<EntityRef> {
        if let Some(parent) = &parent_ref {
            // A parent may legitimately point outside this catalog (the
            // destination folder in the remote repository); only check it
            // when it resolves to something we actually hold.
            if self.index.contains_key(parent) {
                self.require_kind(parent, Kind::StructuralObject, "StructuralObject")?;
            }
        }
        let r = new_ref();
        self.index
            .insert(r.clone(), (Kind::StructuralObject, self.structural_objects.len()));
        self.structural_objects.push(StructuralObject {
            ref_: r.clone(),
            title: title.into(),
            security_tag: security_tag.into(),
            parent_ref,
        });
        Ok(r)
    }

    pub fn add_information_object(
        &mut self,
        title: impl Into<String>,
        parent_ref: EntityRef,
        security_tag: impl Into<String>,
    ) -> Result<EntityRef> {
        self.require_kind(&parent_ref, Kind::StructuralObject, "StructuralObject")?;
        let r = new_ref();
        self.index
            .insert(r.clone(), (Kind::InformationObject, self.information_objects.len()));
        self.information_objects.push(InformationObject {
            ref_: r.clone(),
            title: title.into(),
            security_tag: security_tag.into(),
            parent_ref,
        });
        Ok(r)
    }

    pub fn add_content_object(
        &mut self,
        title: impl Into<String>,
        parent_ref: EntityRef,
        security_tag: impl Into<String>,
    ) -> Result<EntityRef> {
        self.require_kind(&parent_ref, Kind::InformationObject, "InformationObject")?;
        let r = new_ref();
        self.index
            .insert(r.clone(), (Kind::ContentObject, self.content_objects.len()));
        self.content_objects.push(ContentObject {
            ref_: r.clone(),
            title: title.into(),
            security_tag: security_tag.into(),
            parent_ref,
        });
        Ok(r)
    }

    pub fn add_representation(
        &mut self,
        name: impl Into<String>,
        information_object_ref: EntityRef,
        content_object_refs: Vec<EntityRef>,
        type_: RepresentationType,
    ) -> Result<EntityRef> {
        self.require_kind(&information_object_ref, Kind::InformationObject, "InformationObject")?;
        for co_ref in &content_object_refs {
            self.require_kind(co_ref, Kind::ContentObject, "ContentObject")?;
            let co = self.content_object(co_ref)?;
            if co.parent_ref != information_object_ref {
                return Err(CatalogError::WrongKind(co_ref.clone(), "ContentObject of this InformationObject"));
            }
        }
        let r = new_ref();
        self.index
            .insert(r.clone(), (Kind::Representation, self.representations.len()));
        self.representations.push(Representation {
            ref_: r.clone(),
            name: name.into(),
            type_,
            information_object_ref,
            content_object_refs,
        });
        Ok(r)
    }

    pub fn add_generation(
        &mut self,
        content_object_ref: EntityRef,
        label: impl Into<String>,
        effective_date: impl Into<String>,
        bitstream_paths: Vec<String>,
        original: bool,
        active: bool,
    ) -> Result<EntityRef> {
        self.require_kind(&content_object_ref, Kind::ContentObject, "ContentObject")?;
        let r = new_ref();
        self.index.insert(r.clone(), (Kind::Generation, self.generations.len()));
        self.generations.push(Generation {
            ref_: r.clone(),
            content_object_ref,
            label: label.into(),
            effective_date: effective_date.into(),
            bitstream_paths,
            original,
            active,
        });
        Ok(r)
    }

    pub fn add_bitstream(
        &mut self,
        directory: impl Into<String>,
        filename: impl Into<String>,
        file_size: u64,
        fixities: Fixities,
    ) -> Result<EntityRef> {
        let r = new_ref();
        self.index.insert(r.clone(), (Kind::Bitstream, self.bitstreams.len()));
        self.bitstreams.push(Bitstream {
            ref_: r.clone(),
            directory: directory.into(),
            filename: filename.into(),
            file_size,
            fixities,
        });
        Ok(r)
    }

    pub fn add_identifier(
        &mut self,
        entity_ref: EntityRef,
        value: impl Into<String>,
        type_: impl Into<String>,
    ) -> Result<EntityRef> {
        self.resolve(&entity_ref)?;
        let r = new_ref();
        self.identifiers.push(Identifier {
            ref_: r.clone(),
            entity_ref,
            type_: type_.into(),
            value: value.into(),
        });
        Ok(r)
    }

    pub fn add_metadata(
        &mut self,
        entity_ref: EntityRef,
        schema_uri: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<EntityRef> {
        self.resolve(&entity_ref)?;
        let r = new_ref();
        self.metadata.push(Metadata {
            ref_: r.clone(),
            entity_ref,
            schema_uri: schema_uri.into(),
            content: content.into(),
        });
        Ok(r)
    }

    fn content_object(&self, entity_ref: &str) -> Result<&ContentObject> {
        let (kind, idx) = self.resolve(entity_ref)?;
        if kind != Kind::ContentObject {
            return Err(CatalogError::WrongKind(entity_ref.to_string(), "ContentObject"));
        }
        Ok(&self.content_objects[idx])
    }

    /// Ref for a structural or information object with this exact title, if any.
    pub fn ref_by_title(&self, title: &str) -> Option<EntityRef> {
        self.structural_objects
            .iter()
            .find(|so| so.title == title)
            .map(|so| so.ref_.clone())
            .or_else(|| {
                self.information_objects
                    .iter()
                    .find(|io| io.title == title)
                    .map(|io| io.ref_.clone())
            })
    }

    /// Title for any entity kind that carries one.
    pub fn title_by_ref(&self, entity_ref: &str) -> Option<String> {
        match self.resolve(entity_ref).ok()? {
            (Kind::StructuralObject, i) => Some(self.structural_objects[i].title.clone()),
            (Kind::InformationObject, i) => Some(self.information_objects[i].title.clone()),
            (Kind::ContentObject, i) => Some(self.content_objects[i].title.clone()),
            _ => None,
        }
    }

    /// Direct children of an SO or IO, as refs, in insertion order.
    pub fn children(&self, parent_ref: &str) -> Vec<EntityRef> {
        let mut out: Vec<EntityRef> = self
            .structural_objects
            .iter()
            .filter(|so| so.parent_ref.as_deref() == Some(parent_ref))
            .map(|so| so.ref_.clone())
            .collect();
        out.extend(
            self.information_objects
                .iter()
                .filter(|io| io.parent_ref == parent_ref)
                .map(|io| io.ref_.clone()),
        );
        out.extend(
            self.content_objects
                .iter()
                .filter(|co| co.parent_ref == parent_ref)
                .map(|co| co.ref_.clone()),
        );
        out
    }

    /// Entities whose parent ref is absent from this catalog: the roots of
    /// the forest held here (their real parent, if any, lives upstream in
    /// the target repository).
    pub fn top_level_entities(&self) -> Vec<EntityRef> {
        self.structural_objects
            .iter()
            .filter(|so| match &so.parent_ref {
                None => true,
                Some(p) => !self.index.contains_key(p),
            })
            .map(|so| so.ref_.clone())
            .collect()
    }

    /// Fixity values recorded for a bitstream by its filename, if unique.
    pub fn fixities_by_filename(&self, filename: &str) -> Option<&Fixities> {
        self.bitstreams
            .iter()
            .find(|b| b.filename == filename)
            .map(|b| &b.fixities)
    }

    /// Number of representations of `type_` already attached to `io_ref`,
    /// used to auto-number new ones as `"{type}-{n}"`.
    pub fn representation_count(&self, io_ref: &str, type_: RepresentationType) -> usize {
        self.representations
            .iter()
            .filter(|r| r.information_object_ref == io_ref && r.type_ == type_)
            .count()
    }

    pub fn contains_ref(&self, entity_ref: &str) -> bool {
        self.index.contains_key(entity_ref)
    }

    /// Rebuild the ref -> (kind, index) map from the current vectors.
    ///
    /// Used after reconstructing a catalog from a parsed XIP document, where
    /// entities are pushed directly rather than through the validating
    /// `add_*` methods.
    pub(crate) fn reindex(&mut self) {
        self.index.clear();
        for (i, e) in self.structural_objects.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::StructuralObject, i));
        }
        for (i, e) in self.information_objects.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::InformationObject, i));
        }
        for (i, e) in self.representations.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::Representation, i));
        }
        for (i, e) in self.content_objects.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::ContentObject, i));
        }
        for (i, e) in self.generations.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::Generation, i));
        }
        for (i, e) in self.bitstreams.iter().enumerate() {
            self.index.insert(e.ref_.clone(), (Kind::Bitstream, i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_asset() -> (Catalog, EntityRef, EntityRef) {
        let mut cat = Catalog::new();
        let so = cat.add_structural_object("root", None, "open").unwrap();
        let io = cat.add_information_object("a", so.clone(), "open").unwrap();
        (cat, so, io)
    }

    #[test]
    fn rejects_representation_referencing_foreign_content_object() {
        let (mut cat, _so, io) = catalog_with_asset();
        let other_io = cat.add_information_object("b", cat.structural_objects[0].ref_.clone(), "open").unwrap();
        let foreign_co = cat.add_content_object("b.tif", other_io, "open").unwrap();
        let err = cat
            .add_representation("Preservation-1", io, vec![foreign_co], RepresentationType::Preservation)
            .unwrap_err();
        assert!(matches!(err, CatalogError::WrongKind(_, _)));
    }

    #[test]
    fn top_level_entities_excludes_nested_structural_objects() {
        let (mut cat, so, _io) = catalog_with_asset();
        let child_so = cat.add_structural_object("child", Some(so.clone()), "open").unwrap();
        let top = cat.top_level_entities();
        assert_eq!(top, vec![so]);
        assert!(!top.contains(&child_so));
    }

    #[test]
    fn representation_count_scopes_by_io_and_type() {
        let (mut cat, _so, io) = catalog_with_asset();
        let co = cat.add_content_object("p1.wav", io.clone(), "open").unwrap();
        cat.add_representation("Preservation-1", io.clone(), vec![co], RepresentationType::Preservation)
            .unwrap();
        assert_eq!(cat.representation_count(&io, RepresentationType::Preservation), 1);
        assert_eq!(cat.representation_count(&io, RepresentationType::Access), 0);
    }

    #[test]
    fn unknown_ref_is_rejected() {
        let mut cat = Catalog::new();
        let err = cat
            .add_information_object("x", "not-a-real-ref".to_string(), "open")
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownRef(_)));
    }
}
