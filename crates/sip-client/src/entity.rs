//! Entity documents and identifier-lookup results returned by the API.

/// Canonical plural entity-collection names used in API paths, mapped
/// from the short kind markers (`IO`, `SO`, `CO`) the identifier-lookup
/// response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    StructuralObject,
    InformationObject,
    ContentObject,
}

impl EntityKind {
    pub fn parse_short(short: &str) -> Option<Self> {
        match short {
            "SO" => Some(Self::StructuralObject),
            "IO" => Some(Self::InformationObject),
            "CO" => Some(Self::ContentObject),
            _ => None,
        }
    }

    /// The plural collection segment used in REST paths.
    pub fn as_path_segment(self) -> &'static str {
        match self {
            Self::StructuralObject => "structural-objects",
            Self::InformationObject => "information-objects",
            Self::ContentObject => "content-objects",
        }
    }
}

/// One row of a `by-identifier` lookup response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedEntity {
    pub kind: EntityKind,
    pub ref_: String,
    pub title: String,
    pub uri: String,
}

/// A fetched entity document with its XIP envelope fields and linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub ref_: String,
    pub title: String,
    pub security_tag: String,
    pub parent_ref: Option<String>,
    pub uri: String,
    pub parent_uri: Option<String>,
    pub children_uri: Option<String>,
    pub metadata: Vec<MetadataFragmentRef>,
}

/// A reference to a metadata fragment attached to an [`Entity`], as
/// returned embedded in the entity document (not its content).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFragmentRef {
    pub schema_uri: String,
    pub uri: String,
}
