//! Authenticated client for the preservation service's entity API:
//! token lifecycle, entity lookup, metadata mutation, and streaming
//! package upload.

mod entity;
mod error;
mod session;
mod xml;

pub use entity::{Entity, EntityKind, IdentifiedEntity, MetadataFragmentRef};
pub use error::{IngestError, Result};
pub use session::{Credentials, IngestSession};
