//! Submission package builder: a zip container wrapping the XIP catalog.
//!
//! A [`PackageBuilder`] owns the zip handle and the in-memory catalog for
//! the lifetime of one build. It is not `Send` between threads mid-build;
//! callers that need concurrent ingest should finish one package before
//! starting another.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sip_catalog::{Catalog, EntityRef, Fixities, RepresentationType};
use sip_fixity::Algorithm;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

mod protocol;

pub use protocol::Protocol;

/// Errors raised while building or serializing a submission package.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("bitstream path must be relative, got absolute path: {0}")]
    AbsolutePath(String),
    #[error("unsupported fixity algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error(transparent)]
    Catalog(#[from] sip_catalog::CatalogError),
    #[error(transparent)]
    Fixity(#[from] sip_fixity::FixityError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed existing package: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;

fn require_relative(path: &str) -> Result<()> {
    if Path::new(path).is_absolute() {
        return Err(BuildError::AbsolutePath(path.to_string()));
    }
    Ok(())
}

fn normalize_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Builds a submission package: a zip archive containing a protocol
/// manifest, a canonical XIP catalog document, and the bitstream payload.
pub struct PackageBuilder {
    zip: ZipWriter<File>,
    catalog: Catalog,
    sip_ref: String,
    parent_ref: String,
    submission_name: String,
    target_path: PathBuf,
    /// Bitstream arcnames already present under `content/` in the zip,
    /// mapped to their uncompressed size in bytes.
    content_paths: std::collections::BTreeMap<String, u64>,
}

impl PackageBuilder {
    /// Open `path` for building. If it does not exist, a fresh package is
    /// created with a new `sipRef`. If it exists, it is reopened in
    /// append mode: the existing `sipRef` and XIP catalog are recovered
    /// so further entities and bitstreams can be appended.
    pub fn open(
        path: impl AsRef<Path>,
        parent_ref: impl Into<String>,
        name: Option<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open_append(path)
        } else {
            Self::create(path, parent_ref, name)
        }
    }

    fn create(path: &Path, parent_ref: impl Into<String>, name: Option<String>) -> Result<Self> {
        let sip_ref = uuid::Uuid::new_v4().to_string();
        let submission_name = name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| sip_ref.clone())
        });
        let file = File::create(path)?;
        tracing::info!(sip_ref = %sip_ref, path = %path.display(), "created new submission package");
        Ok(Self {
            zip: ZipWriter::new(file),
            catalog: Catalog::new(),
            sip_ref,
            parent_ref: parent_ref.into(),
            submission_name,
            target_path: path.to_path_buf(),
            content_paths: std::collections::BTreeMap::new(),
        })
    }

    fn open_append(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut sip_ref = None;
        let mut content_paths = std::collections::BTreeMap::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let size = entry.size();
            if let Some(stem) = name.strip_suffix(".protocol") {
                sip_ref = Some(stem.to_string());
            }
            if let Some(rest) = name.split_once('/').and_then(|(_, rest)| {
                rest.strip_prefix("content/")
            }) {
                if !rest.is_empty() && !name.ends_with('/') {
                    content_paths.insert(rest.to_string(), size);
                }
            }
        }
        let sip_ref = sip_ref
            .ok_or_else(|| BuildError::Malformed("missing *.protocol entry".to_string()))?;

        let metadata_xml = {
            let mut entry = archive.by_name(&format!("{sip_ref}/metadata.xml"))?;
            let mut buf = String::new();
            entry.read_to_string(&mut buf)?;
            buf
        };
        let catalog = sip_catalog::from_xip_xml(&metadata_xml).map_err(BuildError::Catalog)?;

        // Reopening for append requires rewriting: the `zip` crate's
        // append support needs the file opened read-write in place.
        let append_file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        let zip = ZipWriter::new_append(append_file)?;

        let parent_ref = catalog
            .top_level_entities()
            .into_iter()
            .find_map(|r| {
                catalog
                    .structural_objects
                    .iter()
                    .find(|so| so.ref_ == r)
                    .and_then(|so| so.parent_ref.clone())
            })
            .unwrap_or_default();

        tracing::info!(sip_ref = %sip_ref, path = %path.display(), "reopened existing submission package for append");

        Ok(Self {
            zip,
            catalog,
            sip_ref,
            parent_ref,
            submission_name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            target_path: path.to_path_buf(),
            content_paths,
        })
    }

    /// The package's `sipRef`, stable for the life of this builder.
    pub fn sip_ref(&self) -> &str {
        &self.sip_ref
    }

    /// Read-only access to the catalog built so far.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn add_structobj(
        &mut self,
        title: impl Into<String>,
        parent_ref: Option<EntityRef>,
        security_tag: Option<String>,
    ) -> Result<EntityRef> {
        let r = self
            .catalog
            .add_structural_object(title, parent_ref, security_tag.unwrap_or_else(|| "open".into()))?;
        tracing::info!(ref_ = %r, "added StructuralObject");
        Ok(r)
    }

    pub fn add_infobj(
        &mut self,
        title: impl Into<String>,
        parent_ref: EntityRef,
        security_tag: Option<String>,
    ) -> Result<EntityRef> {
        let r = self
            .catalog
            .add_information_object(title, parent_ref, security_tag.unwrap_or_else(|| "open".into()))?;
        tracing::info!(ref_ = %r, "added InformationObject");
        Ok(r)
    }

    pub fn add_contobj(
        &mut self,
        filename: impl Into<String>,
        parent_ref: EntityRef,
        security_tag: Option<String>,
    ) -> Result<EntityRef> {
        let r = self
            .catalog
            .add_content_object(filename, parent_ref, security_tag.unwrap_or_else(|| "open".into()))?;
        tracing::info!(ref_ = %r, "added ContentObject");
        Ok(r)
    }

    pub fn add_representation(
        &mut self,
        name: impl Into<String>,
        io_ref: EntityRef,
        co_refs: Vec<EntityRef>,
        type_: &str,
    ) -> Result<EntityRef> {
        let type_ = RepresentationType::parse(type_)?;
        let r = self.catalog.add_representation(name, io_ref, co_refs, type_)?;
        tracing::info!(ref_ = %r, "added Representation");
        Ok(r)
    }

    pub fn add_generation(
        &mut self,
        co_ref: EntityRef,
        label: impl Into<String>,
        bitstream_paths: Vec<String>,
        original: bool,
        active: bool,
    ) -> Result<EntityRef> {
        for path in &bitstream_paths {
            require_relative(path)?;
        }
        let effective_date = Utc::now().to_rfc3339();
        let r = self
            .catalog
            .add_generation(co_ref, label, effective_date, bitstream_paths, original, active)?;
        tracing::info!(ref_ = %r, "added Generation");
        Ok(r)
    }

    /// Append a bitstream entity and, if `write` is true, copy the
    /// physical file into the zip under `<sipRef>/content/<arcname>`.
    ///
    /// `checksums` maps algorithm name (case-insensitive) to precomputed
    /// hex digest; when empty, `file_path` is hashed with every algorithm
    /// in [`sip_fixity::Algorithm`]'s default set (SHA-256 only, matching
    /// the catalog's minimum fixity requirement).
    pub fn add_bitstream(
        &mut self,
        rel_path: impl Into<String>,
        file_path: impl AsRef<Path>,
        checksums: Fixities,
        write: bool,
        arcname: Option<String>,
    ) -> Result<EntityRef> {
        let rel_path = normalize_posix(&rel_path.into());
        require_relative(&rel_path)?;
        let arcname = arcname.map(|a| normalize_posix(&a)).unwrap_or_else(|| rel_path.clone());
        require_relative(&arcname)?;

        let file_path = file_path.as_ref();
        let file_size = std::fs::metadata(file_path)?.len();

        let fixities = if checksums.is_empty() {
            sip_fixity::hash_file(file_path, &[Algorithm::Sha256])?
        } else {
            let mut verified = Fixities::new();
            for (alg, value) in checksums {
                let parsed = Algorithm::parse(&alg).map_err(|_| BuildError::UnsupportedAlgorithm(alg))?;
                verified.insert(parsed.catalog_name().to_string(), value.to_ascii_lowercase());
            }
            verified
        };

        let (directory, filename) = match arcname.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), arcname.clone()),
        };

        if write && !self.content_paths.contains_key(&arcname) {
            self.write_content_file(&arcname, file_path)?;
            self.content_paths.insert(arcname.clone(), file_size);
        }

        let r = self.catalog.add_bitstream(directory, filename, file_size, fixities)?;
        tracing::info!(ref_ = %r, arcname = %arcname, size = file_size, "added Bitstream");
        Ok(r)
    }

    fn write_content_file(&mut self, arcname: &str, file_path: &Path) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip
            .start_file(format!("{}/content/{}", self.sip_ref, arcname), options)?;
        let mut src = File::open(file_path)?;
        std::io::copy(&mut src, &mut self.zip)?;
        Ok(())
    }

    pub fn add_identifier(
        &mut self,
        entity_ref: EntityRef,
        value: impl Into<String>,
        type_: Option<String>,
    ) -> Result<EntityRef> {
        let r = self
            .catalog
            .add_identifier(entity_ref, value, type_.unwrap_or_else(|| "code".into()))?;
        tracing::info!(ref_ = %r, "added Identifier");
        Ok(r)
    }

    /// Attach an opaque XML metadata fragment to an entity. `schema_uri`
    /// is the namespace URI of the fragment's root element.
    pub fn add_metadata(
        &mut self,
        entity_ref: EntityRef,
        schema_uri: impl Into<String>,
        xml_fragment: impl Into<String>,
    ) -> Result<EntityRef> {
        let r = self.catalog.add_metadata(entity_ref, schema_uri, xml_fragment)?;
        tracing::info!(ref_ = %r, "added Metadata fragment");
        Ok(r)
    }

    /// Convenience wrapper for the extended-XIP temporal-coverage fragment.
    pub fn add_extendedxip(
        &mut self,
        entity_ref: EntityRef,
        earliest: &str,
        latest: &str,
        surrogate: bool,
    ) -> Result<EntityRef> {
        let fragment = format!(
            "<ExtendedXIP xmlns=\"http://preservica.com/ExtendedXIP/v6.0\">\
<DigitalSurrogate>{}</DigitalSurrogate><CoverageFrom>{earliest}</CoverageFrom><CoverageTo>{latest}</CoverageTo>\
</ExtendedXIP>",
            if surrogate { "true" } else { "false" },
        );
        self.add_metadata(entity_ref, "http://preservica.com/ExtendedXIP/v6.0", fragment)
    }

    /// Create IO -> CO -> Representation("Preservation-1", Preservation) ->
    /// Generation -> Bitstream from a single file. Computes checksums when
    /// none are supplied.
    pub fn add_asset_tree(
        &mut self,
        parent_ref: EntityRef,
        file_path: impl AsRef<Path>,
        checksums: Option<Fixities>,
    ) -> Result<EntityRef> {
        let file_path = file_path.as_ref();
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = file_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());

        let io = self.add_infobj(title, parent_ref, None)?;
        let co = self.add_contobj(filename.clone(), io.clone(), None)?;
        self.add_bitstream(filename.clone(), file_path, checksums.unwrap_or_default(), true, None)?;
        self.add_generation(co.clone(), "v1", vec![filename], true, true)?;
        self.add_representation("Preservation-1", io.clone(), vec![co], "Preservation")?;
        Ok(io)
    }

    /// Add one CO + Generation + Bitstream per file in `files`, then a
    /// single Representation grouping them in input order. The
    /// representation name auto-numbers as `<type>-<n>` when not given.
    pub fn add_manifestation(
        &mut self,
        io_ref: EntityRef,
        files: &[impl AsRef<Path>],
        type_: &str,
        name: Option<String>,
    ) -> Result<EntityRef> {
        let rep_type = RepresentationType::parse(type_)?;
        let mut co_refs = Vec::with_capacity(files.len());
        for file_path in files {
            let file_path = file_path.as_ref();
            let filename = file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let co = self.add_contobj(filename.clone(), io_ref.clone(), None)?;
            self.add_bitstream(filename.clone(), file_path, Fixities::new(), true, None)?;
            self.add_generation(co.clone(), "v1", vec![filename], true, true)?;
            co_refs.push(co);
        }

        let name = name.unwrap_or_else(|| {
            let n = self.catalog.representation_count(&io_ref, rep_type) + 1;
            format!("{type_}-{n}")
        });
        self.catalog
            .add_representation(name, io_ref, co_refs, rep_type)
            .map_err(BuildError::from)
    }

    /// Write `metadata.xml`, the `.protocol` manifest, then close the zip.
    pub fn serialise(mut self) -> Result<Protocol> {
        let xip_xml = sip_catalog::to_xip_xml(&self.catalog).map_err(BuildError::Catalog)?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip
            .start_file(format!("{}/metadata.xml", self.sip_ref), options)?;
        self.zip.write_all(xip_xml.as_bytes())?;

        let (files, size) = content_counts(&self.content_paths);
        let protocol = Protocol {
            date_created: Utc::now().to_rfc3339(),
            size,
            files,
            submission_name: self.submission_name.clone(),
            catalogue_name: self.submission_name.clone(),
            local_aip: self.sip_ref.clone(),
            global_aip: self.parent_ref.clone(),
            created_by: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        };
        let protocol_xml = protocol.to_xml();
        self.zip
            .start_file(format!("{}.protocol", self.sip_ref), options)?;
        self.zip.write_all(protocol_xml.as_bytes())?;
        self.zip.finish()?;

        tracing::info!(
            sip_ref = %self.sip_ref,
            path = %self.target_path.display(),
            files,
            size,
            "serialised submission package"
        );
        Ok(protocol)
    }
}

/// Unique directory and file entries under `content/`, and the sum of
/// their uncompressed sizes -- computed from arcnames staged into the zip
/// rather than re-reading it, since the zip writer does not expose a read
/// view of itself mid-build.
fn content_counts(paths: &std::collections::BTreeMap<String, u64>) -> (u64, u64) {
    let mut dirs = BTreeSet::new();
    let mut size = 0u64;
    for (path, file_size) in paths {
        size += file_size;
        let segments: Vec<&str> = path.split('/').collect();
        let mut prefix = String::new();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            dirs.insert(prefix.clone());
        }
    }
    let files = (paths.len() + dirs.len()) as u64;
    (files, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn single_file_asset_produces_expected_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let asset = write_temp_file(&dir, "a.tif", b"0123456789");
        let pkg_path = dir.path().join("out.zip");

        let mut builder = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        let root = builder.add_structobj("root", None, None).unwrap();
        builder.add_asset_tree(root, &asset, None).unwrap();
        let protocol = builder.serialise().unwrap();

        assert_eq!(protocol.size, 10);
        assert_eq!(protocol.files, 1);

        let zip_file = File::open(&pkg_path).unwrap();
        let mut archive = zip::ZipArchive::new(zip_file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("/content/a.tif")));
        assert!(names.iter().any(|n| n.ends_with("/metadata.xml")));
        assert!(names.iter().any(|n| n.ends_with(".protocol")));
    }

    #[test]
    fn rejects_absolute_bitstream_path() {
        let dir = tempfile::tempdir().unwrap();
        let asset = write_temp_file(&dir, "a.bin", b"x");
        let pkg_path = dir.path().join("out.zip");
        let mut builder = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        let root = builder.add_structobj("root", None, None).unwrap();
        let io = builder.add_infobj("a", root, None).unwrap();
        let co = builder.add_contobj("a.bin", io, None).unwrap();
        let err = builder
            .add_generation(co, "v1", vec!["/abs/a.bin".to_string()], true, true)
            .unwrap_err();
        assert!(matches!(err, BuildError::AbsolutePath(_)));
    }

    #[test]
    fn rejects_unknown_fixity_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let asset = write_temp_file(&dir, "a.bin", b"x");
        let pkg_path = dir.path().join("out.zip");
        let mut builder = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        let root = builder.add_structobj("root", None, None).unwrap();
        let io = builder.add_infobj("a", root, None).unwrap();
        let mut checksums = Fixities::new();
        checksums.insert("CRC32".into(), "deadbeef".into());
        let err = builder
            .add_bitstream("a.bin", &asset, checksums, true, None)
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedAlgorithm(_)));
        let _ = io;
    }

    #[test]
    fn manifestation_auto_numbers_representations() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_temp_file(&dir, "p1.wav", b"aaa");
        let p2 = write_temp_file(&dir, "p2.wav", b"bbb");
        let p3 = write_temp_file(&dir, "p3.wav", b"ccc");
        let pkg_path = dir.path().join("out.zip");

        let mut builder = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        let root = builder.add_structobj("root", None, None).unwrap();
        let io = builder.add_infobj("a", root, None).unwrap();

        let rep1 = builder
            .add_manifestation(io.clone(), &[p1, p2], "Preservation", None)
            .unwrap();
        let rep2 = builder.add_manifestation(io, &[p3], "Preservation", None).unwrap();

        let names: Vec<&str> = builder
            .catalog()
            .representations
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert!(names.contains(&"Preservation-1"));
        assert!(names.contains(&"Preservation-2"));
        assert_ne!(rep1, rep2);
    }

    #[test]
    fn append_reopen_preserves_sip_ref_and_merges_entities() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_path = dir.path().join("out.zip");

        let mut builder = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        let so = builder.add_structobj("root", None, None).unwrap();
        builder.serialise().unwrap();

        let original_ref = {
            let zip_file = File::open(&pkg_path).unwrap();
            let archive = zip::ZipArchive::new(zip_file).unwrap();
            (0..archive.len())
                .find_map(|i| {
                    let mut a = zip::ZipArchive::new(File::open(&pkg_path).unwrap()).unwrap();
                    let entry = a.by_index(i).ok()?;
                    entry.name().strip_suffix(".protocol").map(|s| s.to_string())
                })
                .unwrap()
        };

        let mut reopened = PackageBuilder::open(&pkg_path, "dest-folder", None).unwrap();
        assert_eq!(reopened.sip_ref(), original_ref);
        reopened.add_infobj("a", so, None).unwrap();
        reopened.serialise().unwrap();

        let zip_file = File::open(&pkg_path).unwrap();
        let mut archive = zip::ZipArchive::new(zip_file).unwrap();
        let mut entry = archive
            .by_name(&format!("{original_ref}/metadata.xml"))
            .unwrap();
        let mut xml = String::new();
        entry.read_to_string(&mut xml).unwrap();
        let reloaded = sip_catalog::from_xip_xml(&xml).unwrap();
        assert_eq!(reloaded.structural_objects.len(), 1);
        assert_eq!(reloaded.information_objects.len(), 1);
    }
}
