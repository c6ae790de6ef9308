//! Streaming fixity hashing for bitstreams added to a submission package.
//!
//! Files are read once, in fixed-size blocks, while every requested
//! algorithm's hasher is updated in lockstep. Digests are returned as
//! lowercase hex, matching the casing Preservica's catalog expects.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Errors raised while computing or looking up fixity values.
#[derive(Debug, thiserror::Error)]
pub enum FixityError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported fixity algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

pub type Result<T> = std::result::Result<T, FixityError>;

/// Read buffer size for streaming hashing.
const BLOCK_SIZE: usize = 512 * 1024;

/// A fixity algorithm Preservica recognises in `<Fixities>` fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// The exact catalog name Preservica stores in `<FixityAlgorithmRef>`.
    pub fn catalog_name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "MD5" => Ok(Algorithm::Md5),
            "SHA1" => Ok(Algorithm::Sha1),
            "SHA256" => Ok(Algorithm::Sha256),
            "SHA512" => Ok(Algorithm::Sha512),
            _ => Err(FixityError::UnsupportedAlgorithm(name.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.catalog_name())
    }
}

/// Digest values for a single bitstream, keyed by catalog algorithm name.
pub type Digests = BTreeMap<String, String>;

enum AnyHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl AnyHasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => AnyHasher::Md5(Md5::new()),
            Algorithm::Sha1 => AnyHasher::Sha1(Sha1::new()),
            Algorithm::Sha256 => AnyHasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => AnyHasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            AnyHasher::Md5(h) => h.update(chunk),
            AnyHasher::Sha1(h) => h.update(chunk),
            AnyHasher::Sha256(h) => h.update(chunk),
            AnyHasher::Sha512(h) => h.update(chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            AnyHasher::Md5(h) => hex::encode(h.finalize()),
            AnyHasher::Sha1(h) => hex::encode(h.finalize()),
            AnyHasher::Sha256(h) => hex::encode(h.finalize()),
            AnyHasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a file's contents against every requested algorithm in one pass.
///
/// The file is opened once and streamed through all hashers block by
/// block, so requesting all four algorithms costs one read pass, not four.
pub fn hash_file(path: impl AsRef<Path>, algorithms: &[Algorithm]) -> Result<Digests> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|source| FixityError::Io {
        path: path.display().to_string(),
        source,
    })?;
    hash_reader(&mut file, algorithms).map_err(|source| FixityError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Hash an arbitrary reader's contents against every requested algorithm.
pub fn hash_reader(reader: &mut impl Read, algorithms: &[Algorithm]) -> std::io::Result<Digests> {
    let mut hashers: Vec<(Algorithm, AnyHasher)> = algorithms
        .iter()
        .map(|&algorithm| (algorithm, AnyHasher::new(algorithm)))
        .collect();

    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        for (_, hasher) in &mut hashers {
            hasher.update(&buf[..read]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(algorithm, hasher)| (algorithm.catalog_name().to_string(), hasher.finalize_hex()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hashes_known_vector() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let digests = hash_file(
            tmp.path(),
            &[Algorithm::Md5, Algorithm::Sha1, Algorithm::Sha256, Algorithm::Sha512],
        )
        .unwrap();

        assert_eq!(digests["MD5"], "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(digests["SHA1"], "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(
            digests["SHA256"],
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            digests["SHA512"],
            "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f\
989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
        );
    }

    #[test]
    fn single_pass_covers_multiple_algorithms() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; BLOCK_SIZE * 3 + 17]).unwrap();
        let digests = hash_file(tmp.path(), &[Algorithm::Sha256]).unwrap();
        assert_eq!(digests.len(), 1);
        assert!(digests.contains_key("SHA256"));
    }

    #[test]
    fn parses_algorithm_names_case_insensitively() {
        assert_eq!(Algorithm::parse("sha-256").unwrap(), Algorithm::Sha256);
        assert_eq!(Algorithm::parse("SHA256").unwrap(), Algorithm::Sha256);
        assert!(Algorithm::parse("crc32").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = hash_file("/no/such/path/exists", &[Algorithm::Sha256]).unwrap_err();
        assert!(matches!(err, FixityError::Io { .. }));
    }
}
