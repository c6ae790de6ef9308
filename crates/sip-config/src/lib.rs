//! Profile-keyed credential store for the preservation service.
//!
//! Configuration lives at `~/.preservica/config.json`, a JSON object keyed
//! by profile name. Each profile carries `Host`, `Tenant`, `Username` and
//! `Password`. Writes go through a temp file in the same directory and an
//! atomic rename, never a direct write, so a crash mid-save cannot leave a
//! half-written config behind.
//!
//! Explicit profile values always win; missing fields fall back to the
//! `PRESERVICA_HOST` / `PRESERVICA_TENANT` / `PRESERVICA_USERNAME` /
//! `PRESERVICA_PASSWORD` environment variables, mirroring the teacher's
//! env-first credential resolution.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors raised while loading or saving the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHomeDir,

    #[error("no profile named {0:?} in {1}")]
    UnknownProfile(String, String),

    #[error("profile {0:?} is missing required field {1} (and no {2} env var is set)")]
    MissingField(String, &'static str, &'static str),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// One profile's stored credential fields. Any field may be absent from
/// disk; absence defers to the matching environment variable at
/// [`Profile::resolve`] time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "Host", skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "Tenant", skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(rename = "Username", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "Password", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Fully resolved credentials, every field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub host: String,
    pub tenant: String,
    pub username: String,
    pub password: String,
}

impl Profile {
    /// Fill in missing fields from the environment, then require every
    /// field be present.
    pub fn resolve(&self, profile_name: &str) -> Result<ResolvedCredentials> {
        let host = self
            .host
            .clone()
            .or_else(|| std::env::var("PRESERVICA_HOST").ok())
            .ok_or_else(|| ConfigError::MissingField(profile_name.to_string(), "Host", "PRESERVICA_HOST"))?;
        let tenant = self
            .tenant
            .clone()
            .or_else(|| std::env::var("PRESERVICA_TENANT").ok())
            .ok_or_else(|| ConfigError::MissingField(profile_name.to_string(), "Tenant", "PRESERVICA_TENANT"))?;
        let username = self
            .username
            .clone()
            .or_else(|| std::env::var("PRESERVICA_USERNAME").ok())
            .ok_or_else(|| ConfigError::MissingField(profile_name.to_string(), "Username", "PRESERVICA_USERNAME"))?;
        let password = self
            .password
            .clone()
            .or_else(|| std::env::var("PRESERVICA_PASSWORD").ok())
            .ok_or_else(|| ConfigError::MissingField(profile_name.to_string(), "Password", "PRESERVICA_PASSWORD"))?;

        Ok(ResolvedCredentials {
            host,
            tenant,
            username,
            password,
        })
    }
}

/// The full on-disk document: profile name -> credential fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config(BTreeMap<String, Profile>);

impl Config {
    /// The default config path, `~/.preservica/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".preservica").join("config.json"))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Load the config at `path`, or an empty config if the file does not
    /// exist yet.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(config)
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file yet, starting empty");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from [`Config::default_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path()?)
    }

    /// Look up a profile's stored fields (not yet resolved against env).
    pub fn profile(&self, name: &str, path_for_error: &str) -> Result<&Profile> {
        self.0
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string(), path_for_error.to_string()))
    }

    /// Insert or overwrite a named profile.
    pub fn set_profile(&mut self, name: impl Into<String>, profile: Profile) {
        self.0.insert(name.into(), profile);
    }

    pub fn remove_profile(&mut self, name: &str) -> Option<Profile> {
        self.0.remove(name)
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Write the config to `path` atomically: serialize to a temp file in
    /// the same directory, then rename over the destination.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        tmp.write_all(json.as_bytes()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.persist(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        tracing::info!(path = %path.display(), "saved configuration");
        Ok(())
    }

    pub fn save_default(&self) -> Result<()> {
        self.save(Self::default_path()?)
    }
}

/// Convenience: load the config at `path`, resolve `profile_name` against
/// env fallbacks, and return ready-to-use credentials.
pub fn resolve_profile(path: impl AsRef<Path>, profile_name: &str) -> Result<ResolvedCredentials> {
    let path = path.as_ref();
    let config = Config::load(path)?;
    match config.0.get(profile_name) {
        Some(profile) => profile.resolve(profile_name),
        None => Profile::default().resolve(profile_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_profile_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.set_profile(
            "default",
            Profile {
                host: Some("https://eu.preservica.com".into()),
                tenant: Some("tenant-a".into()),
                username: Some("user".into()),
                password: Some("pass".into()),
            },
        );
        config.save(&path).unwrap();

        let reloaded = Config::load(&path).unwrap();
        let profile = reloaded.profile("default", "config.json").unwrap();
        let resolved = profile.resolve("default").unwrap();
        assert_eq!(resolved.host, "https://eu.preservica.com");
        assert_eq!(resolved.tenant, "tenant-a");
    }

    #[test]
    fn missing_file_loads_as_empty_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.profile_names().count(), 0);
    }

    #[test]
    fn unknown_profile_is_reported_by_name() {
        let config = Config::default();
        let err = config.profile("nope", "config.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(name, _) if name == "nope"));
    }

    #[test]
    fn env_vars_fill_in_missing_fields() {
        std::env::set_var("PRESERVICA_PASSWORD", "from-env");
        let profile = Profile {
            host: Some("https://h".into()),
            tenant: Some("t".into()),
            username: Some("u".into()),
            password: None,
        };
        let resolved = profile.resolve("default").unwrap();
        assert_eq!(resolved.password, "from-env");
        std::env::remove_var("PRESERVICA_PASSWORD");
    }

    #[test]
    fn missing_field_without_env_fallback_is_an_error() {
        std::env::remove_var("PRESERVICA_PASSWORD");
        let profile = Profile {
            host: Some("https://h".into()),
            tenant: Some("t".into()),
            username: Some("u".into()),
            password: None,
        };
        let err = profile.resolve("default").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_, "Password", _)));
    }
}
