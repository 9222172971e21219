//! Persisted registry: app key, named projects, named remotes.
//!
//! The registry is one JSON document per installation, stored under the
//! per-user config directory and rewritten wholesale on every mutation.
//! `ConfigStore` is an explicit value bound to a path; there is no ambient
//! global. Single-writer discipline: one daemon process per registry file,
//! no file locking. Sibling CLI invocations are picked up because the
//! daemon reloads the registry at the start of every request.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::Error;

/// Secret keys are 48 random bytes, hex-encoded to 96 characters.
pub const KEY_BYTES: usize = 48;

/// Mint a fresh secret token.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(KEY_BYTES * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A project registered on the daemon machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Per-project secret authorizing build requests. Generated once at
    /// registration and regenerated only if the project is re-added.
    pub key: String,
    /// Absolute working directory builds run in.
    pub path: PathBuf,
}

/// A daemon this client knows how to reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub host: String,
    pub port: u16,
    /// App-level secret that daemon expects.
    pub key: String,
}

/// The full registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// App-level shared secret authenticating any command envelope.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
    #[serde(default)]
    pub remotes: BTreeMap<String, Remote>,
}

/// Loads, mutates, and persists the registry file.
///
/// Every mutator performs a full load-modify-save cycle so the on-disk
/// document is always a complete, current registry.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Registry path under the per-user config directory,
    /// e.g. `~/.config/rbt/config.json`.
    pub fn default_path() -> Result<PathBuf, Error> {
        let base = dirs::config_dir().ok_or(Error::NoConfigDir)?;
        Ok(base.join("rbt").join("config.json"))
    }

    pub fn open_default() -> Result<Self, Error> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the registry. Missing top-level fields default;
    /// a missing file is `NotFound`.
    pub fn load(&self) -> Result<Config, Error> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    kind: "config",
                    name: self.path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load the registry, minting an app key and persisting a fresh
    /// document if none exists yet.
    pub fn ensure_initialized(&self) -> Result<Config, Error> {
        match self.load() {
            Ok(config) => Ok(config),
            Err(Error::NotFound { .. }) => {
                let config = Config {
                    key: generate_key(),
                    ..Config::default()
                };
                self.save(&config)?;
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Atomic whole-file overwrite: write a sibling temp file, then rename
    /// over the registry.
    pub fn save(&self, config: &Config) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(config)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Register a project, minting a fresh secret key. Re-adding an
    /// existing name overwrites it (with a warning) and regenerates the key.
    pub fn add_project(&self, name: &str, directory: impl Into<PathBuf>) -> Result<Project, Error> {
        let mut config = self.ensure_initialized()?;
        if config.projects.contains_key(name) {
            warn!(project = name, "project already registered, overwriting");
        }
        let project = Project {
            key: generate_key(),
            path: directory.into(),
        };
        config.projects.insert(name.to_string(), project.clone());
        self.save(&config)?;
        Ok(project)
    }

    /// Register a remote daemon under an alias. Re-adding an existing alias
    /// overwrites it (with a warning).
    pub fn add_remote(&self, alias: &str, remote: Remote) -> Result<(), Error> {
        let mut config = self.ensure_initialized()?;
        if config.remotes.contains_key(alias) {
            warn!(remote = alias, "remote already registered, overwriting");
        }
        config.remotes.insert(alias.to_string(), remote);
        self.save(&config)
    }

    /// Remove a remote. Unknown aliases are an error.
    pub fn remove_remote(&self, alias: &str) -> Result<(), Error> {
        let mut config = self.ensure_initialized()?;
        if config.remotes.remove(alias).is_none() {
            return Err(Error::NotFound {
                kind: "remote",
                name: alias.to_string(),
            });
        }
        self.save(&config)
    }

    pub fn projects(&self) -> Result<BTreeMap<String, Project>, Error> {
        Ok(self.ensure_initialized()?.projects)
    }

    pub fn remotes(&self) -> Result<BTreeMap<String, Remote>, Error> {
        Ok(self.ensure_initialized()?.remotes)
    }

    /// Look up a remote by alias, failing with `NotFound` if absent.
    pub fn remote(&self, alias: &str) -> Result<Remote, Error> {
        self.remotes()?
            .remove(alias)
            .ok_or_else(|| Error::NotFound {
                kind: "remote",
                name: alias.to_string(),
            })
    }

    /// Look up a project by name, failing with `NotFound` if absent.
    pub fn project(&self, name: &str) -> Result<Project, Error> {
        self.projects()?
            .remove(name)
            .ok_or_else(|| Error::NotFound {
                kind: "project",
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.json"))
    }

    #[test]
    fn generated_keys_are_96_hex_chars_and_unique() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), 96);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn ensure_initialized_mints_app_key_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let first = store.ensure_initialized().unwrap();
        assert_eq!(first.key.len(), 96);
        assert!(first.projects.is_empty());
        assert!(first.remotes.is_empty());

        // Second call loads the same key instead of minting a new one.
        let second = store.ensure_initialized().unwrap();
        assert_eq!(first.key, second.key);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.load(), Err(Error::NotFound { .. })));
    }

    #[test]
    fn load_defaults_missing_top_level_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"key":"abc"}"#).unwrap();

        let config = ConfigStore::new(&path).load().unwrap();
        assert_eq!(config.key, "abc");
        assert!(config.projects.is_empty());
        assert!(config.remotes.is_empty());
    }

    #[test]
    fn add_project_generates_key_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let project = store.add_project("site", "/home/site").unwrap();
        assert_eq!(project.key.len(), 96);
        assert_eq!(project.path, PathBuf::from("/home/site"));

        let loaded = store.project("site").unwrap();
        assert_eq!(loaded, project);
    }

    #[test]
    fn re_adding_project_regenerates_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let first = store.add_project("site", "/home/site").unwrap();
        let second = store.add_project("site", "/srv/site").unwrap();
        assert_ne!(first.key, second.key);

        let projects = store.projects().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects["site"].path, PathBuf::from("/srv/site"));
    }

    #[test]
    fn remote_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .add_remote(
                "r1",
                Remote {
                    host: "h".to_string(),
                    port: 1234,
                    key: "k1".to_string(),
                },
            )
            .unwrap();

        let remotes = store.remotes().unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes["r1"].host, "h");
        assert_eq!(remotes["r1"].port, 1234);
        assert_eq!(remotes["r1"].key, "k1");

        store.remove_remote("r1").unwrap();
        assert!(store.remotes().unwrap().is_empty());

        // Removing again fails with NotFound.
        let err = store.remove_remote("r1").unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "remote", .. }));
    }

    #[test]
    fn persisted_document_matches_wire_shape() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_project("site", "/home/site").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(doc["key"].is_string());
        assert!(doc["projects"]["site"]["key"].is_string());
        assert_eq!(doc["projects"]["site"]["path"], "/home/site");
        assert!(doc["remotes"].is_object());
    }

    #[test]
    fn save_replaces_whole_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add_project("a", "/a").unwrap();

        // A save with a different Config entirely replaces the old one.
        let fresh = Config {
            key: "replacement".to_string(),
            ..Config::default()
        };
        store.save(&fresh).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.key, "replacement");
        assert!(loaded.projects.is_empty());
    }
}
