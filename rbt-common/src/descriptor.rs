//! Per-project build descriptor.
//!
//! `rbt.toml` is the file a developer commits alongside their project. It
//! names the remote to build on, the project registered there, the
//! project's secret key, and the commands to run. It is plain data, parsed
//! and validated; nothing in it is ever evaluated.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// File name looked up in the project directory.
pub const DESCRIPTOR_FILE: &str = "rbt.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    /// Alias of the remote in the local registry.
    pub remote_alias: String,
    /// Project name as registered on that remote.
    pub project_alias: String,
    /// The project's secret key.
    pub project_key: String,
    /// Shell commands the remote runs, in order.
    pub commands: Vec<String>,
}

impl BuildDescriptor {
    pub fn path_in(directory: &Path) -> PathBuf {
        directory.join(DESCRIPTOR_FILE)
    }

    /// Load and parse the descriptor from a project directory.
    pub fn load(directory: &Path) -> Result<Self, Error> {
        let path = Self::path_in(directory);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    kind: "descriptor",
                    name: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&raw)?)
    }

    /// A descriptor pre-filled with a fetched project key and a default
    /// command list the developer is expected to edit.
    pub fn template(
        remote_alias: impl Into<String>,
        project_alias: impl Into<String>,
        project_key: impl Into<String>,
    ) -> Self {
        Self {
            remote_alias: remote_alias.into(),
            project_alias: project_alias.into(),
            project_key: project_key.into(),
            commands: vec!["make build".to_string()],
        }
    }

    /// Render the descriptor as a TOML document.
    pub fn render(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the rendered descriptor into a directory, returning its path.
    pub fn write_to(&self, directory: &Path) -> Result<PathBuf, Error> {
        let path = Self::path_in(directory);
        fs::write(&path, self.render()?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn render_parse_round_trip() {
        let descriptor = BuildDescriptor::template("office", "site", "abc123");
        let rendered = descriptor.render().unwrap();
        let parsed: BuildDescriptor = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(parsed.commands, vec!["make build".to_string()]);
    }

    #[test]
    fn load_missing_descriptor_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = BuildDescriptor::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                kind: "descriptor",
                ..
            }
        ));
    }

    #[test]
    fn load_rejects_incomplete_descriptor() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(DESCRIPTOR_FILE),
            "remote_alias = \"office\"\n",
        )
        .unwrap();
        let err = BuildDescriptor::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Descriptor(_)));
    }

    #[test]
    fn write_to_places_file_in_directory() {
        let dir = TempDir::new().unwrap();
        let descriptor = BuildDescriptor::template("office", "site", "k");
        let path = descriptor.write_to(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(DESCRIPTOR_FILE));

        let loaded = BuildDescriptor::load(dir.path()).unwrap();
        assert_eq!(loaded, descriptor);
    }
}
