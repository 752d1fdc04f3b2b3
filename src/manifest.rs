//! The published mapping from category to the current hashed archive file name.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::*;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error on manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialized as a flat JSON object; keys are sorted so rewrites of the same content are byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Manifest {
        Default::default()
    }

    pub fn insert(&mut self, category: &IconCategory, file_name: impl Into<String>) {
        self.entries
            .insert(category.as_str().to_string(), file_name.into());
    }

    pub fn get(&self, category: &IconCategory) -> Option<&str> {
        self.entries.get(category.as_str()).map(String::as_str)
    }

    /// The archive file names this manifest references.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_json(path: &Path, json: &str) -> Result<Manifest, ManifestError> {
        serde_json::from_str(json).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
        let json = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Manifest::from_json(path, &json)
    }

    /// Write the manifest as pretty JSON, replacing any previous one atomically.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        json.push('\n');
        crate::atomic_file::write_atomically(path, json.as_bytes()).map_err(|source| {
            ManifestError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}
