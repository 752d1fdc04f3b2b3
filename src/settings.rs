//! Settings for the build-time command.  Read from [SETTINGS_FILE] in the working directory when it exists; every
//! field has a default, so a partial file is fine and no file at all is the usual case.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::*;

pub const SETTINGS_FILE: &str = "icon-bundles.toml";

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "alchemy",
    "blacksmithing",
    "cooking",
    "enchanting",
    "engineering",
    "inscription",
    "jewelcrafting",
    "leatherworking",
    "materials",
    "tailoring",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub categories: Vec<String>,
    /// One subdirectory of `{id}.jpg` files per category.
    pub source_dir: PathBuf,
    /// Where archives are built, hashed and served from.
    pub archive_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub digest_len: usize,
    pub compress: bool,
}

impl Default for BundleSettings {
    fn default() -> Self {
        BundleSettings {
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            source_dir: PathBuf::from("assets/icons"),
            archive_dir: PathBuf::from("public/bundles"),
            manifest_path: PathBuf::from("public/bundles/manifest.json"),
            digest_len: 8,
            compress: false,
        }
    }
}

impl BundleSettings {
    /// Load from `path`, or return the defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<BundleSettings, SettingsError> {
        if !path.exists() {
            return Ok(Default::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| SettingsError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn categories(&self) -> IconCategories {
        IconCategories::new(&self.categories)
    }

    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            categories: self.categories(),
            source_dir: self.source_dir.clone(),
            archive_dir: self.archive_dir.clone(),
            compress: self.compress,
        }
    }

    pub fn publish_config(&self) -> PublishConfig {
        PublishConfig {
            categories: self.categories(),
            archive_dir: self.archive_dir.clone(),
            manifest_path: self.manifest_path.clone(),
            digest_len: self.digest_len,
        }
    }
}
