//! The offline bundle builder: one zip per category, one entry per icon.
//!
//! Icons are read from `{source_dir}/{category}/{id}.jpg` and written to `{archive_dir}/{category}.zip` as entries
//! named `{id}.jpg`.  The output is deterministic (entries sorted by id, fixed timestamps), so rebuilding unchanged
//! icons yields byte-identical archives and therefore identical content hashes downstream.
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::*;

#[derive(Debug, derive_builder::Builder)]
pub struct BuildConfig {
    pub categories: IconCategories,
    /// Directory containing one subdirectory of icons per category.
    #[builder(setter(into))]
    pub source_dir: PathBuf,
    /// Where the plain, unhashed archives are written.
    #[builder(setter(into))]
    pub archive_dir: PathBuf,
    /// Deflate entries.  Off by default: JPEG data doesn't shrink.
    #[builder(default)]
    pub compress: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write archive: {0}")]
    Zip(#[from] ZipError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArchive {
    pub category: IconCategory,
    pub path: PathBuf,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<BuiltArchive>,
    /// Categories with no source directory.
    pub skipped: Vec<IconCategory>,
}

/// Serialize icons into an archive.  Entries are written in id order regardless of input order.
pub fn archive_bytes(
    icons: impl IntoIterator<Item = (u64, Vec<u8>)>,
    compress: bool,
) -> Result<Vec<u8>, BuildError> {
    let sorted: BTreeMap<u64, Vec<u8>> = icons.into_iter().collect();
    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip::DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (id, bytes) in sorted {
        zip.start_file(entry_name(id), options)?;
        zip.write_all(&bytes).map_err(ZipError::Io)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Collect `{id}.jpg` files from one category directory, keyed by id.
fn collect_icons(dir: &Path) -> Result<BTreeMap<u64, PathBuf>, BuildError> {
    let mut icons: BTreeMap<u64, PathBuf> = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(parse_entry_name) else {
            warn!("Skipping {}: not named {{id}}.{}", path.display(), ICON_EXTENSION);
            continue;
        };
        // `042.jpg` and `42.jpg` are the same icon.  The canonical name wins regardless of directory order.
        if let Some(previous) = icons.get(&id) {
            let (kept, dropped) = if name.to_str() == Some(entry_name(id).as_str()) {
                (path.clone(), previous.clone())
            } else {
                (previous.clone(), path.clone())
            };
            warn!(
                "Duplicate icon id {}: using {}, skipping {}",
                id,
                kept.display(),
                dropped.display()
            );
            icons.insert(id, kept);
            continue;
        }
        icons.insert(id, path);
    }
    Ok(icons)
}

/// Build the plain archive for every configured category that has a source directory.
pub fn build_bundles(config: &BuildConfig) -> Result<BuildReport, BuildError> {
    fs::create_dir_all(&config.archive_dir).map_err(io_err(&config.archive_dir))?;

    let mut report = BuildReport::default();
    for category in config.categories.iter() {
        let dir = config.source_dir.join(category.as_str());
        if !dir.is_dir() {
            debug!("No icon directory for {} at {}", category, dir.display());
            report.skipped.push(category.clone());
            continue;
        }

        let mut icons = Vec::new();
        for (id, path) in collect_icons(&dir)? {
            icons.push((id, fs::read(&path).map_err(io_err(&path))?));
        }
        let entries = icons.len();
        let bytes = archive_bytes(icons, config.compress)?;

        let out = config
            .archive_dir
            .join(format!("{}.{}", category, ARCHIVE_EXTENSION));
        crate::atomic_file::write_atomically(&out, &bytes).map_err(io_err(&out))?;
        info!(
            "Bundled {} icons for {} into {} ({} bytes)",
            entries,
            category,
            out.display(),
            bytes.len()
        );

        report.built.push(BuiltArchive {
            category: category.clone(),
            path: out,
            entries,
        });
    }

    Ok(report)
}
