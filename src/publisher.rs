//! The offline content-addressing publisher.
//!
//! For every known category, a plain `{category}.zip` is hashed and renamed to `{category}-{digest}.zip`.  If there is
//! no plain file but an already-hashed one, that one is kept as-is, so re-running over published output changes
//! nothing.  The manifest is written, and then every archive on disk the manifest doesn't name is deleted.
//!
//! The manifest write and the cleanup are two separate steps.  A crash between them leaves stale archives behind, which
//! the next run removes.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::*;

/// Longest possible digest prefix: a full SHA-256 in hex.
const MAX_DIGEST_LEN: usize = 64;

#[derive(Debug, derive_builder::Builder)]
pub struct PublishConfig {
    pub categories: IconCategories,
    #[builder(setter(into))]
    pub archive_dir: PathBuf,
    #[builder(setter(into))]
    pub manifest_path: PathBuf,
    /// Number of hex characters of the digest embedded in file names.
    #[builder(default = "8")]
    pub digest_len: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("digest length must be between 1 and {max}, got {0}", max = MAX_DIGEST_LEN)]
    InvalidDigestLength(usize),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError + '_ {
    move |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub manifest: Manifest,
    /// `(plain, hashed)` file names that were renamed this run.
    pub renamed: Vec<(String, String)>,
    /// Previously hashed files carried over unchanged.
    pub kept: Vec<String>,
    /// Categories with neither a plain nor a hashed archive.  They are absent from the manifest.
    pub missing: Vec<IconCategory>,
    /// Stale archives deleted by the cleanup pass.
    pub removed: Vec<String>,
}

/// Hex SHA-256 of `bytes`, truncated to `len` characters.
pub fn content_digest(bytes: &[u8], len: usize) -> String {
    let mut digest = hex::encode(Sha256::digest(bytes));
    digest.truncate(len);
    digest
}

struct ArchiveFile {
    name: String,
    modified: SystemTime,
}

/// All `*.zip` regular files directly inside `dir`.
fn list_archives(dir: &Path) -> Result<Vec<ArchiveFile>, PublishError> {
    let suffix = format!(".{}", ARCHIVE_EXTENSION);
    let mut out = vec![];
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let meta = entry.metadata().map_err(io_err(dir))?;
        if !meta.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if !name.ends_with(&suffix) {
            continue;
        }
        out.push(ArchiveFile {
            name,
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(out)
}

fn hashed_pattern(category: &IconCategory, digest_len: usize) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"^{}-[0-9a-f]{{{}}}\.{}$",
        regex::escape(category.as_str()),
        digest_len,
        ARCHIVE_EXTENSION
    ))
}

/// Hash, rename, write the manifest, then delete stale archives.
pub fn publish(config: &PublishConfig) -> Result<PublishReport, PublishError> {
    if config.digest_len == 0 || config.digest_len > MAX_DIGEST_LEN {
        return Err(PublishError::InvalidDigestLength(config.digest_len));
    }

    let dir = &config.archive_dir;
    let archives = list_archives(dir)?;
    let mut report = PublishReport::default();

    for category in config.categories.iter() {
        let plain = format!("{}.{}", category, ARCHIVE_EXTENSION);

        if archives.iter().any(|a| a.name == plain) {
            let plain_path = dir.join(&plain);
            let bytes = fs::read(&plain_path).map_err(io_err(&plain_path))?;
            let hashed = format!(
                "{}-{}.{}",
                category,
                content_digest(&bytes, config.digest_len),
                ARCHIVE_EXTENSION
            );
            let hashed_path = dir.join(&hashed);
            fs::rename(&plain_path, &hashed_path).map_err(io_err(&hashed_path))?;
            debug!("Renamed {} to {}", plain, hashed);

            report.manifest.insert(category, hashed.clone());
            report.renamed.push((plain, hashed));
            continue;
        }

        let pattern = hashed_pattern(category, config.digest_len)?;
        let newest = archives
            .iter()
            .filter(|a| pattern.is_match(&a.name))
            .max_by(|a, b| (a.modified, &a.name).cmp(&(b.modified, &b.name)));
        match newest {
            Some(existing) => {
                report.manifest.insert(category, existing.name.clone());
                report.kept.push(existing.name.clone());
            }
            None => {
                warn!("No archive for category {}; leaving it out of the manifest", category);
                report.missing.push(category.clone());
            }
        }
    }

    report.manifest.save(&config.manifest_path)?;
    info!(
        "Wrote manifest with {} categories to {}",
        report.manifest.len(),
        config.manifest_path.display()
    );

    // Listed again: the renames above changed the directory.
    for archive in list_archives(dir)? {
        if report.manifest.file_names().any(|n| n == archive.name) {
            continue;
        }
        let path = dir.join(&archive.name);
        fs::remove_file(&path).map_err(io_err(&path))?;
        info!("Removed stale archive {}", archive.name);
        report.removed.push(archive.name);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> PublishConfig {
        PublishConfigBuilder::default()
            .categories(IconCategories::new(["materials", "cooking", "tailoring"]))
            .archive_dir(dir)
            .manifest_path(dir.join("manifest.json"))
            .build()
            .expect("Should build")
    }

    fn names_on_disk(dir: &Path) -> Vec<String> {
        let mut names = list_archives(dir)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn digest_is_truncated_sha256() {
        assert_eq!(content_digest(b"", 8), "e3b0c442");
        assert_eq!(content_digest(b"abc", 64).len(), 64);
    }

    #[test]
    fn hashes_renames_and_records() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("materials.zip"), b"materials v1").unwrap();
        fs::write(dir.join("cooking.zip"), b"cooking v1").unwrap();

        let report = publish(&config(dir)).unwrap();
        let materials = format!("materials-{}.zip", content_digest(b"materials v1", 8));
        let cooking = format!("cooking-{}.zip", content_digest(b"cooking v1", 8));

        assert_eq!(
            report.manifest.get(&IconCategory::new("materials")),
            Some(materials.as_str())
        );
        assert_eq!(report.renamed.len(), 2);
        assert_eq!(report.missing, vec![IconCategory::new("tailoring")]);
        assert_eq!(names_on_disk(dir), {
            let mut v = vec![cooking, materials];
            v.sort();
            v
        });
        assert_eq!(
            Manifest::load(&dir.join("manifest.json")).unwrap(),
            report.manifest
        );
    }

    #[test]
    fn second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("materials.zip"), b"materials v1").unwrap();
        fs::write(dir.join("cooking.zip"), b"cooking v1").unwrap();

        let first = publish(&config(dir)).unwrap();
        let on_disk = names_on_disk(dir);
        let manifest_text = fs::read_to_string(dir.join("manifest.json")).unwrap();

        let second = publish(&config(dir)).unwrap();
        assert_eq!(second.manifest, first.manifest);
        assert!(second.renamed.is_empty());
        assert!(second.removed.is_empty());
        assert_eq!(second.kept.len(), 2);
        assert_eq!(names_on_disk(dir), on_disk);
        assert_eq!(
            fs::read_to_string(dir.join("manifest.json")).unwrap(),
            manifest_text
        );
    }

    #[test]
    fn stale_hashed_archives_are_collected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("materials.zip"), b"materials v1").unwrap();
        publish(&config(dir)).unwrap();
        let old = format!("materials-{}.zip", content_digest(b"materials v1", 8));

        // A new build of the same category, plus an archive for something we don't publish.
        fs::write(dir.join("materials.zip"), b"materials v2").unwrap();
        fs::write(dir.join("unknown-deadbeef.zip"), b"junk").unwrap();
        let report = publish(&config(dir)).unwrap();
        let new = format!("materials-{}.zip", content_digest(b"materials v2", 8));

        assert_eq!(
            report.manifest.get(&IconCategory::new("materials")),
            Some(new.as_str())
        );
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec![old, "unknown-deadbeef.zip".to_string()]);
        assert_eq!(names_on_disk(dir), vec![new]);
        assert_eq!(
            report.manifest.file_names().collect::<Vec<_>>(),
            names_on_disk(dir)
        );
    }

    #[test]
    fn hashed_name_pattern_is_exact() {
        let pattern = hashed_pattern(&IconCategory::new("materials"), 8).unwrap();
        assert!(pattern.is_match("materials-0123abcd.zip"));
        assert!(!pattern.is_match("materials-0123abcd0.zip"));
        assert!(!pattern.is_match("materials-0123ABCD.zip"));
        assert!(!pattern.is_match("rawmaterials-0123abcd.zip"));
    }

    #[test]
    fn rejects_bad_digest_length() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.digest_len = 0;
        assert!(matches!(
            publish(&cfg),
            Err(PublishError::InvalidDigestLength(0))
        ));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(&tmp.path().join("does-not-exist"));
        assert!(matches!(publish(&cfg), Err(PublishError::Io { .. })));
    }
}
