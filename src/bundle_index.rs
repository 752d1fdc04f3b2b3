//! A [BundleIndex] is one category archive, parsed once.
//!
//! Parsing only reads the zip central directory.  Entries stay compressed in the archive buffer until someone asks for
//! one by name, at which point that single entry is decompressed.
use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::*;

type EntrySet = HashSet<String, ahash::RandomState>;

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("archive for {category} is corrupt: {source}")]
    Corrupt {
        category: IconCategory,
        #[source]
        source: ZipError,
    },
    #[error("failed to extract {entry} from the {category} archive: {source}")]
    Extract {
        category: IconCategory,
        entry: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct BundleIndex {
    category: IconCategory,
    archive_size: usize,
    names: EntrySet,
    /// Reading an entry needs `&mut`; the archive itself never changes after parse.
    archive: Mutex<ZipArchive<Cursor<Arc<[u8]>>>>,
}

impl BundleIndex {
    /// Parse an archive's directory.  Fails if the bytes aren't a readable zip.
    pub fn parse(category: IconCategory, bytes: Vec<u8>) -> Result<BundleIndex, BundleError> {
        let archive_size = bytes.len();
        let buffer: Arc<[u8]> = Arc::from(bytes);
        let archive =
            ZipArchive::new(Cursor::new(buffer)).map_err(|source| BundleError::Corrupt {
                category: category.clone(),
                source,
            })?;
        let names = archive
            .file_names()
            .filter(|n| !n.ends_with('/'))
            .map(str::to_string)
            .collect();

        Ok(BundleIndex {
            category,
            archive_size,
            names,
            archive: Mutex::new(archive),
        })
    }

    pub fn category(&self) -> &IconCategory {
        &self.category
    }

    /// Size of the compressed archive in bytes.
    pub fn archive_size(&self) -> usize {
        self.archive_size
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, entry_name: &str) -> bool {
        self.names.contains(entry_name)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Decompress one entry.  `Ok(None)` means the archive has no such entry, which is not an error.
    pub fn get(&self, entry_name: &str) -> Result<Option<Vec<u8>>, BundleError> {
        if !self.contains(entry_name) {
            return Ok(None);
        }

        let mut archive = self.archive.lock().unwrap();
        let mut file = match archive.by_name(entry_name) {
            Ok(f) => f,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(source) => {
                return Err(BundleError::Corrupt {
                    category: self.category.clone(),
                    source,
                })
            }
        };

        let mut out = Vec::with_capacity(file.size() as usize);
        // The zip reader checks the CRC once the entry is fully read, so a damaged entry surfaces here.
        file.read_to_end(&mut out)
            .map_err(|source| BundleError::Extract {
                category: self.category.clone(),
                entry: entry_name.to_string(),
                source,
            })?;
        Ok(Some(out))
    }

    /// Convenience for [BundleIndex::get] keyed by icon id.
    pub fn get_icon(&self, id: u64) -> Result<Option<Vec<u8>>, BundleError> {
        self.get(&entry_name(id))
    }
}

impl fmt::Debug for BundleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleIndex")
            .field("category", &self.category)
            .field("archive_size", &self.archive_size)
            .field("entries", &self.names.len())
            .finish()
    }
}
