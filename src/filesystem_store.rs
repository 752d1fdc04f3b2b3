use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::*;

/// Version of the on-disk layout.  Opening a store written under any other version wipes it.
pub const STORE_SCHEMA_VERSION: u32 = 1;

const VERSION_FILE: &str = "VERSION";
const ARCHIVE_PARTITION: &str = "archives";
/// Reserved for caching individual icons; created with the schema but not read or written yet.
const ICON_PARTITION: &str = "icons";

/// An [ArchiveStore] backed by a directory.
///
/// Layout under the root is a `VERSION` file plus one directory per partition.  Each archive is a single file named by
/// its category, written to a temporary name and renamed into place so that readers only ever see complete archives.
///
/// Keys must be a single plain path component; anything that could escape the partition directory is refused.
#[derive(Debug)]
pub struct FilesystemStore {
    root_path: PathBuf,
}

fn conv_key(key: &str) -> Result<relative_path::RelativePathBuf, StoreError> {
    let invalid = || StoreError::InvalidKey(key.to_string());
    let rel = relative_path::RelativePathBuf::from_path(key).map_err(|_| invalid())?;
    let single_plain_component = {
        let mut components = rel.components();
        matches!(
            (components.next(), components.next()),
            (Some(relative_path::Component::Normal(c)), None) if !c.starts_with('.')
        )
    };
    if single_plain_component {
        Ok(rel)
    } else {
        Err(invalid())
    }
}

impl FilesystemStore {
    /// Open (creating if needed) a store rooted at `root_path` with the current schema version.
    pub async fn open(root_path: &Path) -> Result<FilesystemStore, StoreError> {
        Self::open_with_version(root_path, STORE_SCHEMA_VERSION).await
    }

    /// Open a store, dropping and recreating every partition if the recorded schema version isn't `version`.
    pub async fn open_with_version(
        root_path: &Path,
        version: u32,
    ) -> Result<FilesystemStore, StoreError> {
        fs::create_dir_all(root_path).await?;
        let store = FilesystemStore {
            root_path: root_path.to_path_buf(),
        };

        let recorded = match fs::read_to_string(store.root_path.join(VERSION_FILE)).await {
            Ok(s) => s.trim().parse::<u32>().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if recorded != Some(version) {
            info!(
                "Archive store at {} is at schema {:?}, wanted {}; recreating",
                store.root_path.display(),
                recorded,
                version
            );
            for partition in [ARCHIVE_PARTITION, ICON_PARTITION] {
                match fs::remove_dir_all(store.root_path.join(partition)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        for partition in [ARCHIVE_PARTITION, ICON_PARTITION] {
            fs::create_dir_all(store.root_path.join(partition)).await?;
        }
        if recorded != Some(version) {
            fs::write(store.root_path.join(VERSION_FILE), version.to_string()).await?;
        }

        Ok(store)
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn archive_path(&self, category: &IconCategory) -> Result<PathBuf, StoreError> {
        let rel = conv_key(category.as_str())?;
        Ok(rel.to_logical_path(self.root_path.join(ARCHIVE_PARTITION)))
    }
}

#[async_trait::async_trait]
impl ArchiveStore for FilesystemStore {
    async fn get(&self, category: &IconCategory) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.archive_path(category)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, category: &IconCategory, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.archive_path(category)?;
        let tmp = path.with_file_name(format!(".{}.tmp", category));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Stored {} bytes for {}", bytes.len(), category);
        Ok(())
    }

    async fn remove(&self, category: &IconCategory) -> Result<(), StoreError> {
        let path = self.archive_path(category)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
