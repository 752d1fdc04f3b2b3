//! The seams between the cache and the outside world.
//!
//! - An [ArchiveFetcher] gets the raw bytes of a category's archive from wherever bundles are served.
//! - An [ArchiveStore] keeps those bytes across sessions so that repeat visits skip the network.
//! - A [HandleAllocator] turns extracted icon bytes into something displayable.
//!
//! The loader caches the parsed archive; the icon cache caches the handles.
use std::io::Error as IoError;

use crate::*;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no archive endpoint is known for category {0}")]
    NoEndpoint(IconCategory),
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request for {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistent storage is unavailable")]
    Unavailable,
    #[error("invalid store key {0:?}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Retrieve the archive for a category.
#[async_trait::async_trait]
pub trait ArchiveFetcher: Send + Sync + 'static {
    async fn fetch(&self, category: &IconCategory) -> Result<Vec<u8>, FetchError>;
}

/// A local, asynchronous key-value store of whole archives, keyed by category.
///
/// Entries never expire on their own.  Implementations must make `put` all-or-nothing: a reader never observes half an
/// archive.
#[async_trait::async_trait]
pub trait ArchiveStore: Send + Sync + 'static {
    /// Return the stored archive, or `None` if there isn't one.
    async fn get(&self, category: &IconCategory) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, category: &IconCategory, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remove an archive.  Removing something absent is not an error.
    async fn remove(&self, category: &IconCategory) -> Result<(), StoreError>;
}

/// Allocates [DisplayHandle]s for extracted icon bytes.
pub trait HandleAllocator: Send + Sync + 'static {
    fn allocate(&self, key: &IconAssetKey, bytes: Vec<u8>) -> DisplayHandle;

    /// Called when the cache lets go of a handle it allocated.  The default never revokes anything.
    fn revoke(&self, _handle: &DisplayHandle) {}
}
