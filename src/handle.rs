//! Display handles: in-session locators for extracted icon bytes.
//!
//! A handle is never persisted.  Anything holding one can always get an equivalent back by asking the cache again, or
//! fall back to [fallback_url].
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::*;

struct HandleInner {
    locator: String,
    key: IconAssetKey,
    content_type: &'static str,
    bytes: Arc<[u8]>,
}

/// A cheap-to-clone reference to one decoded icon.  Two handles are equal when they are the same allocation.
#[derive(Clone)]
pub struct DisplayHandle(Arc<HandleInner>);

impl DisplayHandle {
    pub fn new(locator: impl Into<String>, key: IconAssetKey, bytes: Vec<u8>) -> DisplayHandle {
        let content_type = content_type_for(&key.entry_name());
        DisplayHandle(Arc::new(HandleInner {
            locator: locator.into(),
            key,
            content_type,
            bytes: Arc::from(bytes),
        }))
    }

    /// What a renderer points at, e.g. an object URL.
    pub fn locator(&self) -> &str {
        &self.0.locator
    }

    pub fn key(&self) -> &IconAssetKey {
        &self.0.key
    }

    pub fn content_type(&self) -> &'static str {
        self.0.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }
}

impl PartialEq for DisplayHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for DisplayHandle {}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("locator", &self.0.locator)
            .field("content_type", &self.0.content_type)
            .field("len", &self.0.bytes.len())
            .finish()
    }
}

/// MIME type from a file name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Hands out `blob:` style locators that are unique within the process.
#[derive(Debug, Default)]
pub struct BlobAllocator {
    next: AtomicU64,
    live: AtomicUsize,
}

impl BlobAllocator {
    pub fn new() -> BlobAllocator {
        Default::default()
    }

    /// Handles allocated and not yet revoked.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl HandleAllocator for BlobAllocator {
    fn allocate(&self, key: &IconAssetKey, bytes: Vec<u8>) -> DisplayHandle {
        let serial = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.fetch_add(1, Ordering::Relaxed);
        DisplayHandle::new(
            format!("blob:icons/{}/{}#{}", key.category, key.id, serial),
            key.clone(),
            bytes,
        )
    }

    fn revoke(&self, _handle: &DisplayHandle) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// How long the icon cache keeps handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandleRetention {
    /// Keep every handle until the cache is dropped or explicitly disposed.  Nothing is ever revoked implicitly.
    #[default]
    Session,
    /// Keep handles up to a total byte size, revoking the least recently used past that.  A single icon larger than
    /// the whole budget is held outside it, one handle per icon, until released or disposed.
    Bounded { max_bytes: u64 },
}
