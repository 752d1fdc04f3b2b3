//! The [IconCache] is what the rest of an application talks to: give it a category and an icon id, get back something
//! displayable.
//!
//! Resolution works in two levels:
//!
//! - The [BundleLoader] keeps one parsed archive per category.
//! - On the first request for an icon, its single entry is extracted from that archive and turned into a
//!   [DisplayHandle], which is kept according to the configured [HandleRetention].
//!
//! Nothing here surfaces an error to the caller.  An unknown category, an icon missing from its bundle, and a bundle
//! that can't be loaded are all distinct [IconResolution]s, the last of which carries a direct per-icon URL.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::*;

type HandleMap = HashMap<IconAssetKey, DisplayHandle, ahash::RandomState>;

#[derive(Debug, derive_builder::Builder)]
pub struct IconCacheConfig {
    /// The bundled categories.  Anything else resolves to [IconResolution::Unbundled].
    pub categories: IconCategories,
    #[builder(default)]
    pub retention: HandleRetention,
}

/// The outcome of resolving one icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconResolution {
    /// Extracted from the category's bundle.
    Bundled(DisplayHandle),
    /// The bundle loaded fine but has no entry for this icon.
    Absent,
    /// The category isn't bundled; the caller should use its own unbundled path.
    Unbundled,
    /// The bundle couldn't be loaded or read.  Carries the direct per-icon URL to use instead.
    Fallback(String),
}

impl IconResolution {
    pub fn handle(&self) -> Option<&DisplayHandle> {
        match self {
            IconResolution::Bundled(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<DisplayHandle> {
        match self {
            IconResolution::Bundled(h) => Some(h),
            _ => None,
        }
    }

    /// Something a renderer can point at, if there is anything.
    pub fn locator(&self) -> Option<&str> {
        match self {
            IconResolution::Bundled(h) => Some(h.locator()),
            IconResolution::Fallback(url) => Some(url),
            IconResolution::Absent | IconResolution::Unbundled => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Load(Arc<LoadError>),
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

impl From<Arc<LoadError>> for ResolveError {
    fn from(e: Arc<LoadError>) -> Self {
        ResolveError::Load(e)
    }
}

enum RetainedHandles {
    Session(HandleMap),
    Bounded {
        lru: CostBasedLru<IconAssetKey, DisplayHandle>,
        /// Icons larger than the whole budget.  Kept one per key outside the LRU until released or disposed.
        oversized: HandleMap,
    },
}

impl RetainedHandles {
    fn new(retention: HandleRetention) -> RetainedHandles {
        match retention {
            HandleRetention::Session => RetainedHandles::Session(Default::default()),
            HandleRetention::Bounded { max_bytes } => RetainedHandles::Bounded {
                lru: CostBasedLru::new(max_bytes),
                oversized: Default::default(),
            },
        }
    }

    fn get(&mut self, key: &IconAssetKey) -> Option<DisplayHandle> {
        match self {
            RetainedHandles::Session(m) => m.get(key).cloned(),
            RetainedHandles::Bounded { lru, oversized } => lru
                .get(key)
                .cloned()
                .or_else(|| oversized.get(key).cloned()),
        }
    }

    /// Keep `handle` unless an equivalent one got there first.  Returns the handle to hand out, and the ones to revoke.
    fn retain(
        &mut self,
        key: &IconAssetKey,
        handle: DisplayHandle,
    ) -> (DisplayHandle, Vec<DisplayHandle>) {
        if let Some(existing) = self.get(key) {
            return (existing, vec![handle]);
        }

        match self {
            RetainedHandles::Session(m) => {
                m.insert(key.clone(), handle.clone());
                (handle, vec![])
            }
            RetainedHandles::Bounded { lru, oversized } => {
                let cost = handle.len() as u64;
                if cost > lru.max_cost() {
                    oversized.insert(key.clone(), handle.clone());
                    return (handle, vec![]);
                }
                let outcome = lru.insert(key.clone(), handle.clone(), cost);
                let evicted = outcome.evicted.into_iter().map(|(_, h)| h).collect();
                (handle, evicted)
            }
        }
    }

    fn remove(&mut self, key: &IconAssetKey) -> Option<DisplayHandle> {
        match self {
            RetainedHandles::Session(m) => m.remove(key),
            RetainedHandles::Bounded { lru, oversized } => {
                lru.remove(key).or_else(|| oversized.remove(key))
            }
        }
    }

    fn drain(&mut self) -> Vec<DisplayHandle> {
        match self {
            RetainedHandles::Session(m) => m.drain().map(|(_, h)| h).collect(),
            RetainedHandles::Bounded { lru, oversized } => lru
                .drain()
                .into_iter()
                .map(|(_, h)| h)
                .chain(oversized.drain().map(|(_, h)| h))
                .collect(),
        }
    }

    /// Handles counted against the byte budget.
    fn len(&self) -> usize {
        match self {
            RetainedHandles::Session(m) => m.len(),
            RetainedHandles::Bounded { lru, .. } => lru.len(),
        }
    }
}

pub struct IconCache<F: ArchiveFetcher, S: ArchiveStore, A: HandleAllocator = BlobAllocator> {
    categories: IconCategories,
    loader: BundleLoader<F, S>,
    allocator: A,
    handles: Mutex<RetainedHandles>,
}

impl<F: ArchiveFetcher, S: ArchiveStore, A: HandleAllocator> IconCache<F, S, A> {
    pub fn new(loader: BundleLoader<F, S>, allocator: A, config: IconCacheConfig) -> Self {
        IconCache {
            categories: config.categories,
            loader,
            allocator,
            handles: Mutex::new(RetainedHandles::new(config.retention)),
        }
    }

    pub fn categories(&self) -> &IconCategories {
        &self.categories
    }

    pub fn loader(&self) -> &BundleLoader<F, S> {
        &self.loader
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// A handle already in the cache, without loading anything.
    pub fn cached_handle(&self, category: &str, id: u64) -> Option<DisplayHandle> {
        let key = IconAssetKey::new(self.categories.normalize(category)?, id);
        self.handles.lock().unwrap().get(&key)
    }

    /// Number of handles currently retained within the byte budget.  Oversized icons under
    /// [HandleRetention::Bounded] are held outside it and not counted.
    pub fn retained(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    fn revoke_all(&self, handles: Vec<DisplayHandle>) {
        for h in handles {
            self.allocator.revoke(&h);
        }
    }

    /// Resolve an icon, reporting load and extraction failures instead of degrading.
    ///
    /// `Ok(None)` means the archive has no such icon.
    pub async fn try_resolve(
        &self,
        key: &IconAssetKey,
    ) -> Result<Option<DisplayHandle>, ResolveError> {
        let cached = self.handles.lock().unwrap().get(key);
        if cached.is_some() {
            return Ok(cached);
        }

        let index = self.loader.load_archive(&key.category).await?;
        let bytes = match index.get(&key.entry_name())? {
            Some(b) => b,
            None => return Ok(None),
        };

        let handle = self.allocator.allocate(key, bytes);
        let (handle, to_revoke) = self.handles.lock().unwrap().retain(key, handle);
        self.revoke_all(to_revoke);
        debug!("Extracted {} as {}", key, handle.locator());
        Ok(Some(handle))
    }

    /// Resolve an icon to a display handle.
    ///
    /// Never fails: a bundle that can't be loaded degrades to [IconResolution::Fallback] with [fallback_url].
    pub async fn resolve_icon(&self, category: &str, id: u64) -> IconResolution {
        let category = match self.categories.normalize(category) {
            Some(c) => c,
            None => return IconResolution::Unbundled,
        };
        let key = IconAssetKey::new(category, id);

        match self.try_resolve(&key).await {
            Ok(Some(handle)) => IconResolution::Bundled(handle),
            Ok(None) => IconResolution::Absent,
            Err(e) => {
                debug!("Serving {} unbundled: {}", key, e);
                IconResolution::Fallback(key.fallback_url())
            }
        }
    }

    /// Start loading bundles in the background.  Unknown categories are ignored and failures are dropped.
    pub fn preload<I, C>(&self, categories: I)
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        let known = categories
            .into_iter()
            .filter_map(|c| self.categories.normalize(c.as_ref()))
            .collect::<Vec<_>>();
        self.loader.preload(known.iter());
    }

    /// Drop and revoke one handle.  Returns whether there was one.
    pub fn release(&self, category: &str, id: u64) -> bool {
        let key = match self.categories.normalize(category) {
            Some(c) => IconAssetKey::new(c, id),
            None => return false,
        };
        let removed = self.handles.lock().unwrap().remove(&key);
        match removed {
            Some(h) => {
                self.allocator.revoke(&h);
                true
            }
            None => false,
        }
    }

    /// Drop and revoke every retained handle, returning how many there were.  Later requests allocate new ones.
    pub fn dispose(&self) -> usize {
        let drained = self.handles.lock().unwrap().drain();
        let count = drained.len();
        self.revoke_all(drained);
        count
    }
}
