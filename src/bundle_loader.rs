//! The [BundleLoader] turns a category into a parsed [BundleIndex], at most once per session.
//!
//! Loading goes: in-memory index, then any load already in flight, then the persistent store, then the network.  Bytes
//! fetched from the network are written back to the store before parsing.  Parsed indexes are kept for the life of the
//! loader.
//!
//! Concurrent callers for the same category share one load and observe the identical outcome, failure included.  A
//! failed load is forgotten so that a later call may retry.  When a tokio runtime is available the load runs on its
//! own task, so callers that give up waiting don't stop it.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::*;

type CategoryMap<V> = HashMap<IconCategory, V, ahash::RandomState>;

/// Outcome of a load.  Errors are behind `Arc` because every waiter gets the same one.
pub type LoadResult = Result<Arc<BundleIndex>, Arc<LoadError>>;

type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to fetch archive: {0}")]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("load task for {category} did not finish: {reason}")]
    Interrupted {
        category: IconCategory,
        reason: String,
    },
}

#[derive(Default)]
struct LoaderState {
    indexes: CategoryMap<Arc<BundleIndex>>,
    in_flight: CategoryMap<SharedLoad>,
}

struct LoaderInner<F, S> {
    fetcher: F,
    store: S,
    state: Mutex<LoaderState>,
}

pub struct BundleLoader<F: ArchiveFetcher, S: ArchiveStore> {
    inner: Arc<LoaderInner<F, S>>,
}

impl<F: ArchiveFetcher, S: ArchiveStore> Clone for BundleLoader<F, S> {
    fn clone(&self) -> Self {
        BundleLoader {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ArchiveFetcher, S: ArchiveStore> LoaderInner<F, S> {
    /// Read through the store and the network.  Touches no in-memory state.
    async fn load_uncached(&self, category: &IconCategory) -> Result<BundleIndex, LoadError> {
        match self.store.get(category).await {
            Ok(Some(bytes)) => match BundleIndex::parse(category.clone(), bytes) {
                Ok(index) => {
                    debug!("Loaded {} from the archive store", category);
                    return Ok(index);
                }
                Err(e) => {
                    warn!("Stored archive for {} is unreadable, refetching: {}", category, e);
                    if let Err(e) = self.store.remove(category).await {
                        debug!("Couldn't drop stored archive for {}: {}", category, e);
                    }
                }
            },
            Ok(None) => debug!("Archive store has nothing for {}", category),
            Err(StoreError::Unavailable) => {}
            Err(e) => warn!("Archive store read for {} failed: {}", category, e),
        }

        let bytes = self.fetcher.fetch(category).await?;
        match self.store.put(category, &bytes).await {
            Ok(()) | Err(StoreError::Unavailable) => {}
            Err(e) => warn!("Couldn't persist archive for {}: {}", category, e),
        }

        match BundleIndex::parse(category.clone(), bytes) {
            Ok(index) => {
                debug!("Loaded {} from the network ({} entries)", category, index.len());
                Ok(index)
            }
            Err(e) => {
                // Don't leave a corrupt archive behind for the next session.
                if let Err(e) = self.store.remove(category).await {
                    debug!("Couldn't drop fetched archive for {}: {}", category, e);
                }
                Err(e.into())
            }
        }
    }

    /// Run a load, then publish its outcome and clear the in-flight marker.
    async fn load_and_record(self: Arc<Self>, category: IconCategory) -> LoadResult {
        let result = self
            .load_uncached(&category)
            .await
            .map(Arc::new)
            .map_err(Arc::new);
        self.record(&category, &result);
        result
    }

    fn record(&self, category: &IconCategory, result: &LoadResult) {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(category);
        match result {
            Ok(index) => {
                state.indexes.insert(category.clone(), index.clone());
            }
            Err(e) => warn!("Loading archive for {} failed: {}", category, e),
        }
    }
}

impl<F: ArchiveFetcher, S: ArchiveStore> BundleLoader<F, S> {
    pub fn new(fetcher: F, store: S) -> BundleLoader<F, S> {
        BundleLoader {
            inner: Arc::new(LoaderInner {
                fetcher,
                store,
                state: Mutex::new(Default::default()),
            }),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// The parsed index for a category, if it has already loaded.
    pub fn cached(&self, category: &IconCategory) -> Option<Arc<BundleIndex>> {
        self.inner.state.lock().unwrap().indexes.get(category).cloned()
    }

    pub fn is_loading(&self, category: &IconCategory) -> bool {
        self.inner
            .state
            .lock()
            .unwrap()
            .in_flight
            .contains_key(category)
    }

    /// Forget a parsed index so the next request loads it again.  Loads in flight are unaffected.
    pub fn evict(&self, category: &IconCategory) -> Option<Arc<BundleIndex>> {
        self.inner.state.lock().unwrap().indexes.remove(category)
    }

    /// Start a load, off the current runtime's executor when there is one.
    fn start_load(&self, category: &IconCategory) -> SharedLoad {
        let work = self.inner.clone().load_and_record(category.clone());
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return work.boxed().shared();
        };

        let task = runtime.spawn(work);
        let inner = self.inner.clone();
        let category = category.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    // The task never got to record anything; do it here so the category can be retried.
                    let result = Err(Arc::new(LoadError::Interrupted {
                        category: category.clone(),
                        reason: join_error.to_string(),
                    }));
                    inner.record(&category, &result);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Get the parsed archive for a category, loading it if needed.
    pub async fn load_archive(&self, category: &IconCategory) -> LoadResult {
        let pending = {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(index) = state.indexes.get(category) {
                return Ok(index.clone());
            }

            match state.in_flight.get(category) {
                Some(pending) => {
                    debug!("Joining in-flight load of {}", category);
                    pending.clone()
                }
                None => {
                    // Inserted while still holding the lock: the load can't record its result before this lands.
                    let pending = self.start_load(category);
                    state.in_flight.insert(category.clone(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Best-effort background warm-up.  Failures are dropped; nothing happens without a tokio runtime.
    pub fn preload<'a>(&self, categories: impl IntoIterator<Item = &'a IconCategory>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(r) => r,
            Err(_) => {
                debug!("No runtime to preload archives on");
                return;
            }
        };

        for category in categories {
            let loader = self.clone();
            let category = category.clone();
            runtime.spawn(async move {
                let _ = loader.load_archive(&category).await;
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::sync::Semaphore;

    /// A fetcher serving fixed archives and counting how often it's asked.  It always suspends at least once, and can
    /// be held closed until the test releases it.
    pub(crate) struct CountingFetcher {
        archives: Mutex<HashMap<String, Vec<u8>>>,
        pub(crate) calls: AtomicUsize,
        gate: Option<Semaphore>,
    }

    impl CountingFetcher {
        pub(crate) fn new() -> CountingFetcher {
            CountingFetcher {
                archives: Mutex::new(Default::default()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        pub(crate) fn gated() -> CountingFetcher {
            CountingFetcher {
                gate: Some(Semaphore::new(0)),
                ..CountingFetcher::new()
            }
        }

        pub(crate) fn with(self, category: &str, bytes: Vec<u8>) -> CountingFetcher {
            self.archives
                .lock()
                .unwrap()
                .insert(category.to_string(), bytes);
            self
        }

        pub(crate) fn open_gate(&self) {
            if let Some(g) = &self.gate {
                g.add_permits(1000);
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ArchiveFetcher for CountingFetcher {
        async fn fetch(&self, category: &IconCategory) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if let Some(g) = &self.gate {
                g.acquire().await.unwrap().forget();
            }
            self.archives
                .lock()
                .unwrap()
                .get(category.as_str())
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: format!("/bundles/{}.zip", category),
                    status: 404,
                })
        }
    }

    pub(crate) fn materials() -> IconCategory {
        IconCategory::new("materials")
    }

    pub(crate) fn materials_archive() -> Vec<u8> {
        archive_bytes(
            vec![(42, b"forty-two".to_vec()), (7, b"seven".to_vec())],
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn concurrent_loads_fetch_once() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            MemoryStore::new(),
        );

        let category = materials();
        let results = join_all((0..8).map(|_| loader.load_archive(&category))).await;
        assert_eq!(loader.fetcher().calls(), 1);

        let first = results[0].as_ref().unwrap();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap()));
        }

        // Fast path from now on.
        let again = loader.load_archive(&materials()).await.unwrap();
        assert!(Arc::ptr_eq(first, &again));
        assert_eq!(loader.fetcher().calls(), 1);
        assert!(!loader.is_loading(&materials()));
    }

    #[tokio::test]
    async fn fetched_archive_is_persisted() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            MemoryStore::new(),
        );
        loader.load_archive(&materials()).await.unwrap();
        assert_eq!(
            loader.store().get(&materials()).await.unwrap().unwrap(),
            materials_archive()
        );
    }

    #[tokio::test]
    async fn stored_archive_skips_the_network() {
        let store = MemoryStore::new();
        store.put(&materials(), &materials_archive()).await.unwrap();
        let loader = BundleLoader::new(CountingFetcher::new(), store);

        let index = loader.load_archive(&materials()).await.unwrap();
        assert_eq!(index.get("42.jpg").unwrap().unwrap(), b"forty-two");
        assert_eq!(loader.fetcher().calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_falls_back_to_network() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            UnavailableStore,
        );
        let index = loader.load_archive(&materials()).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(loader.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn corrupt_stored_archive_is_replaced() {
        let store = MemoryStore::new();
        store.put(&materials(), b"garbage").await.unwrap();
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            store,
        );

        loader.load_archive(&materials()).await.unwrap();
        assert_eq!(loader.fetcher().calls(), 1);
        assert_eq!(
            loader.store().get(&materials()).await.unwrap().unwrap(),
            materials_archive()
        );
    }

    #[tokio::test]
    async fn corrupt_network_archive_fails_and_is_not_kept() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", b"garbage".to_vec()),
            MemoryStore::new(),
        );
        let err = loader.load_archive(&materials()).await.unwrap_err();
        assert!(matches!(&*err, LoadError::Bundle(_)));
        assert!(loader.store().is_empty());
        assert!(loader.cached(&materials()).is_none());
    }

    #[tokio::test]
    async fn concurrent_failures_share_one_error_and_allow_retry() {
        let loader = BundleLoader::new(CountingFetcher::new(), MemoryStore::new());

        let category = materials();
        let results = join_all((0..4).map(|_| loader.load_archive(&category))).await;
        assert_eq!(loader.fetcher().calls(), 1);
        let first = results[0].as_ref().unwrap_err();
        for r in &results {
            assert!(Arc::ptr_eq(first, r.as_ref().unwrap_err()));
        }
        assert!(matches!(
            &**first,
            LoadError::Fetch(FetchError::Status { status: 404, .. })
        ));
        assert!(loader.cached(&materials()).is_none());
        assert!(!loader.is_loading(&materials()));

        // The failure isn't remembered.
        assert!(loader.load_archive(&materials()).await.is_err());
        assert_eq!(loader.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn categories_load_independently() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            MemoryStore::new(),
        );
        let materials = materials();
        let cooking = IconCategory::new("cooking");
        let (a, b) = futures::join!(
            loader.load_archive(&materials),
            loader.load_archive(&cooking)
        );
        assert!(a.is_ok());
        assert!(b.is_err());
        assert_eq!(loader.fetcher().calls(), 2);
    }

    #[tokio::test]
    async fn abandoned_load_still_completes() {
        let loader = BundleLoader::new(
            CountingFetcher::gated().with("materials", materials_archive()),
            MemoryStore::new(),
        );

        let attempt =
            tokio::time::timeout(Duration::from_millis(20), loader.load_archive(&materials()))
                .await;
        assert!(attempt.is_err());
        assert!(loader.is_loading(&materials()));

        loader.fetcher().open_gate();
        tokio::time::timeout(Duration::from_secs(5), async {
            while loader.cached(&materials()).is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("Load should finish without anyone waiting on it");
        assert_eq!(loader.fetcher().calls(), 1);
    }

    #[tokio::test]
    async fn preload_shares_the_load() {
        let loader = BundleLoader::new(
            CountingFetcher::new().with("materials", materials_archive()),
            MemoryStore::new(),
        );
        let cooking = IconCategory::new("cooking");
        loader.preload([&materials(), &cooking]);
        loader.load_archive(&materials()).await.unwrap();

        // Let the failing cooking preload run to completion, then check nothing doubled up.
        tokio::time::timeout(Duration::from_secs(5), async {
            while loader.fetcher().calls() < 2 || loader.is_loading(&cooking) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("Preloads should settle");
        assert_eq!(loader.fetcher().calls(), 2);
        assert!(loader.cached(&materials()).is_some());
        assert!(loader.cached(&cooking).is_none());
    }
}
