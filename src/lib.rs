//! Icon bundles: many small images per category, shipped as one archive and served from a local cache.
//!
//! Loading hundreds of tiny icons one request at a time is slow.  This crate packs each category's icons into a single
//! zip, publishes it under a content-hashed name, and at run time turns `(category, id)` into a displayable handle
//! while fetching each archive at most once.
//!
//! The offline half:
//!
//! - [build_bundles] writes `{category}.zip` with one `{id}.jpg` entry per icon.
//! - [publish] renames each archive to `{category}-{digest}.zip`, writes a [Manifest], and deletes stale archives.
//!   Running it again over its own output changes nothing.
//!
//! The run-time half:
//!
//! - [BundleLoader] gets a category's archive from an [ArchiveStore] or, failing that, an [ArchiveFetcher], parses it
//!   into a [BundleIndex] once, and shares a single load between concurrent callers.
//! - [IconCache] extracts single entries on first use, allocates [DisplayHandle]s through a [HandleAllocator], and
//!   keeps them according to a [HandleRetention].  It never fails: unknown categories, missing icons and unreachable
//!   bundles come back as distinct [IconResolution]s, the last carrying [fallback_url].
//!
//! To use the run-time half, pick a fetcher (usually [HttpFetcher]) and a store ([FilesystemStore], [MemoryStore] or
//! [UnavailableStore]), wrap them in a [BundleLoader], then construct an [IconCache] with your [IconCacheConfig].
mod atomic_file;
mod builder;
mod bundle_index;
mod bundle_loader;
mod category;
mod cost_based_lru;
mod fetcher;
mod filesystem_store;
mod handle;
mod icon_cache;
mod manifest;
mod memory_store;
mod publisher;
mod settings;
mod traits;

pub use builder::*;
pub use bundle_index::*;
pub use bundle_loader::*;
pub use category::*;
pub use cost_based_lru::*;
pub use fetcher::*;
pub use filesystem_store::*;
pub use handle::*;
pub use icon_cache::*;
pub use manifest::*;
pub use memory_store::*;
pub use publisher::*;
pub use settings::*;
pub use traits::*;
