//! quizforge-store — File-backed collaborators for the quizforge core.
//!
//! [`JsonFileStore`] is the durable tier and [`FileCache`] the volatile tier.
//! Both live under a single data directory, see [`open`].

mod fs;

pub mod file_cache;
pub mod json_store;

use std::path::Path;

pub use file_cache::FileCache;
pub use json_store::JsonFileStore;

/// Open the durable store and the cache rooted at `data_dir`.
pub fn open(data_dir: &Path) -> (JsonFileStore, FileCache) {
    (
        JsonFileStore::new(data_dir.join("store")),
        FileCache::new(data_dir.join("cache")),
    )
}
