/// Content hashing with a persistent, path-keyed digest cache
pub mod cache;
pub mod lock;

pub use cache::{sha256_file, CacheStats, ModelCacheEntry, ModelHashCache};
