//! Generation-tagged response caches.
//!
//! Three logically separate caches partitioned by content class (static shell
//! assets, backend API responses, CDN fonts), each independently clearable and
//! tagged with a deployment generation so activation can evict every
//! previous-generation entry atomically.

mod name;
mod response;
mod storage;

pub use name::{CacheComponent, CacheName, CacheSet};
pub use response::CachedResponse;
pub use storage::{ResponseCache, SqliteResponseCache};
