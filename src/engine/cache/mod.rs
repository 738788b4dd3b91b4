// SPDX-License-Identifier: MIT

//! Tool-result caching
//!
//! - [`fingerprint`]: deterministic keys over capability + parameters
//! - [`store`]: key-value backends (memory, SQLite)
//! - [`layer`]: the memoizing [`ToolCache`] with in-flight deduplication

pub mod fingerprint;
pub mod layer;
pub mod store;

pub use fingerprint::Fingerprint;
pub use layer::{CacheStats, ToolCache};
pub use store::{CacheEntry, CacheStore, MemoryCacheStore, SqliteCacheStore};
