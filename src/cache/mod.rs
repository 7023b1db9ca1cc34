//! Process-wide caches.
//!
//! - [`identifiers`]: unbounded type name ⇄ id map.
//! - [`lru`]: bounded, loader-backed LRU cache with optional TTL. Used for
//!   agent id resolution.

pub mod identifiers;
pub mod lru;

pub use identifiers::IdentifierCache;
pub use lru::{CacheLoader, CacheStats, CachedEntry, LruCache};
