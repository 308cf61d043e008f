//! Fast cache adapters.
//!
//! - `InMemoryCache` - Process-local cache with fault injection and stats
//! - `RedisCache` - Shared cache for multi-node deployments
//!
//! `ports::NoopCache` covers deployments that run without a cache.

mod in_memory;
mod redis;

pub use self::in_memory::{CacheStats, InMemoryCache};
pub use self::redis::RedisCache;
