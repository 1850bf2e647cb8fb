//! # Range Batch Cache
//!
//! A concurrent, in-memory cache over composite keys with:
//! - **Two-dimensional keys**: a coarse range (days, buckets, pages) crossed with a set
//!   of per-entity outer keys
//! - **Batched loading**: misses are regrouped into narrowed, range-shaped batches and
//!   handed to the loader in a single call
//! - **Streaming writes**: loaders return a lazy sequence of entries, each cached as soon
//!   as it is produced
//! - **Load coalescing**: at most one running load per composite key; overlapping callers
//!   wait and share the outcome
//! - **Write-once entries** with pluggable, size-bounded eviction
//!
//! ## Quick Start
//!
//! ```rust
//! use std::ops::RangeInclusive;
//!
//! use range_batch_cache::{BatchCache, CacheError, CoarseRequest, CompositeKey, MissBatch, loader_fn};
//!
//! // Prices per product (outer key) and day (range element).
//! let loader = loader_fn(|currency: &String, batches: &[MissBatch<RangeInclusive<u32>, u64>]| {
//!     let mut entries = Vec::new();
//!     for batch in batches {
//!         for key in batch.composite_keys()? {
//!             let price = format!("{} {}", key.outer * 100 + u64::from(key.element), currency);
//!             entries.push(Ok::<_, CacheError>((key, price)));
//!         }
//!     }
//!     Ok::<_, CacheError>(entries)
//! });
//!
//! let cache = BatchCache::builder(loader, String::new()).build();
//!
//! // Days 0..=1 for products 1 and 2: one loader call for four slots.
//! let eur = String::from("EUR");
//! let prices = cache.resolve_one(&eur, CoarseRequest::new(0..=1, [1, 2])).unwrap();
//! assert_eq!(prices.get(&CompositeKey::new(2, 1)).map(String::as_str), Some("201 EUR"));
//!
//! // Served from the cache.
//! let again = cache.resolve_one(&eur, CoarseRequest::new(1..=1, [2])).unwrap();
//! assert_eq!(again.len(), 1);
//! ```
//!
//! ## Thread Safety
//!
//! [`BatchCache`] is `Send + Sync` and can be shared across threads via `Arc`. Calls
//! block while waiting on loads owned by other callers, so async code should go
//! through `spawn_blocking`:
//!
//! ```rust,ignore
//! let cache = Arc::new(cache);
//! let prices = tokio::task::spawn_blocking(move || {
//!     cache.resolve_one(&tenant, CoarseRequest::new(days, product_ids))
//! })
//! .await??;
//! ```

mod adapter;
mod assembler;
mod builder;
mod cache;
mod coalescer;
mod error;
mod eviction;
mod key;
#[cfg(feature = "metrics")]
mod metrics;
mod resolver;
mod shard;
mod store;
mod traits;

pub use assembler::Resolved;
pub use builder::CacheBuilder;
pub use cache::BatchCache;
pub use deepsize::DeepSizeOf;
pub use error::{CacheError, LoaderError, LoaderPanicked, Result};
pub use eviction::{EvictionPolicy, SizeBounded, Unbounded};
pub use key::{CoarseRequest, CompositeKey, MissBatch};
#[cfg(feature = "metrics")]
pub use metrics::CacheMetrics;
pub use store::CacheStore;
pub use traits::{BatchLoader, FnLoader, FnPotentialKeys, PotentialKeys, RangeKey, loader_fn, potential_keys_fn};
