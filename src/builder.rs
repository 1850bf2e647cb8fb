use std::fmt::Debug;
use std::hash::Hash;

use deepsize::DeepSizeOf;

use crate::cache::BatchCache;
use crate::eviction::{EvictionPolicy, Unbounded};
use crate::key::CompositeKey;
use crate::store::{CacheStore, DEFAULT_SHARD_COUNT};
use crate::traits::{BatchLoader, PotentialKeys, RangeKey};

type Key<R, K> = CompositeKey<K, <R as RangeKey>::Element>;

/// Builder for configuring a [`BatchCache`].
///
/// # Example
///
/// ```ignore
/// use range_batch_cache::{BatchCache, SizeBounded, potential_keys_fn};
///
/// let cache = BatchCache::builder(loader, Price::default())
///     .shards(32)
///     .eviction(SizeBounded::new(64 * 1024 * 1024)) // 64 MB
///     .potential_keys(potential_keys_fn(|tenant: &Tenant| tenant.product_ids()))
///     .build();
/// ```
pub struct CacheBuilder<C, R: RangeKey, K, V, L> {
	loader: L,
	default: V,
	shard_count: Option<usize>,
	eviction: Box<dyn EvictionPolicy<Key<R, K>>>,
	potential_keys: Option<Box<dyn PotentialKeys<C, K>>>,
}

impl<C, R, K, V, L> CacheBuilder<C, R, K, V, L>
where
	R: RangeKey,
	K: Clone + Hash + Ord + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
	L: BatchLoader<C, R, K, V>,
{
	/// Create a builder around `loader`, resolving unloaded keys to `default`.
	pub fn new(loader: L, default: V) -> Self {
		Self {
			loader,
			default,
			shard_count: None,
			eviction: Box::new(Unbounded),
			potential_keys: None,
		}
	}

	/// Set the number of shards.
	///
	/// More shards reduce contention on the store.
	/// Will be rounded up to the next power of 2.
	///
	/// Default: 16 shards
	pub fn shards(mut self, count: usize) -> Self {
		assert!(count > 0, "shard count must be positive");
		self.shard_count = Some(count);
		self
	}

	/// Set the eviction policy.
	///
	/// Size budgets are split evenly across shards.
	///
	/// Default: [`Unbounded`]
	pub fn eviction(mut self, policy: impl EvictionPolicy<Key<R, K>> + 'static) -> Self {
		self.eviction = Box::new(policy);
		self
	}

	/// Enumerate the outer keyspace, enabling
	/// [`prewarm`](BatchCache::prewarm) and [`missing_keys`](BatchCache::missing_keys).
	pub fn potential_keys(mut self, provider: impl PotentialKeys<C, K> + 'static) -> Self {
		self.potential_keys = Some(Box::new(provider));
		self
	}

	/// Build the cache with the configured settings.
	pub fn build(self) -> BatchCache<C, R, K, V, L> {
		let shard_count = self.shard_count.unwrap_or(DEFAULT_SHARD_COUNT);
		let store = CacheStore::with_eviction(shard_count, self.eviction.as_ref());
		BatchCache::from_parts(store, self.loader, self.default, self.potential_keys)
	}
}
