use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};

use deepsize::DeepSizeOf;
use hashbrown::HashMap;

use crate::adapter;
use crate::assembler::Resolved;
use crate::builder::CacheBuilder;
use crate::coalescer::{Loaded, LoadCoalescer};
use crate::error::{CacheError, Result};
use crate::key::{CoarseRequest, CompositeKey};
#[cfg(feature = "metrics")]
use crate::metrics::CacheMetrics;
use crate::resolver::Lookup;
use crate::store::{AbsentKeys, CacheStore};
use crate::traits::{BatchLoader, PotentialKeys, RangeKey};

type Key<R, K> = CompositeKey<K, <R as RangeKey>::Element>;

/// Thread-safe batched cache over composite keys. Can be shared across threads via
/// `Arc<BatchCache>`.
///
/// Callers ask for coarse requests (a range and a set of outer keys); the cache
/// answers from resident entries and hands every miss to the loader in narrowed,
/// range-shaped batches. A composite key is loaded by at most one loader call at a
/// time: callers overlapping an in-progress load block until it finishes and share its
/// outcome.
///
/// All methods are synchronous. From async code, call [`resolve`](Self::resolve)
/// through `spawn_blocking`, since it may block on a load owned by another caller.
///
/// # Example
///
/// ```
/// use std::ops::RangeInclusive;
///
/// use range_batch_cache::{BatchCache, CacheError, CoarseRequest, MissBatch, loader_fn};
///
/// let loader = loader_fn(|_: &(), batches: &[MissBatch<RangeInclusive<u32>, u64>]| {
///     let mut entries = Vec::new();
///     for batch in batches {
///         for key in batch.composite_keys()? {
///             if key.outer == 1 {
///                 entries.push(Ok::<_, CacheError>((key, format!("day {}", key.element))));
///             }
///         }
///     }
///     Ok::<_, CacheError>(entries)
/// });
/// let cache = BatchCache::builder(loader, String::from("n/a")).build();
///
/// let resolved = cache.resolve_one(&(), CoarseRequest::new(0..=1, [1, 2])).unwrap();
/// let values: Vec<_> = resolved.iter().map(|(_, v)| v.as_str()).collect();
/// assert_eq!(values, ["day 0", "n/a", "day 1", "n/a"]);
/// ```
pub struct BatchCache<C, R: RangeKey, K, V, L> {
	/// Resident entries
	store: CacheStore<Key<R, K>, V>,
	/// Keys a finished load left out
	absent: AbsentKeys<Key<R, K>>,
	/// Loads currently running, by composite key
	coalescer: LoadCoalescer<Key<R, K>, V>,
	loader: L,
	/// Value reported for keys the loader did not emit
	default: Arc<V>,
	potential_keys: Option<Box<dyn PotentialKeys<C, K>>>,
	#[cfg(feature = "metrics")]
	loads: AtomicU64,
	#[cfg(feature = "metrics")]
	joins: AtomicU64,
}

impl<C, R, K, V, L> BatchCache<C, R, K, V, L>
where
	R: RangeKey,
	K: Clone + Hash + Ord + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
	L: BatchLoader<C, R, K, V>,
{
	/// Start configuring a cache around `loader`.
	///
	/// `default` is returned for every requested key the loader does not emit.
	pub fn builder(loader: L, default: V) -> CacheBuilder<C, R, K, V, L> {
		CacheBuilder::new(loader, default)
	}

	pub(crate) fn from_parts(
		store: CacheStore<Key<R, K>, V>,
		loader: L,
		default: V,
		potential_keys: Option<Box<dyn PotentialKeys<C, K>>>,
	) -> Self {
		Self {
			store,
			absent: AbsentKeys::new(),
			coalescer: LoadCoalescer::new(),
			loader,
			default: Arc::new(default),
			potential_keys,
			#[cfg(feature = "metrics")]
			loads: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			joins: AtomicU64::new(0),
		}
	}

	/// Resolve every composite key denoted by `requests`.
	///
	/// Resident keys are served from the store. Missing keys not already being loaded
	/// are handed to the loader in one call; missing keys another caller is loading are
	/// waited on. The result holds exactly the requested keys in expansion order, with
	/// the default value for keys the loader did not emit. Those keys are remembered and
	/// are not asked for again until [`clear`](Self::clear).
	///
	/// Fails with [`CacheError::InvalidRange`] before touching any state when a range is
	/// malformed, and with the loader's failure when this call's load or any load it
	/// waited on failed. Entries written before a failure stay cached.
	pub fn resolve(&self, context: &C, requests: &[CoarseRequest<R, K>]) -> Result<Resolved<K, R::Element, V>> {
		let lookup = Lookup::resolve(&self.store, &self.absent, requests)?;

		let mut meanwhile = HashMap::new();
		let mut loaded: Vec<Loaded<Key<R, K>, V>> = Vec::new();
		if !lookup.is_complete() {
			let claim = self.coalescer.claim(&self.store, &self.absent, lookup.misses());
			meanwhile.extend(claim.resolved);

			// Run our own load before waiting on anyone else's.
			if let Some(owned) = claim.owned {
				let batches = lookup.regroup(owned.keys());
				tracing::debug!(
					flight = owned.fingerprint(),
					batches = batches.len(),
					keys = owned.keys().len(),
					"starting load"
				);
				#[cfg(feature = "metrics")]
				self.loads.fetch_add(1, Ordering::Relaxed);

				let result = adapter::load_into_store(&self.loader, &self.store, context, &batches, owned.keys())
					.map(Arc::new);
				// Recorded before release so that no later claim owns these keys again.
				if let Ok(values) = &result {
					let left_out = owned.keys().iter().filter(|key| !values.contains_key(*key)).cloned();
					let recorded = self.absent.extend(left_out);
					if recorded > 0 {
						tracing::debug!(
							flight = owned.fingerprint(),
							recorded,
							total = self.absent.len(),
							"recorded keys left out by the loader"
						);
					}
				}
				owned.finish(result.clone());
				loaded.push(result?);
			}

			for flight in claim.joined {
				tracing::debug!(flight = flight.fingerprint(), "waiting on in-flight load");
				#[cfg(feature = "metrics")]
				self.joins.fetch_add(1, Ordering::Relaxed);
				loaded.push(flight.wait()?);
			}
		}

		let (requested, hits) = lookup.into_parts();
		let sources: Vec<&HashMap<Key<R, K>, Arc<V>>> =
			std::iter::once(&meanwhile).chain(loaded.iter().map(Arc::as_ref)).collect();
		Ok(Resolved::assemble(requested, &hits, &sources, &self.default))
	}

	/// Resolve a single coarse request.
	pub fn resolve_one(&self, context: &C, request: CoarseRequest<R, K>) -> Result<Resolved<K, R::Element, V>> {
		self.resolve(context, std::slice::from_ref(&request))
	}

	/// Load every potential outer key over `range` so later requests are served from
	/// the store.
	///
	/// Returns the number of composite keys covered.
	pub fn prewarm(&self, context: &C, range: R) -> Result<usize> {
		let keys = self.potential_keys(context)?;
		let resolved = self.resolve_one(context, CoarseRequest::new(range, keys))?;
		tracing::debug!(keys = resolved.len(), "prewarmed range");
		Ok(resolved.len())
	}

	/// Potential composite keys over `range` that a request would still load: neither
	/// resident nor left out by an earlier load. In expansion order.
	///
	/// Does not trigger any load.
	pub fn missing_keys(&self, context: &C, range: R) -> Result<Vec<Key<R, K>>> {
		let keys = self.potential_keys(context)?;
		let request = CoarseRequest::new(range, keys);
		let missing =
			request.expand()?.filter(|key| !self.store.contains(key) && !self.absent.contains(key)).collect();
		Ok(missing)
	}

	/// The backing store, for inspection or seeding.
	pub fn store(&self) -> &CacheStore<Key<R, K>, V> {
		&self.store
	}

	/// The configured loader.
	pub fn loader(&self) -> &L {
		&self.loader
	}

	/// Drop every resident entry and forget which keys loads left out. Loads already
	/// running still write their results.
	pub fn clear(&self) {
		self.store.clear();
		self.absent.clear();
	}

	/// Snapshot of the cache counters.
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> CacheMetrics {
		let mut metrics = CacheMetrics {
			loads: self.loads.load(Ordering::Relaxed),
			joins: self.joins.load(Ordering::Relaxed),
			..CacheMetrics::default()
		};
		self.store.fill_metrics(&mut metrics);
		metrics
	}

	fn potential_keys(&self, context: &C) -> Result<Vec<K>> {
		let provider = self.potential_keys.as_ref().ok_or(CacheError::NoPotentialKeys)?;
		Ok(provider.potential_keys(context))
	}
}
