use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use deepsize::DeepSizeOf;
use hashbrown::HashSet;
use parking_lot::RwLock;

use crate::error::{CacheError, Result};
use crate::eviction::{EvictionPolicy, Unbounded};
#[cfg(feature = "metrics")]
use crate::metrics::CacheMetrics;
use crate::shard::{Put, Shard};

/// Default number of shards.
pub(crate) const DEFAULT_SHARD_COUNT: usize = 16;

/// Upper bound on reads waiting to be reported to the eviction policy.
///
/// Reads beyond this are dropped rather than buffered.
const MAX_PENDING_ACCESSES: usize = 4096;

/// Reads reported to the eviction policy per write.
const MAX_ACCESS_DRAIN: usize = 64;

/// Sharded, write-once mapping from key to value.
///
/// Each key is written at most once while resident: rewriting an equal value is a no-op
/// and rewriting a different value fails with [`CacheError::DuplicateKeyConflict`].
/// Values are handed out as `Arc<V>` so readers never clone payloads.
///
/// Eviction is delegated to a pluggable [`EvictionPolicy`]; the default keeps every
/// entry for the life of the store.
pub struct CacheStore<Q, V> {
	/// Sharded storage
	shards: Vec<RwLock<Shard<Q, V>>>,
	/// Reads not yet reported to the eviction policy (lock-free MPMC queue)
	access_buffer: SegQueue<Q>,
	/// Whether the eviction policy wants reads reported at all
	track_access: bool,
	/// Current total size in bytes
	current_size: AtomicUsize,
	/// Total entry count
	entry_count: AtomicUsize,
	/// Number of shards (power of two)
	shard_count: usize,
	hasher: ahash::RandomState,
	#[cfg(feature = "metrics")]
	hits: AtomicU64,
	#[cfg(feature = "metrics")]
	misses: AtomicU64,
	#[cfg(feature = "metrics")]
	inserts: AtomicU64,
	#[cfg(feature = "metrics")]
	evictions: AtomicU64,
}

impl<Q, V> CacheStore<Q, V>
where
	Q: Clone + Hash + Eq + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
{
	/// Create an unbounded store with the default shard count.
	pub fn new() -> Self {
		Self::with_eviction(DEFAULT_SHARD_COUNT, &Unbounded)
	}

	/// Create a store with `shard_count` shards (rounded up to a power of two) and one
	/// instance of `policy` per shard.
	pub fn with_eviction(shard_count: usize, policy: &dyn EvictionPolicy<Q>) -> Self {
		let shard_count = shard_count.max(1).next_power_of_two();
		let shards =
			(0..shard_count).map(|_| RwLock::new(Shard::new(policy.for_shard(shard_count)))).collect();

		Self {
			shards,
			access_buffer: SegQueue::new(),
			track_access: policy.tracks_access(),
			current_size: AtomicUsize::new(0),
			entry_count: AtomicUsize::new(0),
			shard_count,
			hasher: ahash::RandomState::new(),
			#[cfg(feature = "metrics")]
			hits: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			misses: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			inserts: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			evictions: AtomicU64::new(0),
		}
	}

	/// Look up a value.
	pub fn get(&self, key: &Q) -> Option<Arc<V>> {
		let value = {
			let shard = self.get_shard(key).read();
			shard.get(key).map(|entry| Arc::clone(&entry.value))
		};

		#[cfg(feature = "metrics")]
		match value {
			Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
			None => self.misses.fetch_add(1, Ordering::Relaxed),
		};

		if value.is_some() && self.track_access && self.access_buffer.len() < MAX_PENDING_ACCESSES {
			self.access_buffer.push(key.clone());
		}
		value
	}

	/// Look up a value without touching recency or metrics.
	pub(crate) fn peek(&self, key: &Q) -> Option<Arc<V>> {
		self.get_shard(key).read().get(key).map(|entry| Arc::clone(&entry.value))
	}

	/// Check if a key is resident without touching recency or metrics.
	pub fn contains(&self, key: &Q) -> bool {
		self.get_shard(key).read().contains(key)
	}

	/// Write a value, enforcing write-once semantics.
	///
	/// Returns the resident value: the one just written, or an equal one that was
	/// already present. Evicts entries afterwards if the policy requires it.
	pub fn put(&self, key: Q, value: V) -> Result<Arc<V>> {
		let size = std::mem::size_of::<Q>() + value.deep_size_of();

		self.drain_accesses();

		let mut shard = self.get_shard(&key).write();
		let resident = match shard.insert(key.clone(), value, size) {
			Put::Inserted {
				value,
				size,
			} => {
				self.current_size.fetch_add(size, Ordering::Relaxed);
				self.entry_count.fetch_add(1, Ordering::Relaxed);
				#[cfg(feature = "metrics")]
				self.inserts.fetch_add(1, Ordering::Relaxed);
				value
			}
			Put::Unchanged(value) => return Ok(value),
			Put::Conflict => {
				tracing::warn!(?key, "rejected conflicting write for cached key");
				return Err(CacheError::conflict(&key));
			}
		};

		let (evicted, freed) = shard.evict_overflow();
		drop(shard);
		if evicted > 0 {
			self.current_size.fetch_sub(freed, Ordering::Relaxed);
			self.entry_count.fetch_sub(evicted, Ordering::Relaxed);
			#[cfg(feature = "metrics")]
			self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
			tracing::trace!(evicted, freed, "evicted entries");
		}

		Ok(resident)
	}

	/// Current total deep size in bytes.
	pub fn size(&self) -> usize {
		self.current_size.load(Ordering::Relaxed)
	}

	/// Number of resident entries.
	pub fn len(&self) -> usize {
		self.entry_count.load(Ordering::Relaxed)
	}

	/// Check if the store is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of shards.
	pub fn shard_count(&self) -> usize {
		self.shard_count
	}

	/// Drop every entry.
	pub fn clear(&self) {
		for shard_lock in &self.shards {
			shard_lock.write().clear();
		}
		while self.access_buffer.pop().is_some() {}
		self.current_size.store(0, Ordering::Relaxed);
		self.entry_count.store(0, Ordering::Relaxed);
	}

	#[cfg(feature = "metrics")]
	pub(crate) fn fill_metrics(&self, metrics: &mut CacheMetrics) {
		metrics.hits = self.hits.load(Ordering::Relaxed);
		metrics.misses = self.misses.load(Ordering::Relaxed);
		metrics.inserts = self.inserts.load(Ordering::Relaxed);
		metrics.evictions = self.evictions.load(Ordering::Relaxed);
		metrics.entry_count = self.len();
		metrics.size_bytes = self.size();
	}

	fn get_shard(&self, key: &Q) -> &RwLock<Shard<Q, V>> {
		let index = (self.hasher.hash_one(key) as usize) & (self.shard_count - 1);
		&self.shards[index]
	}

	/// Report buffered reads to the eviction policy.
	///
	/// Called before writes so that reads never need a write lock.
	fn drain_accesses(&self) {
		for _ in 0..MAX_ACCESS_DRAIN {
			let Some(key) = self.access_buffer.pop() else {
				break;
			};
			if let Some(mut shard) = self.get_shard(&key).try_write() {
				shard.record_access(&key);
			} else {
				// Put it back for later
				self.access_buffer.push(key);
				break;
			}
		}
	}
}

impl<Q, V> Default for CacheStore<Q, V>
where
	Q: Clone + Hash + Eq + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

/// Keys a finished load was asked for but did not emit.
///
/// They resolve to the default value without reaching the loader again. They never
/// enter the store, so eviction and size accounting do not see them.
pub(crate) struct AbsentKeys<Q> {
	keys: RwLock<HashSet<Q>>,
}

impl<Q: Hash + Eq> AbsentKeys<Q> {
	pub fn new() -> Self {
		Self {
			keys: RwLock::new(HashSet::new()),
		}
	}

	pub fn contains(&self, key: &Q) -> bool {
		self.keys.read().contains(key)
	}

	/// Record keys as absent. Returns how many were not recorded before.
	pub fn extend(&self, keys: impl IntoIterator<Item = Q>) -> usize {
		let mut absent = self.keys.write();
		let before = absent.len();
		absent.extend(keys);
		absent.len() - before
	}

	pub fn len(&self) -> usize {
		self.keys.read().len()
	}

	pub fn clear(&self) {
		self.keys.write().clear();
	}
}
