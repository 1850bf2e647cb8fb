use std::hash::Hash;

use indexmap::IndexMap;

/// Pluggable eviction strategy for the cache store.
///
/// The store keeps one policy instance per shard, created with [`for_shard`]. A policy
/// only ever chooses which resident keys to drop; it never touches values, so the
/// write-once contract holds for every key that stays resident.
///
/// [`for_shard`]: EvictionPolicy::for_shard
pub trait EvictionPolicy<Q>: Send + Sync {
	/// Create an empty instance responsible for one of `shard_count` shards.
	fn for_shard(&self, shard_count: usize) -> Box<dyn EvictionPolicy<Q>>;

	/// Whether reads should be reported through [`on_access`](EvictionPolicy::on_access).
	fn tracks_access(&self) -> bool {
		true
	}

	/// A key was written with the given deep size in bytes.
	fn on_insert(&mut self, key: &Q, size: usize);

	/// A resident key was read.
	fn on_access(&mut self, key: &Q);

	/// Pop the next key to evict, or `None` when the shard is within budget.
	fn next_victim(&mut self) -> Option<Q>;

	/// Forget all tracked keys.
	fn clear(&mut self);
}

/// Keep every entry for the lifetime of the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl<Q: 'static> EvictionPolicy<Q> for Unbounded {
	fn for_shard(&self, _shard_count: usize) -> Box<dyn EvictionPolicy<Q>> {
		Box::new(Unbounded)
	}

	fn tracks_access(&self) -> bool {
		false
	}

	fn on_insert(&mut self, _key: &Q, _size: usize) {}

	fn on_access(&mut self, _key: &Q) {}

	fn next_victim(&mut self) -> Option<Q> {
		None
	}

	fn clear(&mut self) {}
}

/// Least-recently-used eviction bounded by deep size in bytes.
///
/// The byte budget is split evenly across shards.
#[derive(Debug, Clone)]
pub struct SizeBounded<Q> {
	/// Recency order: front is least recently used.
	order: IndexMap<Q, usize>,
	size: usize,
	max_size: usize,
}

impl<Q: Hash + Eq> SizeBounded<Q> {
	/// Bound the store to `max_size_bytes`.
	pub fn new(max_size_bytes: usize) -> Self {
		Self {
			order: IndexMap::new(),
			size: 0,
			max_size: max_size_bytes,
		}
	}

	/// Bytes currently tracked.
	pub fn size(&self) -> usize {
		self.size
	}

	/// The byte budget.
	pub fn max_size(&self) -> usize {
		self.max_size
	}
}

impl<Q> EvictionPolicy<Q> for SizeBounded<Q>
where
	Q: Clone + Hash + Eq + Send + Sync + 'static,
{
	fn for_shard(&self, shard_count: usize) -> Box<dyn EvictionPolicy<Q>> {
		Box::new(SizeBounded::new(self.max_size / shard_count.max(1)))
	}

	fn on_insert(&mut self, key: &Q, size: usize) {
		if let Some(old) = self.order.insert(key.clone(), size) {
			self.size = self.size.saturating_sub(old);
		}
		self.size += size;
	}

	fn on_access(&mut self, key: &Q) {
		if let Some(index) = self.order.get_index_of(key) {
			let last = self.order.len() - 1;
			self.order.move_index(index, last);
		}
	}

	fn next_victim(&mut self) -> Option<Q> {
		if self.size <= self.max_size {
			return None;
		}
		let (key, size) = self.order.shift_remove_index(0)?;
		self.size = self.size.saturating_sub(size);
		Some(key)
	}

	fn clear(&mut self) {
		self.order.clear();
		self.size = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unbounded_never_evicts() {
		let mut policy = <Unbounded as EvictionPolicy<u32>>::for_shard(&Unbounded, 4);
		for i in 0..100u32 {
			policy.on_insert(&i, 1 << 20);
		}
		assert!(policy.next_victim().is_none());
		assert!(!policy.tracks_access());
	}

	#[test]
	fn test_size_bounded_evicts_oldest_first() {
		let mut policy = SizeBounded::<u32>::new(100);
		policy.on_insert(&1u32, 40);
		policy.on_insert(&2u32, 40);
		assert!(policy.next_victim().is_none());

		policy.on_insert(&3u32, 40);
		assert_eq!(policy.next_victim(), Some(1));
		assert!(policy.next_victim().is_none());
		assert_eq!(policy.size(), 80);
	}

	#[test]
	fn test_size_bounded_access_refreshes_recency() {
		let mut policy = SizeBounded::<u32>::new(100);
		policy.on_insert(&1u32, 40);
		policy.on_insert(&2u32, 40);
		policy.on_access(&1);
		policy.on_insert(&3u32, 40);
		assert_eq!(policy.next_victim(), Some(2));
	}

	#[test]
	fn test_size_bounded_splits_budget_across_shards() {
		let prototype = SizeBounded::<u32>::new(1000);
		let mut shard = prototype.for_shard(4);
		shard.on_insert(&1, 200);
		assert!(shard.next_victim().is_none());
		shard.on_insert(&2, 100);
		assert_eq!(shard.next_victim(), Some(1));
	}

	#[test]
	fn test_clear_resets_size() {
		let mut policy = SizeBounded::<u32>::new(10);
		policy.on_insert(&1u32, 50);
		policy.clear();
		assert_eq!(policy.size(), 0);
		assert!(policy.next_victim().is_none());
	}
}
