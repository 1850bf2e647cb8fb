use std::hash::Hash;
use std::sync::Arc;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry as MapEntry;

use crate::eviction::EvictionPolicy;

/// A resident value with its cached deep size.
pub(crate) struct Entry<V> {
	pub value: Arc<V>,
	pub size: usize,
}

/// Outcome of a write into a shard.
pub(crate) enum Put<V> {
	/// The key was absent and now holds the value.
	Inserted {
		value: Arc<V>,
		size: usize,
	},
	/// The key already held an equal value; nothing changed.
	Unchanged(Arc<V>),
	/// The key already held a different value; nothing changed.
	Conflict,
}

/// A single shard of the store.
///
/// The shard is not thread-safe on its own; the store wraps it in an `RwLock`.
pub(crate) struct Shard<Q, V> {
	entries: HashMap<Q, Entry<V>>,
	policy: Box<dyn EvictionPolicy<Q>>,
}

impl<Q, V> Shard<Q, V>
where
	Q: Hash + Eq,
	V: PartialEq,
{
	pub fn new(policy: Box<dyn EvictionPolicy<Q>>) -> Self {
		Self {
			entries: HashMap::new(),
			policy,
		}
	}

	pub fn get(&self, key: &Q) -> Option<&Entry<V>> {
		self.entries.get(key)
	}

	pub fn contains(&self, key: &Q) -> bool {
		self.entries.contains_key(key)
	}

	/// Write-once insert.
	pub fn insert(&mut self, key: Q, value: V, size: usize) -> Put<V> {
		match self.entries.entry(key) {
			MapEntry::Occupied(existing) => {
				let resident = &existing.get().value;
				if **resident == value {
					Put::Unchanged(Arc::clone(resident))
				} else {
					Put::Conflict
				}
			}
			MapEntry::Vacant(slot) => {
				self.policy.on_insert(slot.key(), size);
				let value = Arc::new(value);
				slot.insert(Entry {
					value: Arc::clone(&value),
					size,
				});
				Put::Inserted {
					value,
					size,
				}
			}
		}
	}

	pub fn record_access(&mut self, key: &Q) {
		if self.entries.contains_key(key) {
			self.policy.on_access(key);
		}
	}

	/// Evict until the policy is satisfied.
	///
	/// Returns the number of entries and bytes freed.
	pub fn evict_overflow(&mut self) -> (usize, usize) {
		let mut count = 0;
		let mut bytes = 0;
		while let Some(victim) = self.policy.next_victim() {
			if let Some(entry) = self.entries.remove(&victim) {
				count += 1;
				bytes += entry.size;
			}
		}
		(count, bytes)
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
		self.policy.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::eviction::{SizeBounded, Unbounded};

	fn unbounded() -> Shard<u32, String> {
		Shard::new(EvictionPolicy::<u32>::for_shard(&Unbounded, 1))
	}

	#[test]
	fn test_shard_insert() {
		let mut shard = unbounded();
		assert!(matches!(shard.insert(1, "a".to_string(), 10), Put::Inserted { size: 10, .. }));
		assert!(shard.contains(&1));
		assert_eq!(shard.len(), 1);
	}

	#[test]
	fn test_shard_equal_rewrite_is_noop() {
		let mut shard = unbounded();
		shard.insert(1, "a".to_string(), 10);
		match shard.insert(1, "a".to_string(), 10) {
			Put::Unchanged(value) => assert_eq!(*value, "a"),
			_ => panic!("expected unchanged"),
		}
		assert_eq!(shard.len(), 1);
	}

	#[test]
	fn test_shard_conflicting_rewrite_keeps_original() {
		let mut shard = unbounded();
		shard.insert(1, "a".to_string(), 10);
		assert!(matches!(shard.insert(1, "b".to_string(), 10), Put::Conflict));
		assert_eq!(*shard.get(&1).unwrap().value, "a");
	}

	#[test]
	fn test_shard_evicts_over_budget() {
		let mut shard: Shard<u32, String> = Shard::new(SizeBounded::<u32>::new(25).for_shard(1));
		shard.insert(1, "a".to_string(), 10);
		shard.insert(2, "b".to_string(), 10);
		assert_eq!(shard.evict_overflow(), (0, 0));

		shard.insert(3, "c".to_string(), 10);
		assert_eq!(shard.evict_overflow(), (1, 10));
		assert!(!shard.contains(&1));
		assert!(shard.contains(&3));
	}

	#[test]
	fn test_clear() {
		let mut shard = unbounded();
		shard.insert(1, "a".to_string(), 10);
		shard.clear();
		assert_eq!(shard.len(), 0);
	}
}
