use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use deepsize::DeepSizeOf;
use hashbrown::{HashMap, HashSet};
use indexmap::{IndexMap, IndexSet};

use crate::error::Result;
use crate::key::{CoarseRequest, CompositeKey, MissBatch};
use crate::store::{AbsentKeys, CacheStore};
use crate::traits::RangeKey;

type Key<R, K> = CompositeKey<K, <R as RangeKey>::Element>;

/// Hits and misses of a set of coarse requests against the store.
///
/// Keeps the shape of every request so that misses can be regrouped into the
/// range-shaped batches the loader consumes.
pub(crate) struct Lookup<R: RangeKey, K, V> {
	/// Each requested range with its distinct elements.
	shapes: Vec<(R, IndexSet<R::Element>)>,
	/// Every requested composite key, in expansion order, without duplicates.
	requested: IndexSet<Key<R, K>>,
	hits: HashMap<Key<R, K>, Arc<V>>,
	misses: Vec<Key<R, K>>,
}

impl<R, K, V> Lookup<R, K, V>
where
	R: RangeKey,
	K: Clone + Hash + Ord + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
{
	/// Expand `requests` and look every composite key up in `store`.
	///
	/// Keys recorded in `absent` are neither hits nor misses: they resolve to the
	/// default. Every range is expanded before the store is consulted, so an invalid
	/// range fails without touching any state.
	pub fn resolve(
		store: &CacheStore<Key<R, K>, V>,
		absent: &AbsentKeys<Key<R, K>>,
		requests: &[CoarseRequest<R, K>],
	) -> Result<Self> {
		let mut shapes = Vec::with_capacity(requests.len());
		let mut requested = IndexSet::new();
		for request in requests {
			let elements: IndexSet<_> = request.range().elements()?.collect();
			requested.extend(request.expand()?);
			shapes.push((request.range().clone(), elements));
		}

		let mut hits = HashMap::with_capacity(requested.len());
		let mut misses = Vec::new();
		let mut known_absent = 0usize;
		for key in &requested {
			match store.get(key) {
				Some(value) => {
					hits.insert(key.clone(), value);
				}
				None if absent.contains(key) => known_absent += 1,
				None => misses.push(key.clone()),
			}
		}

		tracing::trace!(
			requested = requested.len(),
			hits = hits.len(),
			misses = misses.len(),
			absent = known_absent,
			"partitioned lookup"
		);

		Ok(Self {
			shapes,
			requested,
			hits,
			misses,
		})
	}
}

impl<R, K, V> Lookup<R, K, V>
where
	R: RangeKey,
	K: Clone + Hash + Ord,
{
	/// Requested composite keys in expansion order.
	#[cfg(test)]
	pub fn requested(&self) -> impl ExactSizeIterator<Item = &Key<R, K>> {
		self.requested.iter()
	}

	/// Keys that were already resident, with their values.
	#[cfg(test)]
	pub fn hits(&self) -> &HashMap<Key<R, K>, Arc<V>> {
		&self.hits
	}

	/// Keys that were absent.
	pub fn misses(&self) -> &[Key<R, K>] {
		&self.misses
	}

	/// True when every requested key was a hit.
	pub fn is_complete(&self) -> bool {
		self.misses.is_empty()
	}

	/// Regroup all misses into loader-shaped batches.
	#[cfg(test)]
	pub fn miss_batches(&self) -> Vec<MissBatch<R, K>> {
		self.regroup(&self.misses)
	}

	/// Regroup a subset of the requested keys into loader-shaped batches.
	///
	/// Misses are grouped per range element. A requested range is forwarded whole when
	/// every one of its elements misses the same set of outer keys; otherwise it is
	/// split into single-element ranges. Each batch names only the outer keys that are
	/// absent for its range, and no element appears in more than one batch.
	pub fn regroup<'a>(&self, keys: impl IntoIterator<Item = &'a Key<R, K>>) -> Vec<MissBatch<R, K>>
	where
		K: 'a,
	{
		let mut missing: IndexMap<&R::Element, BTreeSet<K>> = IndexMap::new();
		for key in keys {
			missing.entry(&key.element).or_default().insert(key.outer.clone());
		}

		let mut emitted: HashSet<&R::Element> = HashSet::with_capacity(missing.len());
		let mut batches = Vec::new();
		for (range, elements) in &self.shapes {
			let pending: Vec<&R::Element> = elements
				.iter()
				.filter(|element| missing.contains_key(element) && !emitted.contains(element))
				.collect();
			let Some(first) = pending.first().map(|element| &missing[element]) else {
				continue;
			};

			let whole = pending.len() == elements.len()
				&& pending.iter().all(|element| missing[element] == *first);
			if whole {
				batches.push(MissBatch::new(range.clone(), first.iter().cloned()));
				emitted.extend(pending);
			} else {
				for element in pending {
					batches.push(MissBatch::new(R::singleton(element), missing[element].iter().cloned()));
					emitted.insert(element);
				}
			}
		}
		batches
	}

	pub(crate) fn into_parts(self) -> (IndexSet<Key<R, K>>, HashMap<Key<R, K>, Arc<V>>) {
		(self.requested, self.hits)
	}
}
