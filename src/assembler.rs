use std::hash::Hash;
use std::sync::Arc;

use hashbrown::HashMap;
use indexmap::{IndexMap, IndexSet};

use crate::key::CompositeKey;

/// The assembled answer to one `resolve` call.
///
/// Holds exactly the requested composite keys, in expansion order, each with its
/// cached, freshly loaded or default value. How the result is reshaped is up to the
/// caller; [`into_map`](Resolved::into_map) and
/// [`group_by_outer`](Resolved::group_by_outer) cover the common shapes.
#[derive(Debug, Clone)]
pub struct Resolved<K, E, V> {
	entries: IndexMap<CompositeKey<K, E>, Arc<V>>,
	defaulted: usize,
}

impl<K, E, V> Resolved<K, E, V>
where
	K: Clone + Hash + Eq,
	E: Clone + Hash + Eq,
{
	/// Resolve every requested key from the lookup hits, then from values loaded
	/// during the call, then fall back to `default`.
	pub(crate) fn assemble(
		requested: IndexSet<CompositeKey<K, E>>,
		hits: &HashMap<CompositeKey<K, E>, Arc<V>>,
		loaded: &[&HashMap<CompositeKey<K, E>, Arc<V>>],
		default: &Arc<V>,
	) -> Self {
		let mut defaulted = 0;
		let entries = requested
			.into_iter()
			.map(|key| {
				let value = hits
					.get(&key)
					.or_else(|| loaded.iter().find_map(|values| values.get(&key)))
					.cloned()
					.unwrap_or_else(|| {
						defaulted += 1;
						Arc::clone(default)
					});
				(key, value)
			})
			.collect();

		Self {
			entries,
			defaulted,
		}
	}

	/// Number of composite keys in the result.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// True when nothing was requested.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// How many keys fell back to the default value because the loader did not emit
	/// them.
	pub fn defaulted(&self) -> usize {
		self.defaulted
	}

	/// The value for one composite key.
	pub fn get(&self, key: &CompositeKey<K, E>) -> Option<&V> {
		self.entries.get(key).map(Arc::as_ref)
	}

	/// Entries in expansion order.
	pub fn iter(&self) -> impl ExactSizeIterator<Item = (&CompositeKey<K, E>, &V)> {
		self.entries.iter().map(|(key, value)| (key, value.as_ref()))
	}

	/// Composite keys in expansion order.
	pub fn keys(&self) -> impl ExactSizeIterator<Item = &CompositeKey<K, E>> {
		self.entries.keys()
	}

	/// Flat mapping from composite key to value, in expansion order.
	pub fn into_map(self) -> IndexMap<CompositeKey<K, E>, Arc<V>> {
		self.entries
	}

	/// Ordered `(key, value)` pairs.
	pub fn into_vec(self) -> Vec<(CompositeKey<K, E>, Arc<V>)> {
		self.entries.into_iter().collect()
	}

	/// Nested grouping: each outer key with its `(element, value)` pairs.
	///
	/// Outer keys appear in order of first occurrence; elements keep expansion order.
	pub fn group_by_outer(&self) -> IndexMap<K, Vec<(E, Arc<V>)>> {
		let mut grouped: IndexMap<K, Vec<(E, Arc<V>)>> = IndexMap::new();
		for (key, value) in &self.entries {
			grouped.entry(key.outer.clone()).or_default().push((key.element.clone(), Arc::clone(value)));
		}
		grouped
	}
}

impl<K, E, V> IntoIterator for Resolved<K, E, V> {
	type Item = (CompositeKey<K, E>, Arc<V>);
	type IntoIter = indexmap::map::IntoIter<CompositeKey<K, E>, Arc<V>>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}
