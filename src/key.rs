use std::collections::BTreeSet;
use std::hash::Hash;

use indexmap::IndexSet;

use crate::error::Result;
use crate::traits::RangeKey;

/// Address of one cache slot: an outer key paired with one range element.
///
/// Equality and hashing are tuple-wise over both components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey<K, E> {
	/// The per-entity dimension.
	pub outer: K,
	/// The range element.
	pub element: E,
}

impl<K, E> CompositeKey<K, E> {
	/// Create a composite key.
	pub fn new(outer: K, element: E) -> Self {
		Self {
			outer,
			element,
		}
	}

	/// Split back into `(outer, element)`.
	pub fn into_parts(self) -> (K, E) {
		(self.outer, self.element)
	}
}

impl<K, E> From<(K, E)> for CompositeKey<K, E> {
	fn from((outer, element): (K, E)) -> Self {
		Self::new(outer, element)
	}
}

/// A caller-supplied unit of lookup: one range and a set of outer keys.
///
/// Outer keys keep the order they were supplied in; duplicates collapse onto the
/// first occurrence.
#[derive(Debug, Clone)]
pub struct CoarseRequest<R, K> {
	range: R,
	keys: IndexSet<K>,
}

impl<R: RangeKey, K: Clone + Hash + Eq> CoarseRequest<R, K> {
	/// Create a request for every key in `keys` over `range`.
	pub fn new(range: R, keys: impl IntoIterator<Item = K>) -> Self {
		Self {
			range,
			keys: keys.into_iter().collect(),
		}
	}

	/// The requested range.
	pub fn range(&self) -> &R {
		&self.range
	}

	/// The requested outer keys, in caller order.
	pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> {
		self.keys.iter()
	}

	/// Expand into the composite keys this request denotes.
	///
	/// Ordering: the outer loop walks range elements, the inner loop walks outer keys
	/// in caller order. Requesting `0..=1` for keys `[1, 2]` yields `(1,0), (2,0),
	/// (1,1), (2,1)`. The order is stable and result assembly follows it.
	pub fn expand(&self) -> Result<impl Iterator<Item = CompositeKey<K, R::Element>> + '_> {
		let elements = self.range.elements()?;
		Ok(elements.flat_map(move |element| {
			self.keys.iter().map(move |key| CompositeKey::new(key.clone(), element.clone()))
		}))
	}
}

/// A narrowed group of misses in the shape the loader consumes.
///
/// Keys are held in a sorted set so that two batches covering the same slots compare
/// and hash equal regardless of the order misses were discovered in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MissBatch<R, K> {
	range: R,
	keys: BTreeSet<K>,
}

impl<R: RangeKey, K: Clone + Ord> MissBatch<R, K> {
	/// Create a miss batch.
	pub fn new(range: R, keys: impl IntoIterator<Item = K>) -> Self {
		Self {
			range,
			keys: keys.into_iter().collect(),
		}
	}

	/// The range this batch covers.
	pub fn range(&self) -> &R {
		&self.range
	}

	/// The outer keys missing over the whole range.
	pub fn keys(&self) -> &BTreeSet<K> {
		&self.keys
	}

	/// Number of composite keys this batch asks for, if the range is well formed.
	pub fn slot_count(&self) -> Result<usize> {
		Ok(self.range.elements()?.count() * self.keys.len())
	}

	/// Expand into composite keys, range elements outermost.
	///
	/// Convenience for loader implementations.
	pub fn composite_keys(&self) -> Result<impl Iterator<Item = CompositeKey<K, R::Element>> + '_> {
		let elements = self.range.elements()?;
		Ok(elements.flat_map(move |element| {
			self.keys.iter().map(move |key| CompositeKey::new(key.clone(), element.clone()))
		}))
	}
}
