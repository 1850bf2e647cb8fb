use std::error::Error as StdError;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::{Range, RangeInclusive};

use crate::error::{CacheError, Result};
use crate::key::{CompositeKey, MissBatch};

/// The coarse dimension of a composite key.
///
/// A range is an opaque, finite value that expands into an ordered sequence of
/// elements. Each element paired with one outer key addresses a single cache slot.
///
/// # Example
///
/// ```
/// use range_batch_cache::{CacheError, RangeKey};
///
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct Days {
///     first: u32,
///     count: u32,
/// }
///
/// impl RangeKey for Days {
///     type Element = u32;
///
///     fn elements(&self) -> Result<impl Iterator<Item = u32> + '_, CacheError> {
///         let end = self.first.checked_add(self.count).ok_or_else(|| CacheError::invalid_range("overflow"))?;
///         Ok(self.first..end)
///     }
///
///     fn singleton(day: &u32) -> Self {
///         Days { first: *day, count: 1 }
///     }
/// }
/// ```
pub trait RangeKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
	/// One atomic step of the range (a day, a bucket, a page...).
	type Element: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;

	/// Iterate the elements of this range.
	///
	/// Fails with [`CacheError::InvalidRange`] when the range is malformed. An empty
	/// range is not an error.
	fn elements(&self) -> Result<impl Iterator<Item = Self::Element> + '_>;

	/// Build the range that contains exactly `element`.
	///
	/// Used when a batch of misses cannot be expressed with the caller's original range.
	fn singleton(element: &Self::Element) -> Self;
}

macro_rules! integer_ranges {
	($($t:ty),* $(,)?) => {$(
		impl RangeKey for RangeInclusive<$t> {
			type Element = $t;

			fn elements(&self) -> Result<impl Iterator<Item = $t> + '_> {
				if self.start() > self.end() {
					return Err(CacheError::invalid_range(format!(
						"start {} is after end {}",
						self.start(),
						self.end()
					)));
				}
				Ok(self.clone())
			}

			fn singleton(element: &$t) -> Self {
				*element..=*element
			}
		}

		impl RangeKey for Range<$t> {
			type Element = $t;

			fn elements(&self) -> Result<impl Iterator<Item = $t> + '_> {
				if self.start > self.end {
					return Err(CacheError::invalid_range(format!(
						"start {} is after end {}",
						self.start, self.end
					)));
				}
				Ok(self.clone())
			}

			fn singleton(element: &$t) -> Self {
				*element..*element + 1
			}
		}
	)*};
}

integer_ranges!(u16, u32, u64, usize, i32, i64);

/// Batched loader for cache misses.
///
/// Called with the opaque context and every miss batch of one coalesced load. The
/// returned entries are consumed lazily and written to the cache as they are produced.
/// Keys the loader chooses not to emit resolve to the cache's default value.
///
/// A loader is invoked once per distinct set of misses over the cache's lifetime and
/// must not assume it is called only once. Closures can be used through [`loader_fn`].
pub trait BatchLoader<C, R: RangeKey, K, V>: Send + Sync {
	/// Loader failure type. Propagated to every caller waiting on the load.
	type Error: StdError + Send + Sync + 'static;

	/// Lazy sequence of loaded entries.
	type Entries: Iterator<Item = Result<(CompositeKey<K, R::Element>, V), Self::Error>>;

	/// Start loading the given batches.
	fn load(&self, context: &C, batches: &[MissBatch<R, K>]) -> Result<Self::Entries, Self::Error>;
}

/// [`BatchLoader`] backed by a closure. See [`loader_fn`].
#[derive(Clone)]
pub struct FnLoader<F>(F);

/// Use a closure as a [`BatchLoader`].
///
/// The closure returns anything iterable over `Result<(CompositeKey, V), E>`. The
/// iterator cannot borrow from the batches slice, so clone what it needs.
///
/// ```
/// use range_batch_cache::{CacheError, MissBatch, loader_fn};
///
/// let loader = loader_fn(|_ctx: &(), batches: &[MissBatch<std::ops::RangeInclusive<u32>, u64>]| {
///     let mut entries = Vec::new();
///     for batch in batches {
///         for key in batch.composite_keys()? {
///             entries.push(Ok::<_, CacheError>((key, String::from("loaded"))));
///         }
///     }
///     Ok::<_, CacheError>(entries)
/// });
/// # let _ = loader;
/// ```
pub fn loader_fn<C, R, K, V, F, I, E>(f: F) -> FnLoader<F>
where
	R: RangeKey,
	F: Fn(&C, &[MissBatch<R, K>]) -> std::result::Result<I, E> + Send + Sync,
	I: IntoIterator<Item = std::result::Result<(CompositeKey<K, R::Element>, V), E>>,
{
	FnLoader(f)
}

impl<C, R, K, V, F, I, E> BatchLoader<C, R, K, V> for FnLoader<F>
where
	R: RangeKey,
	F: Fn(&C, &[MissBatch<R, K>]) -> std::result::Result<I, E> + Send + Sync,
	I: IntoIterator<Item = std::result::Result<(CompositeKey<K, R::Element>, V), E>>,
	E: StdError + Send + Sync + 'static,
{
	type Error = E;
	type Entries = I::IntoIter;

	fn load(&self, context: &C, batches: &[MissBatch<R, K>]) -> std::result::Result<Self::Entries, E> {
		(self.0)(context, batches).map(IntoIterator::into_iter)
	}
}

/// Enumerates every outer key that may ever be requested for a context.
///
/// Must be pure. Only used for pre-warming and completeness checks.
pub trait PotentialKeys<C, K>: Send + Sync {
	/// The full outer keyspace for `context`.
	fn potential_keys(&self, context: &C) -> Vec<K>;
}

/// [`PotentialKeys`] backed by a closure. See [`potential_keys_fn`].
#[derive(Clone)]
pub struct FnPotentialKeys<F>(F);

/// Use a closure as a [`PotentialKeys`] provider.
pub fn potential_keys_fn<C, K, F>(f: F) -> FnPotentialKeys<F>
where
	F: Fn(&C) -> Vec<K> + Send + Sync,
{
	FnPotentialKeys(f)
}

impl<C, K, F> PotentialKeys<C, K> for FnPotentialKeys<F>
where
	F: Fn(&C) -> Vec<K> + Send + Sync,
{
	fn potential_keys(&self, context: &C) -> Vec<K> {
		(self.0)(context)
	}
}
