use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;
use range_batch_cache::{BatchCache, BatchLoader, CacheError, CoarseRequest, CompositeKey, MissBatch, SizeBounded};

type Days = RangeInclusive<u32>;
type Key = CompositeKey<u64, u32>;

/// Emits a value for every requested key, except outer keys that are a multiple of
/// `skip_every` when set.
struct Sparse {
	skip_every: Option<u64>,
	calls: AtomicUsize,
}

impl BatchLoader<(), Days, u64, u64> for Sparse {
	type Error = CacheError;
	type Entries = std::vec::IntoIter<Result<(Key, u64), CacheError>>;

	fn load(&self, _: &(), batches: &[MissBatch<Days, u64>]) -> Result<Self::Entries, CacheError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let mut entries = Vec::new();
		for batch in batches {
			for key in batch.composite_keys()? {
				if self.skip_every.is_none_or(|n| key.outer % n != 0) {
					entries.push(Ok((key, key.outer * 1000 + u64::from(key.element))));
				}
			}
		}
		Ok(entries.into_iter())
	}
}

fn requests() -> impl Strategy<Value = Vec<(u32, u32, Vec<u64>)>> {
	prop::collection::vec((0u32..20, 0u32..5, prop::collection::vec(0u64..30, 0..8)), 0..6)
}

fn build(raw: &[(u32, u32, Vec<u64>)]) -> Vec<CoarseRequest<Days, u64>> {
	raw.iter().map(|(start, len, keys)| CoarseRequest::new(*start..=*start + *len, keys.iter().copied())).collect()
}

fn expected_keys(raw: &[(u32, u32, Vec<u64>)]) -> HashSet<Key> {
	raw.iter()
		.flat_map(|(start, len, keys)| {
			(*start..=*start + *len).flat_map(move |day| keys.iter().map(move |k| CompositeKey::new(*k, day)))
		})
		.collect()
}

proptest! {
	#[test]
	fn test_result_is_complete(raw in requests(), skip_every in 2u64..5) {
		let cache = BatchCache::builder(Sparse { skip_every: Some(skip_every), calls: AtomicUsize::new(0) }, u64::MAX).build();

		let resolved = cache.resolve(&(), &build(&raw)).unwrap();

		let expected = expected_keys(&raw);
		let actual: HashSet<Key> = resolved.keys().copied().collect();
		prop_assert_eq!(resolved.len(), expected.len());
		prop_assert_eq!(actual, expected);

		for (key, value) in resolved.iter() {
			if key.outer % skip_every == 0 {
				prop_assert_eq!(*value, u64::MAX);
			} else {
				prop_assert_eq!(*value, key.outer * 1000 + u64::from(key.element));
			}
		}
	}

	#[test]
	fn test_repeat_never_loads_again(raw in requests(), skip_every in 2u64..5) {
		// Keys the loader left out are known after the first pass as well.
		let cache = BatchCache::builder(Sparse { skip_every: Some(skip_every), calls: AtomicUsize::new(0) }, 0).build();
		let requests = build(&raw);

		let first = cache.resolve(&(), &requests).unwrap();
		let calls = cache.loader().calls.load(Ordering::SeqCst);
		prop_assert!(calls <= 1);

		let second = cache.resolve(&(), &requests).unwrap();
		prop_assert_eq!(cache.loader().calls.load(Ordering::SeqCst), calls);
		prop_assert_eq!(first.into_vec(), second.into_vec());
	}

	#[test]
	fn test_eviction_never_changes_values(raw in requests(), budget in 64usize..2048) {
		let cache = BatchCache::builder(Sparse { skip_every: None, calls: AtomicUsize::new(0) }, 0)
			.shards(1)
			.eviction(SizeBounded::new(budget))
			.build();
		let requests = build(&raw);

		for _ in 0..2 {
			let resolved = cache.resolve(&(), &requests).unwrap();
			prop_assert!(cache.store().size() <= budget);
			for (key, value) in resolved.iter() {
				prop_assert_eq!(*value, key.outer * 1000 + u64::from(key.element));
			}
		}
	}
}
