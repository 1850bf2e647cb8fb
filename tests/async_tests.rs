//! Tests for async usage patterns.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use range_batch_cache::{BatchCache, BatchLoader, CacheError, CoarseRequest, CompositeKey, MissBatch};

type Days = RangeInclusive<u32>;
type Key = CompositeKey<u64, u32>;

#[derive(Debug, Clone, PartialEq, deepsize::DeepSizeOf)]
struct Quote {
	product: u64,
	day: u32,
	cents: u64,
}

/// Slow loader standing in for a database round-trip. The context is a price scale.
struct QuoteLoader {
	calls: AtomicUsize,
}

impl BatchLoader<u64, Days, u64, Quote> for QuoteLoader {
	type Error = CacheError;
	type Entries = std::vec::IntoIter<Result<(Key, Quote), CacheError>>;

	fn load(&self, scale: &u64, batches: &[MissBatch<Days, u64>]) -> Result<Self::Entries, CacheError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		std::thread::sleep(Duration::from_millis(50));

		let mut entries = Vec::new();
		for batch in batches {
			for key in batch.composite_keys()? {
				let quote = Quote {
					product: key.outer,
					day: key.element,
					cents: key.outer * scale,
				};
				entries.push(Ok((key, quote)));
			}
		}
		Ok(entries.into_iter())
	}
}

type Cache = BatchCache<u64, Days, u64, Quote, QuoteLoader>;

fn cache() -> Arc<Cache> {
	let loader = QuoteLoader {
		calls: AtomicUsize::new(0),
	};
	Arc::new(
		BatchCache::builder(
			loader,
			Quote {
				product: 0,
				day: 0,
				cents: 0,
			},
		)
		.build(),
	)
}

#[tokio::test]
async fn test_resolve_in_spawn_blocking() {
	let cache = cache();

	let resolved = {
		let cache = cache.clone();
		tokio::task::spawn_blocking(move || cache.resolve_one(&100, CoarseRequest::new(0..=6, [1, 2])))
			.await
			.unwrap()
			.unwrap()
	};

	assert_eq!(resolved.len(), 14);
	let quote = resolved.get(&CompositeKey::new(2, 6)).unwrap();
	assert_eq!(quote.cents, 200);
	assert_eq!(quote.day, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_load() {
	let cache = cache();

	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let cache = cache.clone();
			tokio::task::spawn_blocking(move || cache.resolve_one(&100, CoarseRequest::new(0..=2, [5, 6, 7])))
		})
		.collect();

	for task in tasks {
		let resolved = task.await.unwrap().unwrap();
		assert_eq!(resolved.len(), 9);
		assert_eq!(resolved.defaulted(), 0);
	}
	assert_eq!(cache.loader().calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_arc_values_outlive_await() {
	let cache = cache();

	let resolved = {
		let cache = cache.clone();
		tokio::task::spawn_blocking(move || cache.resolve_one(&3, CoarseRequest::new(0..=0, [9])))
			.await
			.unwrap()
			.unwrap()
	};
	let quote = Arc::clone(&resolved.into_map()[0]);

	tokio::time::sleep(Duration::from_millis(1)).await;
	cache.clear();

	assert_eq!(quote.product, 9);
	assert_eq!(quote.cents, 27);
}
