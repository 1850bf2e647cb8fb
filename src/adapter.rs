use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use deepsize::DeepSizeOf;
use hashbrown::{HashMap, HashSet};

use crate::error::{CacheError, Result};
use crate::key::{CompositeKey, MissBatch};
use crate::store::CacheStore;
use crate::traits::{BatchLoader, RangeKey};

type Key<R, K> = CompositeKey<K, <R as RangeKey>::Element>;

/// Run one loader invocation and stream its output into the store.
///
/// Each produced entry is written as soon as it is pulled, so entries yielded before a
/// failure stay cached. Entries for keys outside `owned` are skipped: another caller may
/// be loading them. Returns every value written for an owned key.
pub(crate) fn load_into_store<C, R, K, V, L>(
	loader: &L,
	store: &CacheStore<Key<R, K>, V>,
	context: &C,
	batches: &[MissBatch<R, K>],
	owned: &HashSet<Key<R, K>>,
) -> Result<HashMap<Key<R, K>, Arc<V>>>
where
	R: RangeKey,
	K: Clone + Hash + Ord + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
	L: BatchLoader<C, R, K, V> + ?Sized,
{
	let entries = loader.load(context, batches).map_err(loader_failure)?;

	let mut loaded = HashMap::with_capacity(owned.len());
	let mut skipped = 0usize;
	for entry in entries {
		let (key, value) = entry.map_err(loader_failure)?;
		if !owned.contains(&key) {
			tracing::debug!(?key, "skipping loaded entry outside the requested keys");
			skipped += 1;
			continue;
		}
		let value = store.put(key.clone(), value)?;
		loaded.insert(key, value);
	}

	tracing::debug!(
		batches = batches.len(),
		requested = owned.len(),
		loaded = loaded.len(),
		skipped,
		"load finished"
	);
	Ok(loaded)
}

fn loader_failure<E>(err: E) -> CacheError
where
	E: std::error::Error + Send + Sync + 'static,
{
	tracing::warn!(error = %err, "loader failed");
	CacheError::loader(err)
}
