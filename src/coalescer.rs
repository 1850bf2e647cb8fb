use std::fmt::Debug;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use deepsize::DeepSizeOf;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};

use crate::error::{CacheError, LoaderPanicked, Result};
use crate::store::{AbsentKeys, CacheStore};

/// Values produced by one load, shared with every caller that waited on it.
pub(crate) type Loaded<Q, V> = Arc<HashMap<Q, Arc<V>>>;

/// One in-progress loader invocation.
pub(crate) struct Flight<Q, V> {
	fingerprint: u64,
	outcome: Mutex<Option<Result<Loaded<Q, V>>>>,
	done: Condvar,
}

impl<Q, V> Flight<Q, V> {
	fn new(fingerprint: u64) -> Self {
		Self {
			fingerprint,
			outcome: Mutex::new(None),
			done: Condvar::new(),
		}
	}

	/// Identifies the flight in logs.
	pub fn fingerprint(&self) -> u64 {
		self.fingerprint
	}

	/// Block until the owning caller finishes the load.
	pub fn wait(&self) -> Result<Loaded<Q, V>> {
		let mut outcome = self.outcome.lock();
		loop {
			if let Some(result) = outcome.as_ref() {
				return result.clone();
			}
			self.done.wait(&mut outcome);
		}
	}

	fn release(&self, result: Result<Loaded<Q, V>>) {
		*self.outcome.lock() = Some(result);
		self.done.notify_all();
	}
}

/// How a set of misses splits across in-flight loads.
pub(crate) struct Claim<'a, Q: Hash + Eq, V> {
	/// Keys written by a load that finished after the caller's lookup. Keys that load
	/// left out are not listed; they resolve to the default.
	pub resolved: Vec<(Q, Arc<V>)>,
	/// Loads owned by other callers that cover some of the misses.
	pub joined: Vec<Arc<Flight<Q, V>>>,
	/// Keys the caller now owns and must load itself.
	pub owned: Option<OwnedFlight<'a, Q, V>>,
}

/// In-flight table guaranteeing at most one running load per composite key.
///
/// The table lock is held only while claiming or releasing keys, never while a loader
/// runs.
pub(crate) struct LoadCoalescer<Q, V> {
	in_flight: Mutex<HashMap<Q, Arc<Flight<Q, V>>>>,
	hasher: ahash::RandomState,
}

impl<Q, V> LoadCoalescer<Q, V>
where
	Q: Clone + Hash + Eq + Debug + Send + Sync + 'static,
	V: DeepSizeOf + PartialEq + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self {
			in_flight: Mutex::new(HashMap::new()),
			hasher: ahash::RandomState::new(),
		}
	}

	/// Split `misses` into keys resolved meanwhile, loads to join and keys to own.
	///
	/// The store and the absent set are re-checked under the table lock. A finished load
	/// writes its values and records the keys it left out before leaving the table, so a
	/// key that is neither resident, absent nor in flight here is genuinely missing.
	pub fn claim<'a>(
		&'a self,
		store: &CacheStore<Q, V>,
		absent: &AbsentKeys<Q>,
		misses: &[Q],
	) -> Claim<'a, Q, V> {
		let mut resolved = Vec::new();
		let mut joined: Vec<Arc<Flight<Q, V>>> = Vec::new();
		let mut owned = Vec::new();

		let mut in_flight = self.in_flight.lock();
		for key in misses {
			if let Some(flight) = in_flight.get(key) {
				if !joined.iter().any(|j| Arc::ptr_eq(j, flight)) {
					joined.push(Arc::clone(flight));
				}
			} else if let Some(value) = store.peek(key) {
				resolved.push((key.clone(), value));
			} else if !absent.contains(key) {
				owned.push(key.clone());
			}
		}

		let owned = if owned.is_empty() {
			None
		} else {
			let flight = Arc::new(Flight::new(self.fingerprint(&owned)));
			for key in &owned {
				in_flight.insert(key.clone(), Arc::clone(&flight));
			}
			Some(OwnedFlight {
				coalescer: self,
				flight,
				keys: owned.into_iter().collect(),
				released: false,
			})
		};
		drop(in_flight);

		Claim {
			resolved,
			joined,
			owned,
		}
	}

	/// Number of keys currently being loaded.
	pub fn in_flight(&self) -> usize {
		self.in_flight.lock().len()
	}

	fn fingerprint(&self, keys: &[Q]) -> u64 {
		let mut hasher = self.hasher.build_hasher();
		keys.len().hash(&mut hasher);
		for key in keys {
			key.hash(&mut hasher);
		}
		hasher.finish()
	}
}

impl<Q: Hash + Eq, V> LoadCoalescer<Q, V> {
	fn release(&self, flight: &Arc<Flight<Q, V>>, keys: &HashSet<Q>, result: Result<Loaded<Q, V>>) {
		{
			let mut in_flight = self.in_flight.lock();
			for key in keys {
				if in_flight.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
					in_flight.remove(key);
				}
			}
		}
		flight.release(result);
	}
}

/// A flight owned by the current caller.
///
/// Dropping it without calling [`finish`](OwnedFlight::finish), for example because the
/// loader panicked, releases every waiter with a loader failure.
pub(crate) struct OwnedFlight<'a, Q: Hash + Eq, V> {
	coalescer: &'a LoadCoalescer<Q, V>,
	flight: Arc<Flight<Q, V>>,
	keys: HashSet<Q>,
	released: bool,
}

impl<Q: Hash + Eq, V> OwnedFlight<'_, Q, V> {
	/// The keys this flight must load.
	pub fn keys(&self) -> &HashSet<Q> {
		&self.keys
	}

	pub fn fingerprint(&self) -> u64 {
		self.flight.fingerprint()
	}

	/// Publish the outcome to every waiter and leave the in-flight table.
	pub fn finish(mut self, result: Result<Loaded<Q, V>>) {
		self.released = true;
		self.coalescer.release(&self.flight, &self.keys, result);
	}
}

impl<Q: Hash + Eq, V> Drop for OwnedFlight<'_, Q, V> {
	fn drop(&mut self) {
		if !self.released {
			tracing::warn!(flight = self.flight.fingerprint(), "load abandoned before completion");
			self.coalescer.release(&self.flight, &self.keys, Err(CacheError::loader(LoaderPanicked)));
		}
	}
}

#[cfg(test)]
mod tests {
	use std::thread;
	use std::time::Duration;

	use super::*;

	type Store = CacheStore<u64, String>;

	#[test]
	fn test_claim_owns_missing_keys() {
		let store = Store::new();
		let absent = AbsentKeys::new();
		let coalescer = LoadCoalescer::new();

		let claim = coalescer.claim(&store, &absent, &[1, 2]);
		assert!(claim.resolved.is_empty());
		assert!(claim.joined.is_empty());
		let owned = claim.owned.unwrap();
		assert_eq!(owned.keys().len(), 2);
		assert_eq!(coalescer.in_flight(), 2);

		owned.finish(Ok(Arc::new(HashMap::new())));
		assert_eq!(coalescer.in_flight(), 0);
	}

	#[test]
	fn test_claim_joins_overlapping_flight() {
		let store = Store::new();
		let absent = AbsentKeys::new();
		let coalescer = LoadCoalescer::new();

		let first = coalescer.claim(&store, &absent, &[1, 2]).owned.unwrap();
		let second = coalescer.claim(&store, &absent, &[2, 3]);
		assert_eq!(second.joined.len(), 1);
		let second_owned = second.owned.unwrap();
		assert_eq!(second_owned.keys().iter().copied().collect::<Vec<_>>(), vec![3]);

		// A strict subset starts nothing new.
		let third = coalescer.claim(&store, &absent, &[1]);
		assert_eq!(third.joined.len(), 1);
		assert!(third.owned.is_none());

		first.finish(Ok(Arc::new(HashMap::new())));
		second_owned.finish(Ok(Arc::new(HashMap::new())));
	}

	#[test]
	fn test_claim_rechecks_store() {
		let store = Store::new();
		store.put(1, "one".to_string()).unwrap();
		let absent = AbsentKeys::new();
		let coalescer = LoadCoalescer::new();

		let claim = coalescer.claim(&store, &absent, &[1]);
		assert_eq!(claim.resolved.len(), 1);
		assert!(claim.owned.is_none());
	}

	#[test]
	fn test_waiters_receive_outcome() {
		let store = Arc::new(Store::new());
		let absent = AbsentKeys::new();
		let coalescer = Arc::new(LoadCoalescer::new());

		let joined = {
			let owned = coalescer.claim(&store, &absent, &[7]).owned.unwrap();
			let joined = coalescer.claim(&store, &absent, &[7]).joined;

			let handle = thread::spawn(move || joined[0].wait());
			thread::sleep(Duration::from_millis(10));

			let mut values = HashMap::new();
			values.insert(7u64, Arc::new("seven".to_string()));
			owned.finish(Ok(Arc::new(values)));
			handle.join().unwrap()
		};

		let values = joined.unwrap();
		assert_eq!(values.get(&7).map(|v| v.as_str()), Some("seven"));
	}

	#[test]
	fn test_abandoned_flight_fails_waiters() {
		let store = Store::new();
		let absent = AbsentKeys::new();
		let coalescer = LoadCoalescer::new();

		let owned = coalescer.claim(&store, &absent, &[1]).owned.unwrap();
		let joined = coalescer.claim(&store, &absent, &[1]).joined;
		drop(owned);

		let err = joined[0].wait().unwrap_err();
		assert!(err.is_loader_failure());
		assert_eq!(coalescer.in_flight(), 0);
	}

	#[test]
	fn test_claim_skips_absent_keys() {
		let store = Store::new();
		let absent = AbsentKeys::new();
		absent.extend([2u64]);
		let coalescer = LoadCoalescer::new();

		let claim = coalescer.claim(&store, &absent, &[2]);
		assert!(claim.resolved.is_empty());
		assert!(claim.joined.is_empty());
		assert!(claim.owned.is_none());
		assert_eq!(coalescer.in_flight(), 0);
	}
}
