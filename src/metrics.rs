//! Cache performance metrics.

/// Point-in-time counters for a [`BatchCache`](crate::BatchCache).
///
/// # Example
///
/// ```ignore
/// let metrics = cache.metrics();
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// println!("Loader calls: {}", metrics.loads);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
	/// Composite keys found resident on lookup.
	pub hits: u64,
	/// Composite keys absent on lookup.
	pub misses: u64,
	/// Loader invocations.
	pub loads: u64,
	/// Resolve calls that waited on a load started by another caller.
	pub joins: u64,
	/// Entries written to the store.
	pub inserts: u64,
	/// Entries evicted by the eviction policy.
	pub evictions: u64,
	/// Current number of resident entries.
	pub entry_count: usize,
	/// Current total deep size in bytes.
	pub size_bytes: usize,
}

impl CacheMetrics {
	/// Hit rate as a ratio between 0.0 and 1.0.
	///
	/// Returns 0.0 if there have been no lookups.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_accesses();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Total lookups (hits + misses).
	pub fn total_accesses(&self) -> u64 {
		self.hits + self.misses
	}
}
