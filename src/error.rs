use std::error::Error as StdError;
use std::sync::Arc;

/// Shared, type-erased loader error.
///
/// Wrapped in an `Arc` so that one failure can be handed to every caller
/// waiting on the same load.
pub type LoaderError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by the cache.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
	/// A range key could not be expanded into its elements.
	///
	/// Raised before any cache state is touched.
	#[error("invalid range: {reason}")]
	InvalidRange {
		/// Why the range was rejected.
		reason: String,
	},

	/// A value different from the resident one was written for a key.
	///
	/// This is a loader bug and is never retried.
	#[error("conflicting value written for already cached key {key}")]
	DuplicateKeyConflict {
		/// Debug rendering of the offending composite key.
		key: String,
	},

	/// The user-supplied loader failed.
	#[error("loader failed: {0}")]
	LoaderFailure(#[source] LoaderError),

	/// Pre-warming or a completeness check was requested without a
	/// potential-keys provider.
	#[error("no potential keys provider configured")]
	NoPotentialKeys,
}

impl CacheError {
	/// Build an `InvalidRange` error from anything printable.
	pub fn invalid_range(reason: impl Into<String>) -> Self {
		Self::InvalidRange {
			reason: reason.into(),
		}
	}

	/// Wrap a loader error.
	pub fn loader<E>(err: E) -> Self
	where
		E: StdError + Send + Sync + 'static,
	{
		Self::LoaderFailure(Arc::new(err))
	}

	pub(crate) fn conflict(key: &impl std::fmt::Debug) -> Self {
		Self::DuplicateKeyConflict {
			key: format!("{key:?}"),
		}
	}

	/// Returns true for the wrapped loader failure variant.
	pub fn is_loader_failure(&self) -> bool {
		matches!(self, Self::LoaderFailure(_))
	}
}

/// Reported to callers waiting on a load whose owner never finished it, typically
/// because the loader panicked.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("loader panicked before finishing the load")]
pub struct LoaderPanicked;

/// Crate result alias.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;
