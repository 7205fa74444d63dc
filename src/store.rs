//! Storage contracts and built-in backends for persisted session data.
//!
//! The engine never interprets stored values; every backend is an opaque string store. All
//! keys are namespaced through [`PrefixedStore`] before reaching a backend.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Persisted session keys (written under the configured prefix).
pub(crate) const KEY_ACCESS_TOKEN: &str = "access_token";
pub(crate) const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub(crate) const KEY_EXPIRES_AT: &str = "expires_at";
pub(crate) const KEY_SCOPES: &str = "scopes";
/// Transient single-use keys written by authorization start and consumed by the callback.
pub(crate) const KEY_PKCE_VERIFIER: &str = "pkce_code_verifier";
pub(crate) const KEY_PKCE_STATE: &str = "pkce_state";
pub(crate) const KEY_PKCE_REDIRECT: &str = "pkce_redirect_uri";

/// Boxed future returned by [`SessionStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by session stores.
///
/// `get` of a missing key must return `Ok(None)` rather than an error; `set` failures (e.g.
/// quota exhaustion) must surface a [`StoreError`] so the caller can decide whether to proceed
/// without persistence.
pub trait SessionStore
where
	Self: Send + Sync,
{
	/// Fetches the value stored under `key`, if present.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Persists or replaces the value stored under `key`.
	fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

	/// Removes the value stored under `key`; removing a missing key is not an error.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

	/// Removes every value held by the backend.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`SessionStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Namespacing wrapper that prepends the configured prefix to every key before delegating to
/// the underlying backend.
#[derive(Clone)]
pub struct PrefixedStore {
	prefix: String,
	backend: Arc<dyn SessionStore>,
}
impl PrefixedStore {
	/// Wraps a backend with the provided key prefix.
	pub fn new(prefix: impl Into<String>, backend: Arc<dyn SessionStore>) -> Self {
		Self { prefix: prefix.into(), backend }
	}

	/// Fetches the namespaced value stored under `key`.
	pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		self.backend.get(&self.namespaced(key)).await
	}

	/// Persists the namespaced value under `key`.
	pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self.backend.set(&self.namespaced(key), value).await
	}

	/// Removes the namespaced value stored under `key`.
	pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.backend.remove(&self.namespaced(key)).await
	}

	/// Clears the underlying backend.
	pub async fn clear(&self) -> Result<(), StoreError> {
		self.backend.clear().await
	}

	fn namespaced(&self, key: &str) -> String {
		format!("{}{key}", self.prefix)
	}
}
impl Debug for PrefixedStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PrefixedStore").field("prefix", &self.prefix).finish()
	}
}
