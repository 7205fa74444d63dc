//! Client configuration resolution: validation, defaults, and derived endpoint URLs.

// std
use std::path::PathBuf;
// self
use crate::{_prelude::*, error::ConfigError, retry::RetryPolicy, store::SessionStore};

/// OAuth 2.0 response type used by the engine; the Authorization Code grant is the only
/// supported flow.
pub const RESPONSE_TYPE: &str = "code";

const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];
const DEFAULT_STORAGE_PREFIX: &str = "oauth2_session_";
const DEFAULT_STORAGE_FILE: &str = "oauth2_session_store.json";
const DEFAULT_CLOCK_SKEW_LEEWAY_SECS: u64 = 60;
const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;

/// Raw client configuration accepted by [`SessionEngine::new`](crate::session::SessionEngine::new).
///
/// Only `client_id` and `issuer` are required; everything else falls back to the defaults
/// documented on [`ClientConfig::resolve`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Issuer base URL; trailing slashes are trimmed before endpoint derivation.
	pub issuer: String,
	/// Redirect URI registered for the client.
	pub redirect_uri: Option<String>,
	/// Requested scopes, space-joined on the wire in the given order.
	pub scopes: Option<Vec<String>>,
	/// Storage backend selection.
	pub storage: Option<StorageSelection>,
	/// Namespace prefix applied to every storage key.
	pub storage_prefix: Option<String>,
	/// Clock-skew leeway in seconds subtracted from expiry when judging a token expired.
	pub clock_skew_leeway: Option<u64>,
	/// Seconds before expiry at which the proactive background refresh fires.
	pub refresh_threshold: Option<u64>,
	/// Total refresh attempts per retry chain.
	pub max_retries: Option<u32>,
	/// Fixed delay between refresh attempts.
	pub retry_interval: Option<StdDuration>,
	/// Extra query parameters appended to every authorization URL.
	pub additional_params: BTreeMap<String, String>,
}
impl ClientConfig {
	/// Creates a configuration with the two required fields set.
	pub fn new(client_id: impl Into<String>, issuer: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			issuer: issuer.into(),
			redirect_uri: None,
			scopes: None,
			storage: None,
			storage_prefix: None,
			clock_skew_leeway: None,
			refresh_threshold: None,
			max_retries: None,
			retry_interval: None,
			additional_params: BTreeMap::new(),
		}
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = Some(redirect_uri.into());

		self
	}

	/// Sets the requested scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = Some(scopes.into_iter().map(Into::into).collect());

		self
	}

	/// Selects the storage backend.
	pub fn with_storage(mut self, storage: StorageSelection) -> Self {
		self.storage = Some(storage);

		self
	}

	/// Overrides the storage key prefix.
	pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.storage_prefix = Some(prefix.into());

		self
	}

	/// Overrides the clock-skew leeway in seconds.
	pub fn with_clock_skew_leeway(mut self, secs: u64) -> Self {
		self.clock_skew_leeway = Some(secs);

		self
	}

	/// Overrides the proactive refresh threshold in seconds.
	pub fn with_refresh_threshold(mut self, secs: u64) -> Self {
		self.refresh_threshold = Some(secs);

		self
	}

	/// Overrides the retry policy applied to proactive and reactive refresh chains.
	pub fn with_retry(mut self, max_retries: u32, retry_interval: StdDuration) -> Self {
		self.max_retries = Some(max_retries);
		self.retry_interval = Some(retry_interval);

		self
	}

	/// Appends an extra authorization URL query parameter.
	pub fn with_additional_param(
		mut self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.additional_params.insert(key.into(), value.into());

		self
	}

	/// Validates the configuration and fills in defaults.
	///
	/// Defaults: scopes `openid profile email`, durable file storage, prefix
	/// `oauth2_session_`, 60 s clock-skew leeway, 300 s refresh threshold, 3 refresh attempts
	/// at a fixed 5 s interval, and a redirect URI of `<issuer origin>/auth/callback`.
	/// Pure and deterministic; no side effects.
	pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingClientId);
		}
		if self.issuer.trim().is_empty() {
			return Err(ConfigError::MissingIssuer);
		}

		let trimmed_issuer = self.issuer.trim_end_matches('/');
		let issuer =
			Url::parse(trimmed_issuer).map_err(|source| ConfigError::InvalidIssuer { source })?;
		let redirect_uri = match &self.redirect_uri {
			Some(raw) =>
				Url::parse(raw).map_err(|source| ConfigError::InvalidRedirect { source })?,
			None => default_redirect_uri(&issuer)?,
		};
		let endpoints = EndpointSet::derive(trimmed_issuer)?;
		let scopes = self
			.scopes
			.clone()
			.unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect());
		let retry = RetryPolicy::new(
			self.max_retries.unwrap_or(RetryPolicy::DEFAULT_MAX_RETRIES),
			self.retry_interval.unwrap_or(RetryPolicy::DEFAULT_RETRY_INTERVAL),
		);

		Ok(ResolvedConfig {
			client_id: self.client_id.clone(),
			issuer,
			redirect_uri,
			scopes,
			storage: self
				.storage
				.clone()
				.unwrap_or(StorageSelection::File { path: PathBuf::from(DEFAULT_STORAGE_FILE) }),
			storage_prefix: self
				.storage_prefix
				.clone()
				.unwrap_or_else(|| DEFAULT_STORAGE_PREFIX.into()),
			clock_skew_leeway: Duration::seconds(
				self.clock_skew_leeway.unwrap_or(DEFAULT_CLOCK_SKEW_LEEWAY_SECS) as i64,
			),
			refresh_threshold: Duration::seconds(
				self.refresh_threshold.unwrap_or(DEFAULT_REFRESH_THRESHOLD_SECS) as i64,
			),
			retry,
			additional_params: self.additional_params.clone(),
			endpoints,
		})
	}
}

/// Fully-specified configuration produced by [`ClientConfig::resolve`].
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Normalized issuer base URL without a trailing slash.
	pub issuer: Url,
	/// Redirect URI sent with authorization and code exchange requests.
	pub redirect_uri: Url,
	/// Requested scopes in wire order.
	pub scopes: Vec<String>,
	/// Storage backend selection.
	pub storage: StorageSelection,
	/// Namespace prefix applied to every storage key.
	pub storage_prefix: String,
	/// Leeway subtracted from expiry when judging a token expired.
	pub clock_skew_leeway: Duration,
	/// How long before actual expiry the proactive refresh fires.
	pub refresh_threshold: Duration,
	/// Retry policy applied to refresh chains.
	pub retry: RetryPolicy,
	/// Extra query parameters appended to every authorization URL.
	pub additional_params: BTreeMap<String, String>,
	/// Derived provider endpoint URLs.
	pub endpoints: EndpointSet,
}

/// The five provider endpoints derived from the issuer base URL.
#[derive(Clone, Debug)]
pub struct EndpointSet {
	/// Authorization endpoint receiving the end-user redirect.
	pub authorization: Url,
	/// Token endpoint for code and refresh exchanges.
	pub token: Url,
	/// OIDC userinfo endpoint.
	pub userinfo: Url,
	/// Token revocation endpoint; invoked by external collaborators, not this engine.
	pub revocation: Url,
	/// End-session endpoint; invoked by external collaborators, not this engine.
	pub end_session: Url,
}
impl EndpointSet {
	/// Derives the endpoint set by appending the well-known paths to a slash-trimmed issuer.
	pub fn derive(issuer: &str) -> Result<Self, ConfigError> {
		Ok(Self {
			authorization: endpoint(issuer, "/oauth2/authorize")?,
			token: endpoint(issuer, "/oauth2/token")?,
			userinfo: endpoint(issuer, "/oauth2/userinfo")?,
			revocation: endpoint(issuer, "/oauth2/revoke")?,
			end_session: endpoint(issuer, "/auth/logout")?,
		})
	}
}

/// Closed set of storage backend variants selectable at construction.
#[derive(Clone)]
pub enum StorageSelection {
	/// Durable JSON-file backend; the default.
	File {
		/// Snapshot file location.
		path: PathBuf,
	},
	/// Volatile in-process backend; the universal fallback.
	Memory,
	/// Caller-provided backend implementing [`SessionStore`].
	Custom(Arc<dyn SessionStore>),
}
impl Debug for StorageSelection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::File { path } => f.debug_struct("File").field("path", path).finish(),
			Self::Memory => f.write_str("Memory"),
			Self::Custom(_) => f.write_str("Custom(..)"),
		}
	}
}

fn endpoint(issuer: &str, path: &str) -> Result<Url, ConfigError> {
	Url::parse(&format!("{issuer}{path}")).map_err(|source| ConfigError::InvalidIssuer { source })
}

fn default_redirect_uri(issuer: &Url) -> Result<Url, ConfigError> {
	Url::parse(&format!("{}/auth/callback", issuer.origin().ascii_serialization()))
		.map_err(|source| ConfigError::InvalidRedirect { source })
}
