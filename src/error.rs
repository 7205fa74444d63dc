//! Engine-level error taxonomy shared across configuration, storage, transport, and flows.
//!
//! Every variant is cheap to clone so a raised error can simultaneously be returned to the
//! caller and published on the event bus; external error sources are therefore held behind
//! [`Arc`] rather than `Box`.

// std
use std::error::Error as StdError;
// self
use crate::{_prelude::*, store::StoreError};

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// PKCE material could not be generated or recovered from storage.
	#[error("PKCE material is unavailable: {reason}.")]
	Pkce {
		/// Human-readable failure summary.
		reason: String,
	},
	/// Anti-CSRF state mismatch or unparseable callback URL.
	#[error("Callback validation failed: {reason}.")]
	InvalidState {
		/// Human-readable failure summary.
		reason: String,
	},
	/// Generic OAuth 2.0 failure; the default mapping for provider error codes.
	#[error("Authentication failed: {reason}.")]
	AuthenticationFailed {
		/// Human-readable failure summary.
		reason: String,
		/// RFC 6749 error code reported by the provider, when one was present.
		code: Option<String>,
	},
	/// The end user or provider denied the authorization request (`access_denied`).
	#[error("Authorization was denied by the user or the provider.")]
	AuthorizationDenied {
		/// Provider-supplied `error_description`, when present.
		description: Option<String>,
	},
	/// Provider-side failure (`server_error`, `temporarily_unavailable`, HTTP >= 500).
	#[error("Authorization server error: {reason}.")]
	Server {
		/// HTTP status code, when the failure came from a status mapping.
		status: Option<u16>,
		/// Human-readable failure summary.
		reason: String,
	},
	/// Request rejected with an HTTP 4xx status on a token or userinfo call.
	#[error("The authorization server rejected the request ({status}): {reason}.")]
	Request {
		/// HTTP status code in the 400-499 range.
		status: u16,
		/// Human-readable failure summary.
		reason: String,
	},
	/// Response outside the expected status ranges, or a malformed response body.
	#[error("Unexpected response from the authorization server ({status}): {reason}.")]
	UnexpectedResponse {
		/// HTTP status code returned by the endpoint.
		status: u16,
		/// Human-readable failure summary.
		reason: String,
	},
	/// Access token is expired or unreadable, or the userinfo fetch was rejected.
	#[error("Access token is invalid: {reason}.")]
	InvalidToken {
		/// Human-readable failure summary.
		reason: String,
	},
	/// Terminal refresh failure after a manual attempt or exhausted retries.
	#[error("Token refresh failed.")]
	TokenRefreshFailed {
		/// Underlying failure of the final attempt, when one exists.
		#[source]
		source: Option<Box<Error>>,
	},
	/// Platform lacks a required cryptographic primitive.
	#[error("Platform lacks a required primitive: {missing}.")]
	UnsupportedPlatform {
		/// Name of the missing primitive.
		missing: &'static str,
	},
}
impl Error {
	/// Maps an RFC 6749 error code from an authorization redirect or token response body into
	/// the engine taxonomy.
	pub fn from_oauth2_code(
		code: &str,
		description: Option<&str>,
		error_uri: Option<&str>,
	) -> Self {
		let mut reason = description
			.map(str::to_owned)
			.unwrap_or_else(|| "the authorization server rejected the request".into());

		if let Some(uri) = error_uri {
			reason.push_str(&format!(" (see {uri})"));
		}

		match code {
			"access_denied" =>
				Self::AuthorizationDenied { description: description.map(str::to_owned) },
			"server_error" | "temporarily_unavailable" => Self::Server { status: None, reason },
			other => Self::AuthenticationFailed { reason, code: Some(other.to_owned()) },
		}
	}
}

/// Configuration and validation failures raised by the engine.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// Client identifier was missing or empty.
	#[error("Client identifier must not be empty.")]
	MissingClientId,
	/// Issuer base URL was missing or empty.
	#[error("Issuer URL must not be empty.")]
	MissingIssuer,
	/// Issuer base URL cannot be parsed.
	#[error("Issuer URL is invalid.")]
	InvalidIssuer {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URI cannot be parsed or derived.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the authorization server.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth2_code_mapping_covers_the_taxonomy() {
		assert!(matches!(
			Error::from_oauth2_code("access_denied", Some("user cancelled"), None),
			Error::AuthorizationDenied { description: Some(_) }
		));
		assert!(matches!(
			Error::from_oauth2_code("server_error", None, None),
			Error::Server { status: None, .. }
		));
		assert!(matches!(
			Error::from_oauth2_code("temporarily_unavailable", None, None),
			Error::Server { .. }
		));

		let err = Error::from_oauth2_code("invalid_grant", Some("code expired"), None);

		match err {
			Error::AuthenticationFailed { reason, code } => {
				assert_eq!(reason, "code expired");
				assert_eq!(code.as_deref(), Some("invalid_grant"));
			},
			other => panic!("invalid_grant should map to AuthenticationFailed, got {other:?}"),
		}
	}

	#[test]
	fn store_error_converts_into_engine_error_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let engine_error: Error = store_error.clone().into();

		assert!(matches!(engine_error, Error::Storage(_)));
		assert!(engine_error.to_string().contains("disk full"));

		let source = StdError::source(&engine_error)
			.expect("Engine error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn errors_remain_cloneable_for_event_publication() {
		let err = Error::TokenRefreshFailed {
			source: Some(Box::new(Error::Server { status: Some(503), reason: "down".into() })),
		};
		let cloned = err.clone();

		assert!(matches!(cloned, Error::TokenRefreshFailed { source: Some(_) }));
	}
}
