//! Token endpoint and userinfo wire client.
//!
//! The exchanges here are plain network calls with no retry of their own; the retry machinery
//! in [`retry`](crate::retry) is layered on top. Non-success responses are classified by HTTP
//! status range, but an OAuth 2.0 `{error, ...}` body takes precedence over the status mapping
//! regardless of the status it arrived with.

// crates.io
use reqwest::redirect::Policy;
// self
use crate::{
	_prelude::*,
	auth::{TokenResponse, UserProfile},
	config::EndpointSet,
	error::{ConfigError, TransportError},
};

/// Client for the token and userinfo endpoints of a single provider.
pub struct TokenClient {
	client: ReqwestClient,
	endpoints: EndpointSet,
	client_id: String,
}
impl TokenClient {
	/// Builds a client with a fresh transport.
	///
	/// Token requests must not follow redirects; token endpoints return results directly
	/// instead of delegating to another URI, so redirect following is disabled here and should
	/// stay disabled on any transport passed to [`TokenClient::with_client`].
	pub fn new(endpoints: EndpointSet, client_id: impl Into<String>) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_client(client, endpoints, client_id))
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(
		client: ReqwestClient,
		endpoints: EndpointSet,
		client_id: impl Into<String>,
	) -> Self {
		Self { client, endpoints, client_id: client_id.into() }
	}

	/// Exchanges an authorization code plus its PKCE verifier for a token set.
	pub async fn exchange_code(
		&self,
		code: &str,
		verifier: &str,
		redirect_uri: &Url,
	) -> Result<TokenResponse> {
		self.token_request(&[
			("grant_type", "authorization_code"),
			("client_id", &self.client_id),
			("code", code),
			("redirect_uri", redirect_uri.as_str()),
			("code_verifier", verifier),
		])
		.await
	}

	/// Exchanges a refresh token for a new token set.
	pub async fn exchange_refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
		self.token_request(&[
			("grant_type", "refresh_token"),
			("client_id", &self.client_id),
			("refresh_token", refresh_token),
		])
		.await
	}

	/// Fetches the subject profile with a bearer authorization header.
	pub async fn fetch_user_info(&self, access_token: &str) -> Result<UserProfile> {
		let response = self
			.client
			.get(self.endpoints.userinfo.clone())
			.bearer_auth(access_token)
			.send()
			.await
			.map_err(TransportError::from)?;
		let status = response.status();
		let bytes = response.bytes().await.map_err(TransportError::from)?;

		if !status.is_success() {
			return Err(Error::InvalidToken {
				reason: format!(
					"userinfo endpoint rejected the access token with status {}",
					status.as_u16()
				),
			});
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut deserializer).map_err(|e| Error::InvalidToken {
			reason: format!("userinfo response is malformed at {}: {}", e.path(), e.inner()),
		})
	}

	async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
		let response = self
			.client
			.post(self.endpoints.token.clone())
			.form(form)
			.send()
			.await
			.map_err(TransportError::from)?;
		let status = response.status();
		let bytes = response.bytes().await.map_err(TransportError::from)?;

		if let Some(err) = oauth2_error_from_body(&bytes) {
			return Err(err);
		}
		if !status.is_success() {
			return Err(classify_status(status));
		}

		parse_token_response(status, &bytes)
	}
}
impl Debug for TokenClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenClient")
			.field("token_endpoint", &self.endpoints.token)
			.field("client_id", &self.client_id)
			.finish()
	}
}

#[derive(Deserialize)]
struct OAuth2ErrorBody {
	error: String,
	error_description: Option<String>,
	error_uri: Option<String>,
}

fn oauth2_error_from_body(bytes: &[u8]) -> Option<Error> {
	let body: OAuth2ErrorBody = serde_json::from_slice(bytes).ok()?;

	Some(Error::from_oauth2_code(
		&body.error,
		body.error_description.as_deref(),
		body.error_uri.as_deref(),
	))
}

fn classify_status(status: StatusCode) -> Error {
	let code = status.as_u16();
	let reason = status.canonical_reason().unwrap_or("unknown status").to_owned();

	if status.is_server_error() {
		Error::Server { status: Some(code), reason }
	} else if status.is_client_error() {
		Error::Request { status: code, reason }
	} else {
		Error::UnexpectedResponse { status: code, reason }
	}
}

fn parse_token_response(status: StatusCode, bytes: &[u8]) -> Result<TokenResponse> {
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|e| Error::UnexpectedResponse {
		status: status.as_u16(),
		reason: format!("token endpoint returned malformed JSON at {}: {}", e.path(), e.inner()),
	})
}
