//! Session domain types: token responses, user profiles, and session state snapshots.

// self
use crate::_prelude::*;

/// Token endpoint response body for both the code and refresh exchanges.
///
/// Consumed once to populate the session; only the persisted subset (access token, refresh
/// token, expiry, scopes) outlives it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Bearer access token.
	pub access_token: String,
	/// Token type reported by the provider (`bearer`).
	#[serde(default)]
	pub token_type: String,
	/// Lifetime of the access token in seconds.
	pub expires_in: Option<u64>,
	/// Rotated refresh token; providers are not required to return one on refresh.
	pub refresh_token: Option<String>,
	/// Space-joined granted scopes, when the grant narrowed or reordered them.
	pub scope: Option<String>,
	/// OIDC ID token, when the `openid` scope was granted.
	pub id_token: Option<String>,
}

/// OIDC userinfo subject profile.
///
/// Well-known claims are surfaced as fields; everything else lands in [`claims`](Self::claims).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
	/// Subject identifier.
	pub sub: String,
	/// Display name claim.
	pub name: Option<String>,
	/// Email claim.
	pub email: Option<String>,
	/// Email verification claim.
	pub email_verified: Option<bool>,
	/// Preferred username claim.
	pub preferred_username: Option<String>,
	/// Remaining claims returned by the userinfo endpoint.
	#[serde(flatten)]
	pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Read-only view of the current session.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
	/// Whether the session currently holds a usable access token.
	pub authenticated: bool,
	/// Cached user profile, when one has been fetched.
	pub user: Option<UserProfile>,
	/// Current access token.
	pub access_token: Option<String>,
	/// Current refresh token.
	pub refresh_token: Option<String>,
	/// Absolute access token expiry.
	pub expires_at: Option<OffsetDateTime>,
	/// Granted scopes.
	pub scopes: Vec<String>,
}

/// Mutable session state owned exclusively by the engine.
#[derive(Clone, Debug, Default)]
pub(crate) struct SessionState {
	pub authenticated: bool,
	pub user: Option<UserProfile>,
	pub access_token: Option<String>,
	pub refresh_token: Option<String>,
	pub expires_at: Option<OffsetDateTime>,
	pub scopes: Vec<String>,
}
impl SessionState {
	/// Whether the token should be treated as expired at `now`, applying the clock-skew leeway.
	pub fn is_expired_at(&self, now: OffsetDateTime, leeway: Duration) -> bool {
		match self.expires_at {
			Some(expires_at) => now >= expires_at - leeway,
			None => true,
		}
	}

	pub fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			authenticated: self.authenticated,
			user: self.user.clone(),
			access_token: self.access_token.clone(),
			refresh_token: self.refresh_token.clone(),
			expires_at: self.expires_at,
			scopes: self.scopes.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn expiry_check_applies_leeway() {
		let issued_at = OffsetDateTime::from_unix_timestamp(1_700_000_000)
			.expect("Timestamp fixture should be valid.");
		let state = SessionState {
			authenticated: true,
			access_token: Some("a".into()),
			expires_at: Some(issued_at + Duration::seconds(3600)),
			..Default::default()
		};
		let leeway = Duration::seconds(60);

		assert!(!state.is_expired_at(issued_at, leeway));
		assert!(!state.is_expired_at(issued_at + Duration::seconds(3539), leeway));
		// Expired exactly when now >= expires_at - leeway.
		assert!(state.is_expired_at(issued_at + Duration::seconds(3540), leeway));
		assert!(state.is_expired_at(issued_at + Duration::seconds(3600), leeway));
	}

	#[test]
	fn missing_expiry_is_treated_as_expired() {
		let state =
			SessionState { access_token: Some("a".into()), expires_at: None, ..Default::default() };

		assert!(state.is_expired_at(OffsetDateTime::now_utc(), Duration::seconds(60)));
	}

	#[test]
	fn token_response_round_trips_optional_fields() {
		let body = r#"{"access_token":"a","token_type":"bearer","expires_in":3600}"#;
		let response: TokenResponse =
			serde_json::from_str(body).expect("Minimal token response should deserialize.");

		assert_eq!(response.access_token, "a");
		assert_eq!(response.expires_in, Some(3600));
		assert_eq!(response.refresh_token, None);
		assert_eq!(response.scope, None);
		assert_eq!(response.id_token, None);
	}

	#[test]
	fn user_profile_collects_unknown_claims() {
		let body = r#"{"sub":"user-1","name":"Mito","locale":"ja-JP"}"#;
		let profile: UserProfile =
			serde_json::from_str(body).expect("Profile with extra claims should deserialize.");

		assert_eq!(profile.sub, "user-1");
		assert_eq!(profile.name.as_deref(), Some("Mito"));
		assert_eq!(profile.claims.get("locale").and_then(|v| v.as_str()), Some("ja-JP"));
	}
}
