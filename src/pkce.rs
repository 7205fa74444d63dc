//! PKCE (RFC 7636) challenge generation and the anti-CSRF state value.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore, TryRngCore, distr::Alphanumeric, rngs::OsRng};
use sha2::{Digest, Sha256};

const VERIFIER_LEN: usize = 128;
const STATE_LEN: usize = 32;
// RFC 7636 unreserved characters.
const VERIFIER_CHARSET: &[u8] =
	b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// A verifier/challenge pair created at authorization start and consumed exactly once by
/// callback handling.
#[derive(Clone)]
pub struct PkceChallenge {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkceChallenge {
	/// Generates a fresh high-entropy verifier and its S256 challenge.
	pub fn generate() -> Self {
		let verifier = random_verifier(VERIFIER_LEN);
		let challenge = compute_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}

	/// Secret code verifier sent with the code exchange.
	pub fn verifier(&self) -> &str {
		&self.verifier
	}

	/// Base64URL-encoded SHA-256 digest of the verifier, sent with the authorization request.
	pub fn challenge(&self) -> &str {
		&self.challenge
	}

	/// Challenge method (currently always `S256`).
	pub fn method(&self) -> PkceCodeChallengeMethod {
		self.method
	}
}
impl std::fmt::Debug for PkceChallenge {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("PkceChallenge")
			.field("challenge", &self.challenge)
			.field("method", &self.method)
			.finish()
	}
}

/// Computes the S256 code challenge for a verifier: Base64URL without padding over the SHA-256
/// digest of the verifier's UTF-8 bytes.
pub fn compute_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generates an independent random state value for anti-CSRF binding of the redirect.
pub fn random_state() -> String {
	rand::rng().sample_iter(Alphanumeric).take(STATE_LEN).map(char::from).collect()
}

fn random_verifier(len: usize) -> String {
	let mut bytes = vec![0_u8; len];

	if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
		tracing::warn!(
			error = %e,
			"OS entropy source is unavailable; falling back to the thread-local generator.",
		);

		rand::rng().fill_bytes(&mut bytes);
	}

	bytes.into_iter().map(|b| VERIFIER_CHARSET[b as usize % VERIFIER_CHARSET.len()] as char).collect()
}
