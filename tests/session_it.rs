// std
use std::{env, fs, process, sync::Arc};
// crates.io
use httpmock::prelude::*;
// self
use oauth2_session::{
	clock::{Clock, ManualClock},
	config::{ClientConfig, StorageSelection},
	events::{Event, EventKind},
	session::{LogoutOptions, SessionEngine},
	store::{FileStore, MemoryStore, SessionStore},
	time::{Duration, OffsetDateTime},
	url::Url,
};

const PREFIX: &str = "oauth2_session_";

async fn seed_session(
	backend: &dyn SessionStore,
	access_token: &str,
	refresh_token: Option<&str>,
	expires_at: OffsetDateTime,
) {
	backend
		.set(&format!("{PREFIX}access_token"), access_token)
		.await
		.expect("Seeding the access token should succeed.");
	backend
		.set(&format!("{PREFIX}expires_at"), &expires_at.unix_timestamp().to_string())
		.await
		.expect("Seeding the expiry should succeed.");
	backend
		.set(&format!("{PREFIX}scopes"), "openid profile")
		.await
		.expect("Seeding the scopes should succeed.");

	if let Some(refresh_token) = refresh_token {
		backend
			.set(&format!("{PREFIX}refresh_token"), refresh_token)
			.await
			.expect("Seeding the refresh token should succeed.");
	}
}

#[tokio::test]
async fn restored_session_expires_under_a_manual_clock() {
	let clock = ManualClock::new(
		OffsetDateTime::from_unix_timestamp(1_700_000_000)
			.expect("Timestamp fixture should be valid."),
	);
	let backend = Arc::new(MemoryStore::default());

	seed_session(backend.as_ref(), "seeded-access", None, clock.now()).await;

	let engine = SessionEngine::with_clock(
		ClientConfig::new("client-session", "https://id.example.com")
			.with_storage(StorageSelection::Custom(backend.clone())),
		Arc::new(clock.clone()),
	)
	.expect("Engine with a manual clock should construct.");

	// Seed the expiry relative to the frozen clock: valid for 120 s, 60 s leeway.
	backend
		.set(
			&format!("{PREFIX}expires_at"),
			&(clock.now() + Duration::seconds(120)).unix_timestamp().to_string(),
		)
		.await
		.expect("Re-seeding the expiry should succeed.");

	assert!(engine.restore().await, "A valid persisted session should restore.");
	assert!(engine.is_authenticated().await);
	assert_eq!(engine.get_access_token().await.as_deref(), Some("seeded-access"));
	assert_eq!(engine.snapshot().scopes, ["openid", "profile"]);
	assert!(!engine.refresh_scheduled(), "No refresh token means nothing to schedule.");

	// 120 s lifetime minus the 60 s leeway: stale from second 60 onwards.
	clock.advance(Duration::seconds(61));

	assert!(
		engine.get_access_token().await.is_none(),
		"An expired session without a refresh token cannot recover.",
	);
	assert!(!engine.is_authenticated().await);

	let snapshot = engine.snapshot();

	assert!(!snapshot.authenticated);
	assert!(snapshot.access_token.is_none());
	assert_eq!(
		backend
			.get(&format!("{PREFIX}access_token"))
			.await
			.expect("Backend read should succeed."),
		None,
		"Clearing the session must also clear storage.",
	);
}

#[tokio::test]
async fn cached_profile_is_not_served_past_expiry() {
	let server = MockServer::start_async().await;
	let backend = Arc::new(MemoryStore::default());
	let clock = ManualClock::new(OffsetDateTime::now_utc());

	seed_session(backend.as_ref(), "short-lived", None, clock.now() + Duration::seconds(120))
		.await;

	let engine = SessionEngine::with_clock(
		ClientConfig::new("client-session", server.base_url())
			.with_storage(StorageSelection::Custom(backend.clone())),
		Arc::new(clock.clone()),
	)
	.expect("Engine with a manual clock should construct.");
	let userinfo_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/userinfo");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"sub\":\"user-1\"}");
		})
		.await;

	assert!(engine.restore().await);
	assert!(
		engine.get_user().await.expect("Profile fetch should succeed.").is_some(),
		"A fresh session should fetch and cache the profile.",
	);

	// 120 s lifetime minus the 60 s leeway: stale from second 60 onwards.
	clock.advance(Duration::seconds(61));

	assert!(
		engine
			.get_user()
			.await
			.expect("An expired session should quietly yield no user.")
			.is_none(),
		"The cached profile must not outlive the session.",
	);
	assert!(!engine.snapshot().authenticated);
	userinfo_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn restore_clears_an_already_expired_session() {
	let backend = Arc::new(MemoryStore::default());

	seed_session(
		backend.as_ref(),
		"long-gone",
		Some("also-gone"),
		OffsetDateTime::now_utc() - Duration::hours(2),
	)
	.await;

	let engine = SessionEngine::new(
		ClientConfig::new("client-session", "https://id.example.com")
			.with_storage(StorageSelection::Custom(backend.clone())),
	)
	.expect("Engine should construct.");

	assert!(!engine.restore().await, "An expired persisted session must not restore.");
	assert!(!engine.refresh_scheduled());
	assert_eq!(
		backend
			.get(&format!("{PREFIX}refresh_token"))
			.await
			.expect("Backend read should succeed."),
		None,
		"Restoring an expired session must clear storage.",
	);
}

#[tokio::test]
async fn restore_rejects_a_malformed_expiry() {
	let backend = Arc::new(MemoryStore::default());

	seed_session(backend.as_ref(), "whatever", None, OffsetDateTime::now_utc()).await;
	backend
		.set(&format!("{PREFIX}expires_at"), "not-a-number")
		.await
		.expect("Seeding a corrupt expiry should succeed.");

	let engine = SessionEngine::new(
		ClientConfig::new("client-session", "https://id.example.com")
			.with_storage(StorageSelection::Custom(backend.clone())),
	)
	.expect("Engine should construct.");

	assert!(!engine.restore().await);
	assert_eq!(
		backend
			.get(&format!("{PREFIX}access_token"))
			.await
			.expect("Backend read should succeed."),
		None,
	);
}

#[tokio::test]
async fn file_backed_session_survives_a_process_restart() {
	let path = env::temp_dir().join(format!(
		"oauth2_session_it_{}_{}.json",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	));
	let seed = FileStore::open(&path).expect("File store should open at a temporary path.");

	seed_session(
		&seed,
		"durable-access",
		Some("durable-refresh"),
		OffsetDateTime::now_utc() + Duration::hours(1),
	)
	.await;
	drop(seed);

	// A fresh engine over the same file stands in for the restarted process.
	let engine = SessionEngine::new(
		ClientConfig::new("client-session", "https://id.example.com")
			.with_storage(StorageSelection::File { path: path.clone() })
			.with_refresh_threshold(1),
	)
	.expect("Engine over the file store should construct.");

	assert!(engine.restore().await, "The persisted session should survive the restart.");
	assert_eq!(engine.get_access_token().await.as_deref(), Some("durable-access"));
	assert!(engine.refresh_scheduled(), "A restored refresh token should arm the timer.");

	let events = Arc::new(std::sync::Mutex::new(Vec::new()));
	let sink = events.clone();

	engine.on(EventKind::Unauthenticated, move |event| {
		sink.lock().expect("Event sink lock should not be poisoned.").push(event.clone())
	});

	let handoff = engine
		.logout(LogoutOptions::default())
		.await
		.expect("A full logout should produce a handoff.");

	assert_eq!(handoff.access_token.as_deref(), Some("durable-access"));
	assert_eq!(handoff.refresh_token.as_deref(), Some("durable-refresh"));
	assert_eq!(
		handoff.revocation_endpoint,
		Url::parse("https://id.example.com/oauth2/revoke").expect("Endpoint fixture should parse."),
	);
	assert_eq!(
		handoff.end_session_endpoint,
		Url::parse("https://id.example.com/auth/logout").expect("Endpoint fixture should parse."),
	);
	assert!(!engine.refresh_scheduled(), "Logout must disarm the proactive timer.");
	assert_eq!(events.lock().expect("Event sink lock should not be poisoned.").len(), 1);
	assert!(matches!(
		events.lock().expect("Event sink lock should not be poisoned.")[0],
		Event::Unauthenticated,
	));

	// The cleared state is durable as well.
	let reopened = FileStore::open(&path).expect("File store should reopen.");

	assert_eq!(
		reopened
			.get(&format!("{PREFIX}access_token"))
			.await
			.expect("Backend read should succeed."),
		None,
	);

	fs::remove_file(&path).unwrap_or_else(|e| {
		panic!("Failed to remove temporary store snapshot {}: {e}", path.display())
	});
}

#[tokio::test]
async fn local_only_logout_skips_the_handoff() {
	let engine = SessionEngine::new(
		ClientConfig::new("client-session", "https://id.example.com")
			.with_storage(StorageSelection::Memory),
	)
	.expect("Engine should construct.");

	assert!(engine.logout(LogoutOptions { local_only: true }).await.is_none());
}
