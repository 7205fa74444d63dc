//! The session engine: authorization start, callback handling, refresh, and logout.
//!
//! One [`SessionEngine`] per [`ClientConfig`] owns the in-memory session state and is the only
//! component that mutates persisted session data. Refresh exchanges are serialized through an
//! async mutex so concurrent triggers collapse into a single provider call, and the proactive
//! refresh timer is epoch-checked so a timer armed before a logout or an earlier token set can
//! neither resurrect a cleared session nor destroy its replacement.

// self
use crate::{
	_prelude::*,
	auth::{SessionSnapshot, SessionState, TokenResponse, UserProfile},
	clock::{Clock, SystemClock},
	config::{ClientConfig, RESPONSE_TYPE, ResolvedConfig, StorageSelection},
	events::{Event, EventKind, EventListeners, ListenerId},
	http::TokenClient,
	pkce::{self, PkceChallenge},
	retry::RefreshScheduler,
	store::{
		FileStore, KEY_ACCESS_TOKEN, KEY_EXPIRES_AT, KEY_PKCE_REDIRECT, KEY_PKCE_STATE,
		KEY_PKCE_VERIFIER, KEY_REFRESH_TOKEN, KEY_SCOPES, MemoryStore, PrefixedStore,
	},
};

/// Per-call options for [`SessionEngine::start_auth`].
#[derive(Clone, Debug, Default)]
pub struct AuthOptions {
	/// Scope override for this authorization request.
	pub scopes: Option<Vec<String>>,
	/// Redirect URI override; the override is remembered and presented again during the code
	/// exchange, so it must be registered with the provider like the configured one.
	pub redirect_uri: Option<Url>,
	/// Caller-supplied anti-CSRF state; a random one is generated when absent.
	pub state: Option<String>,
	/// Extra query parameters for this authorization URL; they override same-named configured
	/// parameters.
	pub additional_params: BTreeMap<String, String>,
}
impl AuthOptions {
	/// Overrides the requested scopes for this call.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = Some(scopes.into_iter().map(Into::into).collect());

		self
	}

	/// Overrides the redirect URI for this call.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Supplies the anti-CSRF state instead of generating one.
	pub fn with_state(mut self, state: impl Into<String>) -> Self {
		self.state = Some(state.into());

		self
	}

	/// Appends an extra authorization URL query parameter for this call.
	pub fn with_additional_param(
		mut self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.additional_params.insert(key.into(), value.into());

		self
	}
}

/// Per-call options for [`SessionEngine::logout`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogoutOptions {
	/// Clears local state only, without producing a provider-side handoff.
	pub local_only: bool,
}

/// Everything a caller needs to send the end user to the provider.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Fully composed authorization endpoint URL.
	pub authorize_url: Url,
	/// Anti-CSRF state bound to this request.
	pub state: String,
	/// Redirect URI the provider will send the end user back to.
	pub redirect_uri: Url,
}

/// Material handed to the caller after a logout so it can revoke the tokens and end the
/// provider session; the engine itself never calls these endpoints.
#[derive(Clone, Debug)]
pub struct LogoutHandoff {
	/// Access token held at logout time.
	pub access_token: Option<String>,
	/// Refresh token held at logout time.
	pub refresh_token: Option<String>,
	/// Provider token revocation endpoint.
	pub revocation_endpoint: Url,
	/// Provider end-session endpoint.
	pub end_session_endpoint: Url,
}

/// OAuth 2.0 Authorization Code + PKCE session engine.
///
/// Cheap to clone; clones share the same session state, storage, and event listeners.
#[derive(Clone)]
pub struct SessionEngine(Arc<EngineInner>);
impl SessionEngine {
	/// Builds an engine from the provided configuration using the wall clock.
	pub fn new(config: ClientConfig) -> Result<Self> {
		Self::with_clock(config, Arc::new(SystemClock))
	}

	/// Builds an engine with an explicit [`Clock`]; intended for tests and simulations.
	pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
		let config = config.resolve()?;
		let backend: Arc<dyn crate::store::SessionStore> = match config.storage.clone() {
			StorageSelection::File { path } => Arc::new(FileStore::open(path)?),
			StorageSelection::Memory => Arc::new(MemoryStore::default()),
			StorageSelection::Custom(custom) => custom,
		};
		let store = PrefixedStore::new(config.storage_prefix.clone(), backend);
		let http = TokenClient::new(config.endpoints.clone(), config.client_id.clone())?;

		Ok(Self(Arc::new(EngineInner {
			config,
			store,
			http,
			state: RwLock::new(SessionState::default()),
			events: EventListeners::default(),
			scheduler: RefreshScheduler::default(),
			refresh_lock: AsyncMutex::new(()),
			clock,
		})))
	}

	/// Begins an authorization request: generates the PKCE pair and state, persists them for
	/// the callback, and composes the authorization URL for the caller to navigate to.
	///
	/// Nothing about the current session changes; an existing session survives an abandoned
	/// authorization attempt.
	pub async fn start_auth(&self, options: AuthOptions) -> Result<AuthorizationRequest> {
		let inner = &self.0;
		let pkce = PkceChallenge::generate();
		let state = options.state.clone().unwrap_or_else(pkce::random_state);
		let redirect_uri =
			options.redirect_uri.clone().unwrap_or_else(|| inner.config.redirect_uri.clone());

		for (key, value) in [
			(KEY_PKCE_VERIFIER, pkce.verifier()),
			(KEY_PKCE_STATE, state.as_str()),
			(KEY_PKCE_REDIRECT, redirect_uri.as_str()),
		] {
			if let Err(e) = inner.store.set(key, value).await {
				return Err(inner.raise(e.into()));
			}
		}

		let scope = options
			.scopes
			.as_ref()
			.unwrap_or(&inner.config.scopes)
			.join(" ");
		let mut params = inner.config.additional_params.clone();

		params.extend(options.additional_params);

		let mut authorize_url = inner.config.endpoints.authorization.clone();

		{
			let mut pairs = authorize_url.query_pairs_mut();

			pairs
				.append_pair("response_type", RESPONSE_TYPE)
				.append_pair("client_id", &inner.config.client_id)
				.append_pair("redirect_uri", redirect_uri.as_str())
				.append_pair("scope", &scope)
				.append_pair("state", &state)
				.append_pair("code_challenge", pkce.challenge())
				.append_pair("code_challenge_method", pkce.method().as_str());

			for (key, value) in &params {
				pairs.append_pair(key, value);
			}
		}

		tracing::debug!(state = %state, "Composed authorization request.");

		Ok(AuthorizationRequest { authorize_url, state, redirect_uri })
	}

	/// Completes the authorization by validating the provider callback and exchanging the code.
	///
	/// The persisted PKCE material is single-use: it is consumed on first read and removed
	/// whether or not the exchange succeeds, so a replayed callback always fails validation.
	/// Returns the raw token response; the established session is observable through
	/// [`snapshot`](Self::snapshot).
	pub async fn handle_callback(&self, callback_url: &str) -> Result<TokenResponse> {
		match Self::callback_flow(&self.0, callback_url).await {
			Ok(response) => Ok(response),
			Err(e) => Err(self.0.raise(e)),
		}
	}

	async fn callback_flow(
		this: &Arc<EngineInner>,
		callback_url: &str,
	) -> Result<TokenResponse> {
		let url = Url::parse(callback_url).map_err(|e| Error::InvalidState {
			reason: format!("callback URL is unparseable: {e}"),
		})?;
		let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

		// Provider-reported errors take precedence and never touch the stored PKCE material.
		if let Some(code) = params.get("error") {
			return Err(Error::from_oauth2_code(
				code,
				params.get("error_description").map(String::as_str),
				params.get("error_uri").map(String::as_str),
			));
		}

		let code = params.get("code").ok_or_else(|| Error::AuthenticationFailed {
			reason: "callback is missing the code parameter".into(),
			code: None,
		})?;
		let state = params
			.get("state")
			.ok_or_else(|| Error::InvalidState { reason: "callback is missing the state parameter".into() })?;
		let stored_state = this.store.get(KEY_PKCE_STATE).await?;
		let stored_verifier = this.store.get(KEY_PKCE_VERIFIER).await?;
		let stored_redirect = this.store.get(KEY_PKCE_REDIRECT).await?;

		// Consumed on read; a second callback with the same material must not validate.
		for key in [KEY_PKCE_STATE, KEY_PKCE_VERIFIER, KEY_PKCE_REDIRECT] {
			if let Err(e) = this.store.remove(key).await {
				tracing::warn!(key, error = %e, "Failed to remove a transient authorization key.");
			}
		}

		let stored_state = stored_state.ok_or_else(|| Error::InvalidState {
			reason: "no authorization request is pending".into(),
		})?;
		let verifier = stored_verifier.ok_or_else(|| Error::Pkce {
			reason: "stored code verifier is missing".into(),
		})?;

		if *state != stored_state {
			return Err(Error::InvalidState {
				reason: "state parameter does not match the pending authorization".into(),
			});
		}

		let redirect_uri = match stored_redirect {
			Some(raw) => Url::parse(&raw).map_err(|e| Error::InvalidState {
				reason: format!("stored redirect URI is unparseable: {e}"),
			})?,
			None => this.config.redirect_uri.clone(),
		};
		let response = this.http.exchange_code(code, &verifier, &redirect_uri).await?;

		EngineInner::save_session(this, &response, true).await?;

		Ok(response)
	}

	/// Whether the session currently holds a usable access token.
	///
	/// An expired token with a refresh token available triggers a reactive, retry-bounded
	/// refresh; if the whole chain fails the session is cleared and `false` is returned. This
	/// method is fail-safe and never raises.
	pub async fn is_authenticated(&self) -> bool {
		let inner = &self.0;
		let (has_token, has_refresh, stale) = {
			let state = inner.state.read();

			(
				state.access_token.is_some(),
				state.refresh_token.is_some(),
				state.is_expired_at(inner.clock.now(), inner.config.clock_skew_leeway),
			)
		};

		if !has_token {
			return false;
		}
		if !stale {
			return true;
		}
		if !has_refresh {
			EngineInner::clear_session(inner).await;

			return false;
		}

		match inner.config.retry.run(|| EngineInner::refresh_if_stale(inner)).await {
			Ok(()) => true,
			Err(e) => {
				tracing::warn!(error = %e, "Reactive refresh failed; clearing the session.");

				EngineInner::clear_session(inner).await;

				false
			},
		}
	}

	/// Returns the cached user profile, fetching it from the userinfo endpoint when the session
	/// is authenticated but no profile has been cached yet.
	///
	/// Gates on [`is_authenticated`](Self::is_authenticated) before the cache is consulted, so
	/// an expired session never serves a stale profile and a refreshable one is refreshed first.
	pub async fn get_user(&self) -> Result<Option<UserProfile>> {
		let inner = &self.0;

		if !self.is_authenticated().await {
			return Ok(None);
		}

		let cached = inner.state.read().user.clone();

		if cached.is_some() {
			return Ok(cached);
		}

		let Some(access_token) = inner.state.read().access_token.clone() else {
			return Ok(None);
		};

		match inner.http.fetch_user_info(&access_token).await {
			Ok(profile) => {
				inner.state.write().user = Some(profile.clone());

				Ok(Some(profile))
			},
			Err(e) => Err(inner.raise(e)),
		}
	}

	/// Returns the current access token, gating on
	/// [`is_authenticated`](Self::is_authenticated) so a stale-but-refreshable session hands
	/// back a fresh token instead of `None`.
	pub async fn get_access_token(&self) -> Option<String> {
		if !self.is_authenticated().await {
			return None;
		}

		self.0.state.read().access_token.clone()
	}

	/// Performs a single manual refresh exchange.
	///
	/// Unlike the scheduled chains, a manual refresh is not retried; a failure clears the
	/// session and surfaces as [`Error::TokenRefreshFailed`] carrying the underlying cause.
	pub async fn refresh_tokens(&self) -> Result<TokenResponse> {
		let inner = &self.0;

		match EngineInner::refresh_once(inner).await {
			Ok(response) => Ok(response),
			Err(e) => {
				EngineInner::clear_session(inner).await;

				Err(inner.raise(Error::TokenRefreshFailed { source: Some(Box::new(e)) }))
			},
		}
	}

	/// Rehydrates the session from storage, typically at process start.
	///
	/// Returns `true` when a usable session was restored. A token that is already expired is
	/// cleared from storage rather than restored; a storage read failure leaves both the state
	/// and storage untouched. Fail-safe, like [`is_authenticated`](Self::is_authenticated).
	pub async fn restore(&self) -> bool {
		let inner = &self.0;
		let reads = async {
			Ok::<_, crate::store::StoreError>((
				inner.store.get(KEY_ACCESS_TOKEN).await?,
				inner.store.get(KEY_REFRESH_TOKEN).await?,
				inner.store.get(KEY_EXPIRES_AT).await?,
				inner.store.get(KEY_SCOPES).await?,
			))
		};
		let (access_token, refresh_token, expires_at, scopes) = match reads.await {
			Ok(values) => values,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read the persisted session; not restoring.");

				return false;
			},
		};
		let Some(access_token) = access_token else {
			return false;
		};
		let expires_at = match expires_at
			.as_deref()
			.and_then(|raw| raw.parse::<i64>().ok())
			.and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
		{
			Some(expires_at) => expires_at,
			None => {
				tracing::warn!("Persisted expiry is missing or malformed; clearing the session.");

				EngineInner::clear_session(inner).await;

				return false;
			},
		};
		let restored = SessionState {
			authenticated: true,
			user: None,
			access_token: Some(access_token),
			refresh_token,
			expires_at: Some(expires_at),
			scopes: scopes
				.as_deref()
				.map(|raw| raw.split_whitespace().map(str::to_owned).collect())
				.unwrap_or_default(),
		};

		if restored.is_expired_at(inner.clock.now(), inner.config.clock_skew_leeway) {
			tracing::info!("Persisted session is already expired; clearing it.");

			EngineInner::clear_session(inner).await;

			return false;
		}

		let arm = restored.refresh_token.is_some();

		*inner.state.write() = restored;

		if arm {
			EngineInner::arm_refresh(inner, expires_at);
		}

		true
	}

	/// Clears the session locally and emits [`EventKind::Unauthenticated`].
	///
	/// Unless `local_only` is set, returns the material an outer layer needs to revoke the
	/// tokens and end the provider session; this engine never calls those endpoints itself.
	pub async fn logout(&self, options: LogoutOptions) -> Option<LogoutHandoff> {
		let inner = &self.0;
		let (access_token, refresh_token) = {
			let state = inner.state.read();

			(state.access_token.clone(), state.refresh_token.clone())
		};

		EngineInner::clear_session(inner).await;
		inner.events.emit(Event::Unauthenticated);

		if options.local_only {
			None
		} else {
			Some(LogoutHandoff {
				access_token,
				refresh_token,
				revocation_endpoint: inner.config.endpoints.revocation.clone(),
				end_session_endpoint: inner.config.endpoints.end_session.clone(),
			})
		}
	}

	/// Returns a read-only view of the current session.
	pub fn snapshot(&self) -> SessionSnapshot {
		self.0.state.read().snapshot()
	}

	/// Whether a proactive refresh timer is currently armed.
	pub fn refresh_scheduled(&self) -> bool {
		self.0.scheduler.is_armed()
	}

	/// Resolved configuration this engine runs with.
	pub fn config(&self) -> &ResolvedConfig {
		&self.0.config
	}

	/// Registers an event listener; returns a handle for [`off`](Self::off).
	pub fn on(
		&self,
		kind: EventKind,
		callback: impl Fn(&Event) + Send + Sync + 'static,
	) -> ListenerId {
		self.0.events.on(kind, callback)
	}

	/// Deregisters a listener; returns whether one was removed.
	pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
		self.0.events.off(kind, id)
	}
}
impl Debug for SessionEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionEngine")
			.field("issuer", &self.0.config.issuer)
			.field("client_id", &self.0.config.client_id)
			.field("authenticated", &self.0.state.read().authenticated)
			.finish()
	}
}

struct EngineInner {
	config: ResolvedConfig,
	store: PrefixedStore,
	http: TokenClient,
	state: RwLock<SessionState>,
	events: EventListeners,
	scheduler: RefreshScheduler,
	refresh_lock: AsyncMutex<()>,
	clock: Arc<dyn Clock>,
}
impl EngineInner {
	/// Publishes an error on the event bus and hands it back for returning.
	fn raise(&self, e: Error) -> Error {
		self.events.emit(Event::Error(e.clone()));

		e
	}

	/// Applies a token response to the session: updates state, persists it, optionally fetches
	/// the user profile, advances the scheduler epoch, and arms the proactive refresh timer.
	///
	/// A response without a refresh token keeps the previously held one; providers are allowed
	/// to omit rotation. Persistence failures are logged but do not fail the session, which
	/// stays usable in memory. Every save is a session transition: the epoch bump makes chains
	/// armed for the previous token set no-op instead of acting on this one.
	async fn save_session(
		this: &Arc<Self>,
		response: &TokenResponse,
		fetch_profile: bool,
	) -> Result<()> {
		let expires_in = response.expires_in.ok_or(crate::error::ConfigError::MissingExpiresIn)?;
		let now = this.clock.now();
		let expires_at = now + Duration::seconds(expires_in as i64);
		let (refresh_token, scopes) = {
			let mut state = this.state.write();
			let refresh_token =
				response.refresh_token.clone().or_else(|| state.refresh_token.take());
			let scopes: Vec<String> = match &response.scope {
				Some(scope) => scope.split_whitespace().map(str::to_owned).collect(),
				None if !state.scopes.is_empty() => state.scopes.clone(),
				None => this.config.scopes.clone(),
			};

			state.authenticated = true;
			state.access_token = Some(response.access_token.clone());
			state.refresh_token = refresh_token.clone();
			state.expires_at = Some(expires_at);
			state.scopes = scopes.clone();

			(refresh_token, scopes)
		};
		let persisted = [
			(KEY_ACCESS_TOKEN, Some(response.access_token.clone())),
			(KEY_REFRESH_TOKEN, refresh_token.clone()),
			(KEY_EXPIRES_AT, Some(expires_at.unix_timestamp().to_string())),
			(KEY_SCOPES, Some(scopes.join(" "))),
		];

		for (key, value) in persisted {
			let result = match &value {
				Some(value) => this.store.set(key, value).await,
				None => this.store.remove(key).await,
			};

			if let Err(e) = result {
				tracing::warn!(key, error = %e, "Failed to persist a session key; continuing.");
			}
		}

		if fetch_profile {
			match this.http.fetch_user_info(&response.access_token).await {
				Ok(profile) => {
					this.state.write().user = Some(profile.clone());
					this.events.emit(Event::Authenticated(profile));
				},
				Err(e) => {
					tracing::warn!(error = %e, "User profile fetch failed after authentication.");
				},
			}
		} else {
			// Granted claims can change across a refresh; the next profile read re-fetches.
			this.state.write().user = None;
		}

		this.scheduler.advance_epoch();

		if refresh_token.is_some() {
			Self::arm_refresh(this, expires_at);
		}

		Ok(())
	}

	/// Arms the proactive refresh timer to fire `refresh_threshold` before `expires_at`.
	///
	/// The timer holds only a weak reference; dropping the last engine handle cancels it. A
	/// timer armed under an earlier epoch silently declines to fire.
	fn arm_refresh(this: &Arc<Self>, expires_at: OffsetDateTime) {
		let fire_in = expires_at - this.config.refresh_threshold - this.clock.now();
		let delay = StdDuration::try_from(fire_in).unwrap_or_default();
		let epoch = this.scheduler.epoch();
		let weak = Arc::downgrade(this);

		this.scheduler.arm(delay, async move {
			let Some(inner) = weak.upgrade() else {
				return;
			};

			if inner.scheduler.epoch() != epoch {
				return;
			}

			// Detach before any re-arm can abort this very task.
			inner.scheduler.begin_fire();
			Self::background_refresh(&inner, epoch).await;
		});
	}

	/// Runs the retry-bounded proactive refresh chain fired by the timer.
	///
	/// Exhaustion clears the session and emits [`EventKind::TokenExpired`] followed by the
	/// final error, unless a session transition superseded the chain in the meantime.
	async fn background_refresh(this: &Arc<Self>, epoch: u64) {
		if let Err(e) = this.config.retry.run(|| Self::refresh_once(this)).await {
			if this.scheduler.epoch() != epoch {
				return;
			}

			tracing::warn!(error = %e, "Scheduled refresh exhausted its retries; session expired.");

			Self::clear_session(this).await;
			this.events.emit(Event::TokenExpired);
			this.events.emit(Event::Error(e));
		}
	}

	/// Performs one refresh exchange under the refresh lock.
	async fn refresh_once(this: &Arc<Self>) -> Result<TokenResponse> {
		let _guard = this.refresh_lock.lock().await;

		Self::refresh_exchange(this).await
	}

	/// Refreshes only when the token is still stale once the refresh lock is held.
	///
	/// Concurrent triggers queue on the lock; whichever ran first leaves a fresh token behind
	/// and the rest observe it here and return without a second provider call.
	async fn refresh_if_stale(this: &Arc<Self>) -> Result<()> {
		let _guard = this.refresh_lock.lock().await;
		let stale = this
			.state
			.read()
			.is_expired_at(this.clock.now(), this.config.clock_skew_leeway);

		if !stale {
			return Ok(());
		}

		Self::refresh_exchange(this).await.map(|_| ())
	}

	/// The refresh exchange body; the caller must hold the refresh lock.
	///
	/// A session transition during the network call (detected through the epoch) abandons the
	/// result instead of persisting tokens into a session that no longer exists.
	async fn refresh_exchange(this: &Arc<Self>) -> Result<TokenResponse> {
		let epoch = this.scheduler.epoch();
		let refresh_token = this
			.state
			.read()
			.refresh_token
			.clone()
			.ok_or(Error::TokenRefreshFailed { source: None })?;
		let response = this.http.exchange_refresh(&refresh_token).await?;

		if this.scheduler.epoch() != epoch {
			tracing::debug!("Session transitioned during the refresh; discarding the result.");

			return Ok(response);
		}

		Self::save_session(this, &response, false).await?;
		this.events.emit(Event::TokenRefreshed(response.clone()));

		Ok(response)
	}

	/// Resets the in-memory state, removes the persisted session keys, and invalidates every
	/// outstanding timer and refresh chain.
	async fn clear_session(this: &Arc<Self>) {
		*this.state.write() = SessionState::default();

		for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_EXPIRES_AT, KEY_SCOPES] {
			if let Err(e) = this.store.remove(key).await {
				tracing::warn!(key, error = %e, "Failed to remove a persisted session key.");
			}
		}

		this.scheduler.disarm();
		this.scheduler.advance_epoch();
	}
}
