//! Typed in-process publish/subscribe for session state transitions.
//!
//! Listeners are invoked in insertion order within a single synchronous pass; a panicking
//! listener is caught and logged so it can neither starve later listeners nor corrupt the
//! emitting operation's control flow.

// std
use std::panic::{AssertUnwindSafe, catch_unwind};
// self
use crate::{
	_prelude::*,
	auth::{TokenResponse, UserProfile},
};

/// Session transition kinds observable through the event bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
	/// A session became authenticated and the user profile was fetched.
	Authenticated,
	/// The session was cleared by a logout.
	Unauthenticated,
	/// A refresh exchange produced a new token set.
	TokenRefreshed,
	/// Background refresh exhausted its retries and the session was cleared.
	TokenExpired,
	/// An operation raised an error.
	Error,
}
impl EventKind {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Authenticated => "authenticated",
			EventKind::Unauthenticated => "unauthenticated",
			EventKind::TokenRefreshed => "token_refreshed",
			EventKind::TokenExpired => "token_expired",
			EventKind::Error => "error",
		}
	}
}
impl Display for EventKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Event payloads delivered to listeners.
#[derive(Clone, Debug)]
pub enum Event {
	/// Payload: the freshly fetched user profile.
	Authenticated(UserProfile),
	/// No payload.
	Unauthenticated,
	/// Payload: the token response that produced the new session.
	TokenRefreshed(TokenResponse),
	/// No payload.
	TokenExpired,
	/// Payload: the raised error.
	Error(Error),
}
impl Event {
	/// Returns the kind this payload belongs to.
	pub const fn kind(&self) -> EventKind {
		match self {
			Event::Authenticated(_) => EventKind::Authenticated,
			Event::Unauthenticated => EventKind::Unauthenticated,
			Event::TokenRefreshed(_) => EventKind::TokenRefreshed,
			Event::TokenExpired => EventKind::TokenExpired,
			Event::Error(_) => EventKind::Error,
		}
	}
}

/// Handle returned by [`on`](crate::session::SessionEngine::on) for later deregistration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = dyn Fn(&Event) + Send + Sync;

#[derive(Default)]
struct ListenerTable {
	next_id: u64,
	listeners: HashMap<EventKind, Vec<(ListenerId, Arc<Callback>)>>,
}

/// Listener registry owned by the engine.
#[derive(Default)]
pub(crate) struct EventListeners {
	inner: Mutex<ListenerTable>,
}
impl EventListeners {
	pub fn on(
		&self,
		kind: EventKind,
		callback: impl Fn(&Event) + Send + Sync + 'static,
	) -> ListenerId {
		let mut table = self.inner.lock();
		let id = ListenerId(table.next_id);

		table.next_id += 1;
		table.listeners.entry(kind).or_default().push((id, Arc::new(callback)));

		id
	}

	pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
		let mut table = self.inner.lock();
		let Some(entries) = table.listeners.get_mut(&kind) else {
			return false;
		};
		let before = entries.len();

		entries.retain(|(entry_id, _)| *entry_id != id);

		entries.len() != before
	}

	pub fn emit(&self, event: Event) {
		let snapshot: Vec<Arc<Callback>> = {
			let table = self.inner.lock();

			table
				.listeners
				.get(&event.kind())
				.map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
				.unwrap_or_default()
		};

		for callback in snapshot {
			if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
				tracing::error!(
					event = %event.kind(),
					"Event listener panicked; continuing with the remaining listeners.",
				);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn profile() -> UserProfile {
		serde_json::from_str(r#"{"sub":"user-1"}"#).expect("Profile fixture should deserialize.")
	}

	#[test]
	fn listeners_run_in_insertion_order() {
		let listeners = EventListeners::default();
		let order = Arc::new(Mutex::new(Vec::new()));

		for tag in ["first", "second", "third"] {
			let order = order.clone();

			listeners.on(EventKind::Authenticated, move |_| order.lock().push(tag));
		}

		listeners.emit(Event::Authenticated(profile()));

		assert_eq!(*order.lock(), ["first", "second", "third"]);
	}

	#[test]
	fn off_removes_only_the_targeted_listener() {
		let listeners = EventListeners::default();
		let hits = Arc::new(Mutex::new(0_u32));
		let hits_kept = hits.clone();
		let hits_removed = hits.clone();
		let kept = listeners.on(EventKind::TokenExpired, move |_| *hits_kept.lock() += 1);
		let removed = listeners.on(EventKind::TokenExpired, move |_| *hits_removed.lock() += 10);

		assert!(listeners.off(EventKind::TokenExpired, removed));
		assert!(!listeners.off(EventKind::TokenExpired, removed), "Second off should be a no-op.");

		listeners.emit(Event::TokenExpired);

		assert_eq!(*hits.lock(), 1);
		assert!(listeners.off(EventKind::TokenExpired, kept));
	}

	#[test]
	fn panicking_listener_does_not_starve_later_listeners() {
		let listeners = EventListeners::default();
		let reached = Arc::new(Mutex::new(false));
		let reached_flag = reached.clone();

		listeners.on(EventKind::Unauthenticated, |_| panic!("listener failure"));
		listeners.on(EventKind::Unauthenticated, move |_| *reached_flag.lock() = true);

		listeners.emit(Event::Unauthenticated);

		assert!(*reached.lock(), "Listener after the panicking one must still run.");
	}

	#[test]
	fn events_report_their_kind() {
		assert_eq!(Event::Unauthenticated.kind(), EventKind::Unauthenticated);
		assert_eq!(Event::TokenExpired.kind(), EventKind::TokenExpired);
		assert_eq!(EventKind::Error.as_str(), "error");
	}
}
