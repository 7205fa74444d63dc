//! OAuth 2.0 Authorization Code + PKCE client session engine: authorization redirects, callback
//! validation, token exchanges, and retry-bounded background refresh in one crate.
//!
//! The crate revolves around [`session::SessionEngine`]: one explicitly constructed instance per
//! [`config::ClientConfig`] owns the session state, drives every transition, and is the only
//! component allowed to mutate persisted session data. Supporting modules supply the pluggable
//! storage contract ([`store`]), the PKCE material ([`pkce`]), the token endpoint wire client
//! ([`http`]), the typed event bus ([`events`]), and the retry/scheduling machinery ([`retry`]).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod pkce;
pub mod retry;
pub mod session;
pub mod store;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError, StatusCode};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use time;
pub use url;
#[cfg(test)] use httpmock as _;
