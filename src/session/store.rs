use crate::session::{SessionError, TokenStorage};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

/// The current authentication state.
///
/// `authenticated` is derived from the token, so the two can never disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
	token: Option<String>,
}

impl Session {
	pub fn token(&self) -> Option<&str> {
		self.token.as_deref()
	}

	pub fn is_authenticated(&self) -> bool {
		self.token.is_some()
	}
}

fn normalize(token: &str) -> Option<String> {
	let trimmed = token.trim();
	if trimmed.is_empty() {
		None
	} else {
		Some(trimmed.to_string())
	}
}

/// Sole owner of the bearer token.
///
/// Readers get the token synchronously; writers replace it whole. Every change is mirrored to
/// the backing `TokenStorage` so the session survives a restart, and observers registered with
/// [`SessionStore::watch`] are notified once per real transition.
#[derive(Clone)]
pub struct SessionStore {
	state: Arc<watch::Sender<Session>>,
	storage: Arc<dyn TokenStorage>,
	/// Keeps the persisted value in the same order as in-memory transitions.
	persist: Arc<Mutex<()>>,
}

impl SessionStore {
	/// Create an empty store without reading persisted state.
	pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
		Self {
			state: Arc::new(watch::Sender::new(Session::default())),
			storage,
			persist: Arc::new(Mutex::new(())),
		}
	}

	/// Create a store initialised from whatever token the storage holds.
	///
	/// An unreadable storage is logged and treated as "no session"; the user simply logs in again.
	pub async fn load(storage: Arc<dyn TokenStorage>) -> Self {
		let store = Self::new(storage);
		match store.storage.load().await {
			Ok(Some(token)) => {
				store.state.send_replace(Session {
					token: normalize(&token),
				});
				info!("Restored persisted session");
			}
			Ok(None) => {}
			Err(e) => warn!("Could not read persisted session, starting logged out: {}", e),
		}
		store
	}

	/// Replace the current token. An empty token clears the session.
	pub async fn set_token(&self, token: &str) -> Result<(), SessionError> {
		let Some(token) = normalize(token) else {
			self.clear().await?;
			return Ok(());
		};

		let _guard = self.persist.lock().await;
		self.state.send_replace(Session {
			token: Some(token.clone()),
		});
		self.storage.save(&token).await
	}

	/// Drop the session. Returns `true` only if a token was actually present.
	pub async fn clear(&self) -> Result<bool, SessionError> {
		let _guard = self.persist.lock().await;
		let changed = self.state.send_if_modified(|session| session.token.take().is_some());
		if changed {
			info!("Session cleared");
			self.storage.remove().await?;
		}
		Ok(changed)
	}

	/// Drop the session only if it still holds `token`.
	///
	/// Used when the server rejects a token: a late 401 for a token that has since been replaced
	/// must not log the user out of the newer session, and a burst of 401s for the same token
	/// produces a single transition.
	pub async fn expire(&self, token: &str) -> Result<bool, SessionError> {
		let _guard = self.persist.lock().await;
		let changed = self.state.send_if_modified(|session| {
			if session.token.as_deref() == Some(token) {
				session.token = None;
				true
			} else {
				false
			}
		});
		if changed {
			warn!("Session expired or was rejected by the server");
			self.storage.remove().await?;
		}
		Ok(changed)
	}

	pub fn current_token(&self) -> Option<String> {
		self.state.borrow().token.clone()
	}

	pub fn is_authenticated(&self) -> bool {
		self.state.borrow().is_authenticated()
	}

	pub fn snapshot(&self) -> Session {
		self.state.borrow().clone()
	}

	/// Subscribe to session transitions.
	pub fn watch(&self) -> watch::Receiver<Session> {
		self.state.subscribe()
	}
}
