//! Pending authorizations awaiting their provider callback.

// std
use std::collections::HashMap;
// crates.io
use tokio::{sync::RwLock, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

/// Lifecycle of a single login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginPhase {
	/// Correlation values minted, not yet recorded.
	Created,
	/// Recorded and waiting for the callback.
	AwaitingCallback,
	/// Callback redeemed and the identity produced.
	Completed,
	/// Callback redeemed but a check failed.
	Failed,
	/// Never redeemed within the state TTL.
	Expired,
}
impl LoginPhase {
	/// Whether `next` is a legal successor of this phase.
	pub fn can_transition_to(self, next: LoginPhase) -> bool {
		matches!(
			(self, next),
			(LoginPhase::Created, LoginPhase::AwaitingCallback)
				| (
					LoginPhase::AwaitingCallback,
					LoginPhase::Completed | LoginPhase::Failed | LoginPhase::Expired
				)
		)
	}

	/// Terminal phases admit no further transitions.
	pub fn is_terminal(self) -> bool {
		matches!(self, LoginPhase::Completed | LoginPhase::Failed | LoginPhase::Expired)
	}
}

/// In-flight login transaction keyed by its `state` value.
#[derive(Clone)]
pub struct PendingAuthorization {
	/// Anti-CSRF correlation value echoed on the callback.
	pub state: String,
	/// Replay-protection value bound into the ID token.
	pub nonce: String,
	/// Role the login was started for.
	pub role: String,
	/// Redirect URI presented to the provider.
	pub redirect_uri: String,
	/// PKCE verifier sent with the code exchange.
	pub code_verifier: String,
	/// Wall-clock creation time.
	pub created_at: DateTime<Utc>,
	/// Monotonic expiry deadline.
	pub expires_at: Instant,
}
impl PendingAuthorization {
	/// Whether the authorization is past its deadline.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}
}
impl std::fmt::Debug for PendingAuthorization {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingAuthorization")
			.field("role", &self.role)
			.field("redirect_uri", &self.redirect_uri)
			.field("created_at", &self.created_at)
			.field("expires_at", &self.expires_at)
			.finish_non_exhaustive()
	}
}

/// Concurrent table of pending authorizations.
///
/// `take` removes under the write lock, so a state is redeemed at most once no matter how many
/// callbacks race for it.
#[derive(Clone, Debug)]
pub struct StateStore {
	entries: Arc<RwLock<HashMap<String, PendingAuthorization>>>,
	ttl: Duration,
	capacity: usize,
}
impl StateStore {
	/// Create an empty store.
	pub fn new(ttl: Duration, capacity: usize) -> Self {
		Self { entries: Arc::new(RwLock::new(HashMap::new())), ttl, capacity }
	}

	/// Lifetime assigned to new authorizations.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Build an authorization expiring one TTL from now.
	pub fn pending(
		&self,
		state: String,
		nonce: String,
		role: impl Into<String>,
		redirect_uri: impl Into<String>,
		code_verifier: String,
	) -> PendingAuthorization {
		PendingAuthorization {
			state,
			nonce,
			role: role.into(),
			redirect_uri: redirect_uri.into(),
			code_verifier,
			created_at: Utc::now(),
			expires_at: Instant::now() + self.ttl,
		}
	}

	/// Record an authorization.
	///
	/// A full table drops expired entries first, then the live entry closest to its deadline.
	pub async fn insert(&self, pending: PendingAuthorization) {
		let mut entries = self.entries.write().await;

		if entries.len() >= self.capacity {
			evict_expired(&mut entries, Instant::now());
		}
		if entries.len() >= self.capacity {
			let oldest = entries
				.iter()
				.min_by_key(|(_, entry)| entry.expires_at)
				.map(|(state, _)| state.clone());

			if let Some(evicted) = oldest.and_then(|state| entries.remove(&state)) {
				tracing::warn!(limit = self.capacity, "pending authorization table is full");
				transition(&evicted.role, LoginPhase::AwaitingCallback, LoginPhase::Failed);
			}
		}

		entries.insert(pending.state.clone(), pending);
	}

	/// Remove and return the authorization for `state` if it is still live.
	///
	/// Unknown, redeemed, and expired states are indistinguishable to the caller.
	pub async fn take(&self, state: &str) -> Result<PendingAuthorization> {
		let removed = { self.entries.write().await.remove(state) };

		match removed {
			Some(pending) if !pending.is_expired(Instant::now()) => Ok(pending),
			Some(pending) => {
				transition(&pending.role, LoginPhase::AwaitingCallback, LoginPhase::Expired);

				Err(StateError::ExpiredOrMissingState.into())
			},
			None => Err(StateError::ExpiredOrMissingState.into()),
		}
	}

	/// Drop every expired authorization, returning how many were removed.
	pub async fn sweep_expired(&self) -> usize {
		evict_expired(&mut *self.entries.write().await, Instant::now())
	}

	/// Number of recorded authorizations, expired ones included until swept.
	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	/// Whether the table is empty.
	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}

	/// Sweep expired authorizations every `interval` until `shutdown` fires.
	pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
		let store = self.clone();

		tokio::spawn(async move {
			let mut ticker = time::interval(interval);

			ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = shutdown.cancelled() => break,
					_ = ticker.tick() => {
						let removed = store.sweep_expired().await;

						if removed > 0 {
							tracing::debug!(removed, "swept expired authorizations");
						}
					},
				}
			}

			tracing::debug!("state sweeper stopped");
		})
	}
}

pub(crate) fn transition(role: &str, from: LoginPhase, to: LoginPhase) {
	debug_assert!(from.can_transition_to(to), "illegal login transition {from:?} -> {to:?}");

	tracing::debug!(role, ?from, ?to, "login phase changed");
}

fn evict_expired(entries: &mut HashMap<String, PendingAuthorization>, now: Instant) -> usize {
	let before = entries.len();

	entries.retain(|_, entry| {
		let expired = entry.is_expired(now);

		if expired {
			transition(&entry.role, LoginPhase::AwaitingCallback, LoginPhase::Expired);
		}

		!expired
	});

	before - entries.len()
}
