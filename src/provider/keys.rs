//! Signing-key set cache with Cache-Control lifetimes and refresh on unknown `kid`.

// crates.io
use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::{KeySetPolicy, RetryPolicy},
	error::chain,
	http::{client, retry::retry_idempotent, semantics},
	metrics,
};

#[derive(Clone, Debug)]
struct CachedKeySet {
	url: Url,
	keys: Arc<JwkSet>,
	fetched_at: Instant,
	expires_at: Instant,
}
impl CachedKeySet {
	fn usable_for(&self, url: &Url, now: Instant) -> bool {
		self.url == *url && now < self.expires_at
	}
}

/// Keys eligible to verify a token with the given `kid`.
///
/// A token without a `kid` may be signed by any key in the set.
pub fn candidates<'a>(key_set: &'a JwkSet, kid: Option<&str>) -> Vec<&'a Jwk> {
	match kid {
		Some(kid) => key_set.find(kid).into_iter().collect(),
		None => key_set.keys.iter().collect(),
	}
}

/// Single-flight cache of the provider key set.
#[derive(Debug)]
pub struct KeySetCache {
	client: Client,
	policy: KeySetPolicy,
	retry_policy: RetryPolicy,
	max_response_bytes: u64,
	entry: RwLock<Option<CachedKeySet>>,
	single_flight: Mutex<()>,
}
impl KeySetCache {
	/// Create an empty cache.
	pub fn new(
		client: Client,
		policy: KeySetPolicy,
		retry_policy: RetryPolicy,
		max_response_bytes: u64,
	) -> Self {
		Self {
			client,
			policy,
			retry_policy,
			max_response_bytes,
			entry: RwLock::new(None),
			single_flight: Mutex::new(()),
		}
	}

	/// Resolve the key set at `url`, ensuring it holds `kid` when one is given.
	///
	/// An unknown `kid` forces one refetch, unless the set was fetched within the miss cooldown.
	#[tracing::instrument(skip(self), fields(url = %url))]
	pub async fn resolve(&self, url: &Url, kid: Option<&str>) -> Result<Arc<JwkSet>> {
		let requested_at = Instant::now();
		let cached = { self.entry.read().await.clone() };

		if let Some(cached) = cached.filter(|cached| cached.usable_for(url, requested_at)) {
			if holds(&cached.keys, kid) {
				return Ok(cached.keys);
			}

			let since_fetch = requested_at.saturating_duration_since(cached.fetched_at);

			if since_fetch < self.policy.kid_miss_cooldown {
				tracing::debug!(kid, "unknown kid within refresh cooldown");

				return Err(unknown_kid(kid));
			}

			tracing::debug!(kid, "unknown kid; refreshing key set");
		}

		let keys = self.refresh(url, kid, requested_at).await?;

		if holds(&keys, kid) { Ok(keys) } else { Err(unknown_kid(kid)) }
	}

	async fn refresh(
		&self,
		url: &Url,
		kid: Option<&str>,
		requested_at: Instant,
	) -> Result<Arc<JwkSet>> {
		let _guard = self.single_flight.lock().await;

		// Another caller may have refreshed while this one waited on the guard.
		if let Some(cached) = self.entry.read().await.as_ref()
			&& cached.usable_for(url, Instant::now())
			&& (cached.fetched_at >= requested_at || holds(&cached.keys, kid))
		{
			return Ok(cached.keys.clone());
		}

		let started = Instant::now();
		let fetched = self.fetch(url).await;

		metrics::record_keyset_refresh(fetched.is_ok(), started.elapsed());

		let fetched = fetched.map_err(|err| ProviderError::KeySetUnreachable {
			url: url.to_string(),
			reason: chain(&err),
		})?;
		let keys = fetched.keys.clone();
		let ttl = fetched.expires_at.saturating_duration_since(fetched.fetched_at);

		tracing::debug!(count = keys.keys.len(), ?ttl, "key set refreshed");

		*self.entry.write().await = Some(fetched);

		Ok(keys)
	}

	async fn fetch(&self, url: &Url) -> Result<CachedKeySet> {
		let client = &self.client;
		let max_response_bytes = self.max_response_bytes;
		let fetch = retry_idempotent(&self.retry_policy, move |timeout| {
			client::get_json(client, url, None, timeout, max_response_bytes)
		})
		.await?;
		let keys = fetch.json::<JwkSet>()?;
		let freshness = semantics::evaluate_freshness(&self.policy, &fetch.exchange);
		let fetched_at = Instant::now();

		Ok(CachedKeySet {
			url: url.clone(),
			keys: Arc::new(keys),
			fetched_at,
			expires_at: fetched_at + freshness.ttl,
		})
	}
}

fn holds(key_set: &JwkSet, kid: Option<&str>) -> bool {
	match kid {
		Some(kid) => key_set.find(kid).is_some(),
		None => !key_set.keys.is_empty(),
	}
}

fn unknown_kid(kid: Option<&str>) -> Error {
	let reason = match kid {
		Some(kid) => format!("No signing key found for kid '{kid}'."),
		None => "Key set holds no signing keys.".into(),
	};

	ProviderError::TokenVerificationFailed(reason).into()
}
