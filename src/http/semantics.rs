//! Cache-Control evaluation for provider documents.

// crates.io
use http_cache_semantics::CachePolicy;
// self
use crate::{_prelude::*, config::KeySetPolicy, http::client::HttpExchange};

/// Freshness derived from response headers and the key-set clamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Freshness {
	/// Clamped lifetime of the fetched document.
	pub ttl: Duration,
	/// Whether the upstream allowed the response to be cached at all.
	pub storable: bool,
}

/// Evaluate how long a fetched key set may be served before refetching.
///
/// Non-storable responses (`no-store`, `private` for shared caches, error statuses) fall back to
/// the lower clamp so a misconfigured provider cannot force a fetch per login.
pub fn evaluate_freshness(policy: &KeySetPolicy, exchange: &HttpExchange) -> Freshness {
	let cache_policy = CachePolicy::new(&exchange.request, &exchange.response);
	let storable = cache_policy.is_storable();
	let ttl = if storable {
		clamp_ttl(cache_policy.time_to_live(SystemTime::now()), policy.min_ttl, policy.max_ttl)
	} else {
		policy.min_ttl
	};

	tracing::debug!(ttl = ?ttl, storable, "evaluated key set freshness");

	Freshness { ttl, storable }
}

fn clamp_ttl(ttl: Duration, min: Duration, max: Duration) -> Duration {
	ttl.clamp(min, max)
}
