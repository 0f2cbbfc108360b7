//! Global engine configuration and validation.
//!
//! Settings are read from the external configuration store and validated once; the engine shares
//! them immutably across concurrent logins.

// std
use std::{cell::RefCell, path::Path};
// crates.io
use jsonwebtoken::Algorithm;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default lifetime of a pending authorization.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);
/// Default bound on concurrently pending authorizations.
pub const DEFAULT_MAX_PENDING_STATES: usize = 10_000;
/// Default interval between background sweeps of the pending table.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default TCP connect timeout for provider calls.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default size guard for provider responses (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Largest accepted retry backoff.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60 * 10);
/// Minimum accepted key-set TTL.
pub const MIN_KEYSET_TTL: Duration = Duration::from_secs(30);
/// Default maximum key-set TTL clamp.
pub const DEFAULT_MAX_KEYSET_TTL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default cooldown between refreshes triggered by an unknown `kid`.
pub const DEFAULT_KID_MISS_COOLDOWN: Duration = Duration::from_secs(10);

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 0.8x and the current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry configuration for idempotent provider fetches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::config("retry_policy.attempt_timeout", "Must be at least 100 ms."));
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::config(
				"retry_policy.initial_backoff",
				"Must be greater than zero.",
			));
		}
		if self.max_backoff > MAX_RETRY_BACKOFF {
			return Err(Error::config("retry_policy.max_backoff", "Must be at most 10 minutes."));
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::config(
				"retry_policy.max_backoff",
				"Must be greater than or equal to initial_backoff.",
			));
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::config(
				"retry_policy.deadline",
				"Must be greater than or equal to attempt_timeout.",
			));
		}

		Ok(())
	}

	/// Exponential backoff for a retry attempt with the configured jitter applied.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let bounded = 2_u32
			.checked_pow(attempt)
			.and_then(|factor| self.initial_backoff.checked_mul(factor))
			.map_or(self.max_backoff, |base| base.min(self.max_backoff))
			.max(self.initial_backoff);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = (bounded - bounded / 5).max(self.initial_backoff);

				random_within(lower, bounded)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.saturating_mul(3));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(3),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(8),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Caching rules for the provider's signing-key set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeySetPolicy {
	/// Lower clamp applied to Cache-Control lifetimes.
	#[serde(default = "default_min_keyset_ttl")]
	pub min_ttl: Duration,
	/// Upper clamp applied to Cache-Control lifetimes.
	#[serde(default = "default_max_keyset_ttl")]
	pub max_ttl: Duration,
	/// Minimum spacing between refetches forced by an unknown `kid`.
	#[serde(default = "default_kid_miss_cooldown")]
	pub kid_miss_cooldown: Duration,
}
impl KeySetPolicy {
	/// Validate TTL bounds.
	pub fn validate(&self) -> Result<()> {
		if self.min_ttl.is_zero() {
			return Err(Error::config("key_set.min_ttl", "Must be greater than zero."));
		}
		if self.max_ttl < self.min_ttl {
			return Err(Error::config(
				"key_set.max_ttl",
				"Must be greater than or equal to min_ttl.",
			));
		}

		Ok(())
	}
}
impl Default for KeySetPolicy {
	fn default() -> Self {
		Self {
			min_ttl: MIN_KEYSET_TTL,
			max_ttl: DEFAULT_MAX_KEYSET_TTL,
			kid_miss_cooldown: DEFAULT_KID_MISS_COOLDOWN,
		}
	}
}

/// Engine-wide settings shared by every role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
	/// Issuer URL whose `/.well-known/openid-configuration` describes the provider.
	#[serde(default)]
	pub oidc_discovery_url: Option<Url>,
	/// PEM bundle trusted for provider TLS in addition to the system roots.
	#[serde(default)]
	pub oidc_discovery_ca_pem: Option<String>,
	/// OAuth client identifier registered with the provider.
	#[serde(default)]
	pub oidc_client_id: Option<String>,
	/// OAuth client secret; public clients rely on PKCE alone.
	#[serde(default)]
	pub oidc_client_secret: Option<String>,
	/// Explicit key-set endpoint for direct JWT logins without discovery.
	#[serde(default)]
	pub jwks_url: Option<Url>,
	/// Role used when a request names none.
	#[serde(default)]
	pub default_role: Option<String>,
	/// Issuer required of directly presented JWTs.
	#[serde(default)]
	pub bound_issuer: Option<String>,
	/// Signing algorithms accepted on tokens.
	#[serde(default = "default_supported_algs")]
	pub jwt_supported_algs: Vec<Algorithm>,
	/// Whether provider endpoints must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Lifetime of a pending authorization.
	#[serde(default = "default_state_ttl")]
	pub state_ttl: Duration,
	/// Bound on concurrently pending authorizations.
	#[serde(default = "default_max_pending_states")]
	pub max_pending_states: usize,
	/// Interval between background sweeps of expired authorizations.
	#[serde(default = "default_sweep_interval")]
	pub sweep_interval: Duration,
	/// TCP connect timeout for provider calls.
	#[serde(default = "default_connect_timeout")]
	pub connect_timeout: Duration,
	/// Size guard for provider responses.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Signing-key cache rules.
	#[serde(default)]
	pub key_set: KeySetPolicy,
	/// Retry rules for idempotent provider fetches.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl AuthConfig {
	/// Configuration for an OIDC provider discovered from `discovery_url`.
	pub fn oidc(
		discovery_url: impl AsRef<str>,
		client_id: impl Into<String>,
		client_secret: Option<String>,
	) -> Result<Self> {
		Ok(Self {
			oidc_discovery_url: Some(Url::parse(discovery_url.as_ref())?),
			oidc_client_id: Some(client_id.into()),
			oidc_client_secret: client_secret,
			..Self::base()
		})
	}

	/// Configuration for direct JWT logins verified against a fixed key-set URL.
	pub fn jwks(jwks_url: impl AsRef<str>) -> Result<Self> {
		Ok(Self { jwks_url: Some(Url::parse(jwks_url.as_ref())?), ..Self::base() })
	}

	/// Parse and validate a JSON document.
	pub fn from_json_str(raw: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(raw)?;

		config.validate()?;

		Ok(config)
	}

	/// Read, parse, and validate a JSON file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path).map_err(|err| {
			Error::config("path", format!("Failed to read {}: {err}.", path.display()))
		})?;

		Self::from_json_str(&raw)
	}

	/// Set HTTPS requirement to the desired value.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Set the role used when requests name none.
	pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
		self.default_role = Some(role.into());

		self
	}

	/// Replace the accepted signing algorithms.
	pub fn with_supported_algs(mut self, algs: impl IntoIterator<Item = Algorithm>) -> Self {
		self.jwt_supported_algs = algs.into_iter().collect();

		self
	}

	/// Whether the authorization-code flow is configured.
	pub fn oidc_enabled(&self) -> bool {
		self.oidc_discovery_url.is_some() && self.oidc_client_id.is_some()
	}

	/// Resolve a requested role name, falling back to the default role.
	pub fn resolve_role_name<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
		requested.filter(|name| !name.is_empty()).or(self.default_role.as_deref())
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.oidc_discovery_url.is_none() && self.jwks_url.is_none() {
			return Err(Error::config(
				"oidc_discovery_url",
				"Either oidc_discovery_url or jwks_url must be set.",
			));
		}
		if self.oidc_discovery_url.is_some() && self.jwks_url.is_some() {
			return Err(Error::config(
				"jwks_url",
				"Cannot be combined with oidc_discovery_url.",
			));
		}
		if self.oidc_client_secret.is_some() && self.oidc_client_id.is_none() {
			return Err(Error::config(
				"oidc_client_id",
				"Must be set when oidc_client_secret is provided.",
			));
		}
		if self.oidc_client_id.as_deref().is_some_and(str::is_empty) {
			return Err(Error::config("oidc_client_id", "Must not be empty."));
		}
		if self.require_https {
			if let Some(url) = &self.oidc_discovery_url {
				security::enforce_https("oidc_discovery_url", url)?;
			}
			if let Some(url) = &self.jwks_url {
				security::enforce_https("jwks_url", url)?;
			}
		}
		if self.jwt_supported_algs.is_empty() {
			return Err(Error::config("jwt_supported_algs", "Must list at least one algorithm."));
		}
		if self.state_ttl < Duration::from_secs(1) {
			return Err(Error::config("state_ttl", "Must be at least 1 second."));
		}
		if self.max_pending_states == 0 {
			return Err(Error::config("max_pending_states", "Must be greater than zero."));
		}
		if self.sweep_interval.is_zero() {
			return Err(Error::config("sweep_interval", "Must be greater than zero."));
		}
		if self.max_response_bytes == 0 {
			return Err(Error::config("max_response_bytes", "Must be greater than zero."));
		}

		self.key_set.validate()?;
		self.retry_policy.validate()?;

		Ok(())
	}

	fn base() -> Self {
		Self {
			jwt_supported_algs: default_supported_algs(),
			require_https: true,
			state_ttl: DEFAULT_STATE_TTL,
			max_pending_states: DEFAULT_MAX_PENDING_STATES,
			sweep_interval: DEFAULT_SWEEP_INTERVAL,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			..Default::default()
		}
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

fn default_supported_algs() -> Vec<Algorithm> {
	vec![Algorithm::RS256]
}

fn default_true() -> bool {
	true
}

fn default_state_ttl() -> Duration {
	DEFAULT_STATE_TTL
}

fn default_max_pending_states() -> usize {
	DEFAULT_MAX_PENDING_STATES
}

fn default_sweep_interval() -> Duration {
	DEFAULT_SWEEP_INTERVAL
}

fn default_connect_timeout() -> Duration {
	DEFAULT_CONNECT_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_min_keyset_ttl() -> Duration {
	MIN_KEYSET_TTL
}

fn default_max_keyset_ttl() -> Duration {
	DEFAULT_MAX_KEYSET_TTL
}

fn default_kid_miss_cooldown() -> Duration {
	DEFAULT_KID_MISS_COOLDOWN
}
