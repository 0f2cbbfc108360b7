//! Identity-provider client: discovery, signing keys, token and user-info endpoints.

pub mod discovery;
pub mod keys;
pub mod token;

// crates.io
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::{Certificate, Client, redirect::Policy};
use tokio::sync::OnceCell;
use url::Url;
// self
use crate::{
	_prelude::*,
	claims::Claims,
	config::AuthConfig,
	error::chain,
	http::{client, retry::retry_idempotent},
	provider::{discovery::ProviderMetadata, keys::KeySetCache, token::TokenResponse},
};

/// Checks a verified token must satisfy beyond its signature.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenExpectations<'a> {
	/// Required `iss`; `None` skips the issuer check.
	pub issuer: Option<&'a str>,
	/// Audience that must appear in `aud`; `None` leaves audience checks to the role.
	pub audience: Option<&'a str>,
	/// Clock skew tolerated on `exp` and `nbf`.
	pub leeway: Duration,
}

/// Shared connection to the configured identity provider.
#[derive(Debug)]
pub struct Provider {
	config: Arc<AuthConfig>,
	client: Client,
	metadata: OnceCell<Arc<ProviderMetadata>>,
	keys: KeySetCache,
}
impl Provider {
	/// Build the provider client from validated configuration.
	pub fn new(config: Arc<AuthConfig>) -> Result<Self> {
		let mut builder = Client::builder()
			.redirect(Policy::limited(10))
			.user_agent(format!("jwt-auth/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(config.connect_timeout);

		if let Some(pem) = &config.oidc_discovery_ca_pem {
			let certificates = Certificate::from_pem_bundle(pem.as_bytes()).map_err(|err| {
				Error::config("oidc_discovery_ca_pem", format!("Failed to parse PEM bundle: {err}."))
			})?;

			if certificates.is_empty() {
				return Err(Error::config(
					"oidc_discovery_ca_pem",
					"PEM bundle contains no certificates.",
				));
			}

			for certificate in certificates {
				builder = builder.add_root_certificate(certificate);
			}
		}

		let client = builder.build()?;
		let keys = KeySetCache::new(
			client.clone(),
			config.key_set.clone(),
			config.retry_policy.clone(),
			config.max_response_bytes,
		);

		Ok(Self { config, client, metadata: OnceCell::new(), keys })
	}

	/// Engine configuration backing this provider.
	pub fn config(&self) -> &AuthConfig {
		&self.config
	}

	/// Discovery document, fetched once and shared afterwards.
	///
	/// Returns `None` when the engine verifies tokens against a fixed key-set URL instead.
	pub async fn metadata(&self) -> Result<Option<Arc<ProviderMetadata>>> {
		let Some(issuer) = &self.config.oidc_discovery_url else {
			return Ok(None);
		};
		let metadata = self
			.metadata
			.get_or_try_init(|| async {
				discovery::fetch(
					&self.client,
					issuer,
					&self.config.retry_policy,
					self.config.max_response_bytes,
					self.config.require_https,
				)
				.await
				.map(Arc::new)
			})
			.await?;

		Ok(Some(metadata.clone()))
	}

	/// Discovery document, failing when discovery is not configured.
	pub async fn require_metadata(&self) -> Result<Arc<ProviderMetadata>> {
		self.metadata().await?.ok_or_else(|| {
			Error::config("oidc_discovery_url", "OIDC discovery is required for this login flow.")
		})
	}

	/// Verify a compact JWS against the provider key set and return its claims.
	#[tracing::instrument(skip(self, raw, expectations), fields(issuer = expectations.issuer))]
	pub async fn verify(&self, raw: &str, expectations: &TokenExpectations<'_>) -> Result<Claims> {
		let header = jsonwebtoken::decode_header(raw).map_err(verification_failed)?;

		if !self.config.jwt_supported_algs.contains(&header.alg) {
			return Err(ProviderError::TokenVerificationFailed(format!(
				"Signing algorithm {:?} is not supported.",
				header.alg
			))
			.into());
		}

		let key_set_url = self.key_set_url().await?;
		let kid = header.kid.as_deref();
		let key_set = self.keys.resolve(&key_set_url, kid).await?;
		let mut validation = Validation::new(header.alg);

		validation.leeway = expectations.leeway.as_secs();
		validation.validate_nbf = true;

		if let Some(issuer) = expectations.issuer {
			validation.set_issuer(&[issuer]);
		}

		match expectations.audience {
			Some(audience) => validation.set_audience(&[audience]),
			None => validation.validate_aud = false,
		}

		let mut last_error = None;

		for jwk in keys::candidates(&key_set, kid) {
			let key = match DecodingKey::from_jwk(jwk) {
				Ok(key) => key,
				Err(err) => {
					last_error = Some(err);

					continue;
				},
			};

			match jsonwebtoken::decode::<Claims>(raw, &key, &validation) {
				Ok(data) => {
					tracing::debug!(kid, "token signature verified");

					return Ok(data.claims);
				},
				Err(err) => last_error = Some(err),
			}
		}

		Err(match last_error {
			Some(err) => verification_failed(err),
			None => ProviderError::TokenVerificationFailed(
				"No signing key matches the token.".into(),
			)
			.into(),
		})
	}

	/// Redeem an authorization code at the token endpoint. Never retried.
	pub async fn exchange_code(
		&self,
		code: &str,
		redirect_uri: &str,
		code_verifier: &str,
	) -> Result<TokenResponse> {
		let metadata = self.require_metadata().await?;
		let client_id = self.config.oidc_client_id.as_deref().ok_or_else(|| {
			Error::config("oidc_client_id", "Must be set for the authorization-code flow.")
		})?;

		token::exchange_code(
			&self.client,
			&metadata.token_endpoint,
			token::CodeGrant {
				code,
				redirect_uri,
				client_id,
				client_secret: self.config.oidc_client_secret.as_deref(),
				code_verifier,
			},
			self.config.retry_policy.attempt_timeout,
			self.config.max_response_bytes,
		)
		.await
	}

	/// Fetch user-info claims with the access token.
	///
	/// Returns `Ok(None)` when the provider advertises no user-info endpoint.
	pub async fn user_info(&self, access_token: &str) -> Result<Option<Claims>> {
		let metadata = self.require_metadata().await?;
		let Some(endpoint) = &metadata.userinfo_endpoint else {
			return Ok(None);
		};
		let client = &self.client;
		let max_response_bytes = self.config.max_response_bytes;
		let fetch = retry_idempotent(&self.config.retry_policy, move |timeout| {
			client::get_json(client, endpoint, Some(access_token), timeout, max_response_bytes)
		})
		.await
		.map_err(|err| ProviderError::UserInfo(chain(&err)))?;
		let claims = fetch.json::<Claims>().map_err(|err| ProviderError::UserInfo(chain(&err)))?;

		Ok(Some(claims))
	}

	async fn key_set_url(&self) -> Result<Url> {
		if let Some(url) = &self.config.jwks_url {
			return Ok(url.clone());
		}

		Ok(self.require_metadata().await?.jwks_uri.clone())
	}
}

fn verification_failed(err: jsonwebtoken::errors::Error) -> Error {
	ProviderError::TokenVerificationFailed(chain(&err)).into()
}
