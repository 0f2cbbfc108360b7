//! OpenID Connect discovery documents.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::RetryPolicy,
	error::chain,
	http::{client, retry::retry_idempotent},
	security,
};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Subset of the provider metadata the login flows rely on.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
	pub issuer: String,
	pub authorization_endpoint: Url,
	pub token_endpoint: Url,
	pub jwks_uri: Url,
	#[serde(default)]
	pub userinfo_endpoint: Option<Url>,
}

/// Location of the discovery document for an issuer URL.
pub fn well_known_url(issuer: &Url) -> Result<Url> {
	let base = issuer.as_str().trim_end_matches('/');

	Ok(Url::parse(&format!("{base}{WELL_KNOWN_PATH}"))?)
}

/// Fetch the discovery document and check it describes `issuer`.
#[tracing::instrument(skip(client, retry_policy), fields(issuer = %issuer))]
pub(crate) async fn fetch(
	client: &reqwest::Client,
	issuer: &Url,
	retry_policy: &RetryPolicy,
	max_response_bytes: u64,
	require_https: bool,
) -> Result<ProviderMetadata> {
	let url = well_known_url(issuer)?;
	let failed = |reason: String| ProviderError::Discovery { url: url.to_string(), reason };
	let target = &url;
	let fetch = retry_idempotent(retry_policy, move |timeout| {
		client::get_json(client, target, None, timeout, max_response_bytes)
	})
	.await
	.map_err(|err| failed(chain(&err)))?;
	let metadata = fetch.json::<ProviderMetadata>().map_err(|err| failed(chain(&err)))?;

	if !same_issuer(&metadata.issuer, issuer) {
		return Err(failed(format!(
			"Issuer did not match the discovery URL: expected {issuer}, got {}.",
			metadata.issuer
		))
		.into());
	}
	if require_https {
		security::enforce_https("token_endpoint", &metadata.token_endpoint)?;
		security::enforce_https("jwks_uri", &metadata.jwks_uri)?;
	}

	tracing::debug!(
		token_endpoint = %metadata.token_endpoint,
		jwks_uri = %metadata.jwks_uri,
		userinfo = metadata.userinfo_endpoint.is_some(),
		"discovered provider metadata"
	);

	Ok(metadata)
}

fn same_issuer(advertised: &str, configured: &Url) -> bool {
	advertised.trim_end_matches('/') == configured.as_str().trim_end_matches('/')
}
