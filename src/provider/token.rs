//! Authorization-code redemption at the token endpoint.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use reqwest::Client;
use serde::Deserialize;
use url::Url;
// self
use crate::{_prelude::*, error::chain, http::client};

/// Parameters of an `authorization_code` grant.
#[derive(Clone, Copy)]
pub struct CodeGrant<'a> {
	/// Code returned on the callback.
	pub code: &'a str,
	/// Redirect URI used when the login started.
	pub redirect_uri: &'a str,
	/// OAuth client identifier.
	pub client_id: &'a str,
	/// OAuth client secret, omitted for public clients.
	pub client_secret: Option<&'a str>,
	/// PKCE verifier minted with the login.
	pub code_verifier: &'a str,
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
	/// Signed ID token.
	pub id_token: String,
	/// Access token usable at the user-info endpoint.
	#[serde(default)]
	pub access_token: Option<String>,
}
impl Debug for TokenResponse {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("TokenResponse")
			.field("id_token", &"<redacted>")
			.field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Redeem an authorization code. Any failure maps to [`ProviderError::ExchangeFailed`].
#[tracing::instrument(skip(client, grant), fields(endpoint = %endpoint))]
pub async fn exchange_code(
	client: &Client,
	endpoint: &Url,
	grant: CodeGrant<'_>,
	attempt_timeout: Duration,
	max_response_bytes: u64,
) -> Result<TokenResponse> {
	let mut form = vec![
		("grant_type", "authorization_code"),
		("code", grant.code),
		("redirect_uri", grant.redirect_uri),
		("client_id", grant.client_id),
		("code_verifier", grant.code_verifier),
	];

	if let Some(secret) = grant.client_secret {
		form.push(("client_secret", secret));
	}

	let fetch = client::post_form(client, endpoint, &form, attempt_timeout, max_response_bytes)
		.await
		.map_err(exchange_failed)?;
	let raw = fetch.json::<serde_json::Value>().map_err(exchange_failed)?;

	if raw.get("id_token").and_then(serde_json::Value::as_str).is_none_or(str::is_empty) {
		return Err(ProviderError::ExchangeFailed("No id_token found in response.".into()).into());
	}

	let response = serde_json::from_value::<TokenResponse>(raw)
		.map_err(|err| exchange_failed(Error::from(err)))?;

	tracing::debug!(
		elapsed = ?fetch.exchange.elapsed,
		has_access_token = response.access_token.is_some(),
		"authorization code redeemed"
	);

	Ok(response)
}

fn exchange_failed(err: Error) -> Error {
	ProviderError::ExchangeFailed(chain(&err)).into()
}
