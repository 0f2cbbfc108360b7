//! Security utilities covering HTTPS enforcement, login correlation tokens, and PKCE.
//!
//! # Threat Model
//! State and nonce values are bearer secrets for the duration of a login: they are minted from
//! the thread-local CSPRNG, never logged, and compared in constant time. PKCE binds the code
//! exchange to the client that started the login, so an intercepted authorization code cannot be
//! redeemed elsewhere.

// crates.io
use base64::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use url::Url;
// self
use crate::_prelude::*;

/// Entropy drawn for state, nonce, and PKCE verifier values.
pub const TOKEN_BYTES: usize = 32;

/// Ensure the provided URL uses HTTPS.
pub fn enforce_https(field: &'static str, url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::config(field, format!("Upstream URL {url} must use HTTPS.")))
	}
}

/// Mint an unguessable URL-safe token from `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
	let mut buf = vec![0u8; bytes];

	rand::rng().fill_bytes(&mut buf);

	BASE64_URL_SAFE_NO_PAD.encode(buf)
}

/// Derive the `S256` PKCE challenge for a verifier (RFC 7636 §4.2).
pub fn pkce_challenge(verifier: &str) -> String {
	BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
	a.as_bytes().ct_eq(b.as_bytes()).into()
}
