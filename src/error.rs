//! Crate-wide error types and `Result` alias.

// std
use std::error::Error as StdError;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the authentication engine.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	State(#[from] StateError),
	#[error(transparent)]
	Provider(#[from] ProviderError),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Invalid configuration for {field}: {reason}")]
	Config { field: &'static str, reason: String },
	#[error("Request cancelled by caller.")]
	Cancelled,
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[cfg(feature = "prometheus")]
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Response from {url} is {size} bytes, exceeding the {limit} byte guard.")]
	ResponseTooLarge { url: url::Url, size: u64, limit: u64 },
}
impl Error {
	/// Whether the error is an expected authentication rejection rather than a fault.
	pub fn is_authentication_failure(&self) -> bool {
		matches!(
			self,
			Error::Validation(_)
				| Error::State(_)
				| Error::Provider(ProviderError::TokenVerificationFailed(_))
		)
	}

	/// Whether a failed upstream call may be retried without side effects.
	pub fn is_retryable(&self) -> bool {
		match self {
			Error::Reqwest(err) => err.is_timeout() || err.is_connect() || err.is_request(),
			Error::HttpStatus { status, .. } =>
				status.is_server_error() || *status == http::StatusCode::TOO_MANY_REQUESTS,
			_ => false,
		}
	}

	pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
		Self::Config { field, reason: reason.into() }
	}
}

/// Expected rejections raised while matching claims against a role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	/// A bound or required claim is absent from the claim set.
	#[error("Claim '{0}' is missing.")]
	ClaimMissing(String),
	/// A bound claim is present but differs from the configured value.
	#[error("Claim '{0}' does not match the associated bound claim.")]
	ClaimMismatch(String),
	/// A claim that must be a string (or list of strings) has another type.
	#[error("Claim '{0}' could not be converted to a string.")]
	ClaimType(String),
	/// None of the token audiences is bound to the role.
	#[error("Audience claim does not match any bound audience.")]
	AudienceMismatch,
	/// The token declares audiences but the role binds none.
	#[error("Audience claim found in JWT but no audiences are bound to the role.")]
	UnexpectedAudience,
	/// The `sub` claim differs from the role's bound subject.
	#[error("Subject claim does not match the bound subject.")]
	SubjectMismatch,
	/// Bound groups the caller is not a member of.
	#[error("Missing group membership for {}.", .0.join(", "))]
	MissingGroups(Vec<String>),
	/// The requested redirect target is not on the role's allow-list.
	#[error("Redirect URI '{0}' is not allowed for the role.")]
	RedirectNotAllowed(String),
	/// The role exists but cannot serve the requested login flow.
	#[error("Role '{role}' is of type '{actual}', expected '{expected}'.")]
	WrongRoleType {
		/// Role name as requested.
		role: String,
		/// Type the login flow requires.
		expected: crate::role::RoleType,
		/// Type the role is configured with.
		actual: crate::role::RoleType,
	},
}

/// Login-session errors.
///
/// Expired and unknown states share one variant so callers cannot enumerate state tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
	/// The state is unknown, already redeemed, or past its TTL.
	#[error("Expired or missing OAuth state.")]
	ExpiredOrMissingState,
	/// The ID token nonce differs from the one minted for the login.
	#[error("ID token nonce does not match the pending authorization.")]
	NonceMismatch,
	/// The callback carried no authorization code.
	#[error("OAuth code parameter not provided.")]
	MissingCode,
}

/// Failures talking to, or trusting the output of, the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
	/// The authorization-code exchange failed.
	#[error("Cannot fetch token: {0}")]
	ExchangeFailed(String),
	/// The signing key set could not be retrieved.
	#[error("Signing key set at {url} unreachable: {reason}")]
	KeySetUnreachable {
		/// JWKS endpoint.
		url: String,
		/// Failure detail.
		reason: String,
	},
	/// Signature, issuer, audience, or time-window checks failed.
	#[error("Token verification failed: {0}")]
	TokenVerificationFailed(String),
	/// The discovery document could not be retrieved or is inconsistent.
	#[error("OIDC discovery at {url} failed: {reason}")]
	Discovery {
		/// Discovery document URL.
		url: String,
		/// Failure detail.
		reason: String,
	},
	/// The user-info endpoint failed.
	#[error("User info request failed: {0}")]
	UserInfo(String),
	/// The directory service failed to resolve memberships.
	#[error("Directory lookup failed: {0}")]
	Directory(String),
}

/// Render an error together with its source chain.
pub(crate) fn chain(err: &dyn StdError) -> String {
	let mut rendered = err.to_string();
	let mut source = err.source();

	while let Some(inner) = source {
		let message = inner.to_string();

		if !rendered.contains(&message) {
			rendered.push_str(": ");
			rendered.push_str(&message);
		}

		source = inner.source();
	}

	rendered
}
