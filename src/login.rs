//! OIDC authorization-code login: auth-URL generation and callback handling.

// crates.io
use url::Url;
// self
use crate::{
	_prelude::*,
	claims::Claims,
	directory::DirectoryService,
	identity::{self, AudiencePolicy, Identity},
	metrics::{self, LoginFlow, LoginOutcome, UNKNOWN_ROLE},
	provider::{Provider, TokenExpectations},
	redirect,
	role::{Role, RoleStore, RoleType},
	security::{self, TOKEN_BYTES},
	state::{LoginPhase, PendingAuthorization, StateStore, transition},
};

const OPENID_SCOPE: &str = "openid";

/// Drives logins through the provider's authorization-code flow.
#[derive(Clone)]
pub struct OidcLogin {
	provider: Arc<Provider>,
	states: StateStore,
	roles: Arc<dyn RoleStore>,
	directory: Arc<dyn DirectoryService>,
}
impl OidcLogin {
	/// Assemble the flow from its collaborators.
	pub fn new(
		provider: Arc<Provider>,
		states: StateStore,
		roles: Arc<dyn RoleStore>,
		directory: Arc<dyn DirectoryService>,
	) -> Self {
		Self { provider, states, roles, directory }
	}

	/// Pending-authorization table backing the flow.
	pub fn states(&self) -> &StateStore {
		&self.states
	}

	/// Start a login and return the provider URL to send the user agent to.
	///
	/// Unknown roles, non-OIDC roles, and redirect URIs outside the role's allow-list yield an
	/// empty string and create no pending state.
	#[tracing::instrument(skip(self))]
	pub async fn generate_auth_url(&self, role_name: &str, redirect_uri: &str) -> Result<String> {
		let Some(role) = self.roles.role(role_name).await? else {
			tracing::warn!("auth url requested for unknown role");
			metrics::record_auth_url(UNKNOWN_ROLE, false);

			return Ok(String::new());
		};

		if let Err(err) = role.expect_type(role_name, RoleType::Oidc) {
			tracing::warn!(error = %err, "auth url requested for non-OIDC role");
			metrics::record_auth_url(role_name, false);

			return Ok(String::new());
		}
		if !redirect::is_allowed(redirect_uri, &role.allowed_redirect_uris) {
			let err = ValidationError::RedirectNotAllowed(redirect_uri.to_owned());

			tracing::warn!(error = %err, "rejected redirect uri");
			metrics::record_auth_url(role_name, false);

			return Ok(String::new());
		}

		let metadata = self.provider.require_metadata().await?;
		let client_id = self.client_id()?;
		let state = security::random_token(TOKEN_BYTES);
		let nonce = security::random_token(TOKEN_BYTES);
		let code_verifier = security::random_token(TOKEN_BYTES);
		let code_challenge = security::pkce_challenge(&code_verifier);
		let auth_url = authorization_url(
			&metadata.authorization_endpoint,
			AuthorizationParams {
				client_id,
				scope: &scope(&role),
				redirect_uri,
				state: &state,
				nonce: &nonce,
				code_challenge: &code_challenge,
			},
		);
		let pending = self.states.pending(state, nonce, role_name, redirect_uri, code_verifier);

		self.states.insert(pending).await;
		transition(role_name, LoginPhase::Created, LoginPhase::AwaitingCallback);
		metrics::record_auth_url(role_name, true);

		Ok(auth_url.into())
	}

	/// Redeem a callback and produce the caller's identity.
	#[tracing::instrument(skip_all)]
	pub async fn handle_callback(
		&self,
		state: Option<&str>,
		code: Option<&str>,
	) -> Result<Identity> {
		let state = state.filter(|state| !state.is_empty()).unwrap_or_default();
		let pending = match self.states.take(state).await {
			Ok(pending) => pending,
			Err(err) => {
				metrics::record_login(LoginFlow::Oidc, UNKNOWN_ROLE, LoginOutcome::of_error(&err));

				return Err(err);
			},
		};
		let role_name = pending.role.clone();
		let result = self.complete(pending, code).await;
		let phase = if result.is_ok() { LoginPhase::Completed } else { LoginPhase::Failed };

		transition(&role_name, LoginPhase::AwaitingCallback, phase);
		metrics::record_login(LoginFlow::Oidc, &role_name, LoginOutcome::of(&result));

		if let Err(err) = &result {
			tracing::info!(role = %role_name, error = %err, "oidc login rejected");
		}

		result
	}

	async fn complete(
		&self,
		pending: PendingAuthorization,
		code: Option<&str>,
	) -> Result<Identity> {
		let code = code.filter(|code| !code.is_empty()).ok_or(StateError::MissingCode)?;
		let role = self.roles.role(&pending.role).await?.ok_or_else(|| {
			Error::config("role", format!("Role '{}' could not be found.", pending.role))
		})?;

		role.expect_type(&pending.role, RoleType::Oidc)?;

		let metadata = self.provider.require_metadata().await?;
		let client_id = self.client_id()?;
		let tokens = self
			.provider
			.exchange_code(code, &pending.redirect_uri, &pending.code_verifier)
			.await?;
		let mut claims = self
			.provider
			.verify(
				&tokens.id_token,
				&TokenExpectations {
					issuer: Some(&metadata.issuer),
					audience: Some(client_id),
					leeway: role.clock_skew_leeway,
				},
			)
			.await?;

		match claims.get_str("nonce") {
			Some(nonce) if security::constant_time_eq(nonce, &pending.nonce) => {},
			_ => return Err(StateError::NonceMismatch.into()),
		}

		if let Some(access_token) = &tokens.access_token {
			self.merge_user_info(&mut claims, access_token).await;
		}

		identity::assemble(
			&pending.role,
			&role,
			&claims,
			AudiencePolicy::Lenient,
			self.directory.as_ref(),
		)
		.await
	}

	// User-info is best effort: failures leave the ID-token claims untouched.
	async fn merge_user_info(&self, claims: &mut Claims, access_token: &str) {
		match self.provider.user_info(access_token).await {
			Ok(Some(info)) => {
				let subjects = (claims.get_str("sub"), info.get_str("sub"));

				if let (Some(expected), Some(actual)) = subjects
					&& expected != actual
				{
					tracing::warn!("user info subject differs from ID token; ignoring user info");

					return;
				}

				claims.merge_missing(info);
			},
			Ok(None) => {},
			Err(err) => tracing::warn!(error = %err, "user info unavailable; continuing"),
		}
	}

	fn client_id(&self) -> Result<&str> {
		self.provider.config().oidc_client_id.as_deref().ok_or_else(|| {
			Error::config("oidc_client_id", "Must be set for the authorization-code flow.")
		})
	}
}

struct AuthorizationParams<'a> {
	client_id: &'a str,
	scope: &'a str,
	redirect_uri: &'a str,
	state: &'a str,
	nonce: &'a str,
	code_challenge: &'a str,
}

fn authorization_url(endpoint: &Url, params: AuthorizationParams<'_>) -> Url {
	let mut url = endpoint.clone();

	url.query_pairs_mut()
		.append_pair("client_id", params.client_id)
		.append_pair("redirect_uri", params.redirect_uri)
		.append_pair("response_type", "code")
		.append_pair("scope", params.scope)
		.append_pair("state", params.state)
		.append_pair("nonce", params.nonce)
		.append_pair("code_challenge", params.code_challenge)
		.append_pair("code_challenge_method", "S256");

	url
}

fn scope(role: &Role) -> String {
	let mut scopes = vec![OPENID_SCOPE];

	for scope in &role.oidc_scopes {
		if !scopes.contains(&scope.as_str()) {
			scopes.push(scope);
		}
	}

	scopes.join(" ")
}
