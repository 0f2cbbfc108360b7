//! Request-handler surface exposed to the host framework.

// crates.io
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::AuthConfig,
	directory::{DirectoryService, NoDirectory},
	identity::Identity,
	jwt::DirectTokenVerifier,
	login::OidcLogin,
	provider::Provider,
	role::{InMemoryRoleStore, RoleStore},
	state::StateStore,
};

/// Response of an auth-URL request. An empty URL means the request was refused.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUrl {
	/// Provider authorization URL, or empty.
	pub auth_url: String,
}
impl AuthUrl {
	/// Whether the request was refused.
	pub fn is_empty(&self) -> bool {
		self.auth_url.is_empty()
	}
}

/// Operations the host framework dispatches to the engine.
#[async_trait::async_trait]
pub trait AuthRequestHandler: Send + Sync {
	/// Start an OIDC login for `role_name` (or the default role).
	async fn generate_auth_url(
		&self,
		role_name: Option<&str>,
		redirect_uri: &str,
	) -> Result<AuthUrl>;

	/// Complete an OIDC login from the provider callback parameters.
	async fn handle_callback(&self, state: Option<&str>, code: Option<&str>) -> Result<Identity>;

	/// Authenticate a directly presented JWT against `role_name` (or the default role).
	async fn verify_direct_token(
		&self,
		role_name: Option<&str>,
		raw_token: &str,
	) -> Result<Identity>;
}

/// Builder for [`Authenticator`].
pub struct AuthenticatorBuilder {
	config: AuthConfig,
	roles: Option<Arc<dyn RoleStore>>,
	directory: Option<Arc<dyn DirectoryService>>,
}
impl AuthenticatorBuilder {
	/// Use `roles` as the role store (defaults to an empty in-memory store).
	pub fn role_store(mut self, roles: Arc<dyn RoleStore>) -> Self {
		self.roles = Some(roles);

		self
	}

	/// Enrich group memberships from `directory` (defaults to none).
	pub fn directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
		self.directory = Some(directory);

		self
	}

	/// Validate the configuration and construct the engine.
	pub fn build(self) -> Result<Authenticator> {
		self.config.validate()?;

		let config = Arc::new(self.config);
		let roles = self.roles.unwrap_or_else(|| Arc::new(InMemoryRoleStore::new()));
		let directory = self.directory.unwrap_or_else(|| Arc::new(NoDirectory));
		let provider = Arc::new(Provider::new(config.clone())?);
		let states = StateStore::new(config.state_ttl, config.max_pending_states);
		let login = OidcLogin::new(provider.clone(), states, roles.clone(), directory.clone());
		let direct = DirectTokenVerifier::new(provider, roles, directory);

		tracing::debug!(
			oidc = config.oidc_enabled(),
			default_role = config.default_role.as_deref(),
			"authenticator configured"
		);

		Ok(Authenticator { config, login, direct, shutdown: CancellationToken::new() })
	}
}

/// Login engine combining the OIDC flow and direct JWT verification.
pub struct Authenticator {
	config: Arc<AuthConfig>,
	login: OidcLogin,
	direct: DirectTokenVerifier,
	shutdown: CancellationToken,
}
impl Authenticator {
	/// Start building an engine from `config`.
	pub fn builder(config: AuthConfig) -> AuthenticatorBuilder {
		AuthenticatorBuilder { config, roles: None, directory: None }
	}

	/// Engine configuration.
	pub fn config(&self) -> &AuthConfig {
		&self.config
	}

	/// Pending-authorization table.
	pub fn states(&self) -> &StateStore {
		self.login.states()
	}

	/// Spawn the background sweeper for expired authorizations.
	///
	/// Must be called from within a Tokio runtime. The task stops on [`Authenticator::shutdown`]
	/// or when the engine is dropped.
	pub fn start_sweeper(&self) -> JoinHandle<()> {
		self.login.states().spawn_sweeper(self.config.sweep_interval, self.shutdown.child_token())
	}

	/// Stop background work.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// [`AuthRequestHandler::handle_callback`] that gives up when `cancel` fires.
	///
	/// Cancelling drops in-flight provider requests; a state already taken stays redeemed.
	pub async fn handle_callback_with_cancel(
		&self,
		state: Option<&str>,
		code: Option<&str>,
		cancel: &CancellationToken,
	) -> Result<Identity> {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(Error::Cancelled),
			result = self.login.handle_callback(state, code) => result,
		}
	}
}
impl Drop for Authenticator {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}
#[async_trait::async_trait]
impl AuthRequestHandler for Authenticator {
	async fn generate_auth_url(
		&self,
		role_name: Option<&str>,
		redirect_uri: &str,
	) -> Result<AuthUrl> {
		let Some(role_name) = self.config.resolve_role_name(role_name) else {
			tracing::warn!("auth url requested without a role and no default role is set");

			return Ok(AuthUrl::default());
		};
		let auth_url = self.login.generate_auth_url(role_name, redirect_uri).await?;

		Ok(AuthUrl { auth_url })
	}

	async fn handle_callback(&self, state: Option<&str>, code: Option<&str>) -> Result<Identity> {
		self.login.handle_callback(state, code).await
	}

	async fn verify_direct_token(
		&self,
		role_name: Option<&str>,
		raw_token: &str,
	) -> Result<Identity> {
		let role_name = self
			.config
			.resolve_role_name(role_name)
			.ok_or_else(|| Error::config("role", "Missing role and no default role is set."))?;

		self.direct.verify_direct_token(role_name, raw_token).await
	}
}
