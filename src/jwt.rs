//! Direct JWT logins: a caller presents a provider-signed token without a browser round-trip.

// self
use crate::{
	_prelude::*,
	directory::DirectoryService,
	identity::{self, AudiencePolicy, Identity},
	metrics::{self, LoginFlow, LoginOutcome, UNKNOWN_ROLE},
	provider::{Provider, TokenExpectations},
	role::{Role, RoleStore, RoleType},
};

/// Verifies directly presented tokens for `jwt` roles.
#[derive(Clone)]
pub struct DirectTokenVerifier {
	provider: Arc<Provider>,
	roles: Arc<dyn RoleStore>,
	directory: Arc<dyn DirectoryService>,
}
impl DirectTokenVerifier {
	/// Assemble the verifier from its collaborators.
	pub fn new(
		provider: Arc<Provider>,
		roles: Arc<dyn RoleStore>,
		directory: Arc<dyn DirectoryService>,
	) -> Self {
		Self { provider, roles, directory }
	}

	/// Verify `raw_token` for `role_name` and produce the caller's identity.
	///
	/// The issuer is the configured `bound_issuer`, falling back to the discovered issuer; with
	/// neither available the issuer is not checked. Audiences are matched strictly against the
	/// role.
	#[tracing::instrument(skip(self, raw_token))]
	pub async fn verify_direct_token(&self, role_name: &str, raw_token: &str) -> Result<Identity> {
		let role = self.roles.role(role_name).await;
		// Caller-chosen names only become labels once they name a stored role.
		let label = if matches!(role, Ok(Some(_))) { role_name } else { UNKNOWN_ROLE };
		let result = match role {
			Ok(Some(role)) => self.verify(role_name, &role, raw_token).await,
			Ok(None) =>
				Err(Error::config("role", format!("Role '{role_name}' could not be found."))),
			Err(err) => Err(err),
		};

		metrics::record_login(LoginFlow::Jwt, label, LoginOutcome::of(&result));

		if let Err(err) = &result {
			tracing::info!(error = %err, "jwt login rejected");
		}

		result
	}

	async fn verify(&self, role_name: &str, role: &Role, raw_token: &str) -> Result<Identity> {
		role.expect_type(role_name, RoleType::Jwt)?;

		let metadata = self.provider.metadata().await?;
		let issuer = self
			.provider
			.config()
			.bound_issuer
			.as_deref()
			.or(metadata.as_deref().map(|metadata| metadata.issuer.as_str()));
		let claims = self
			.provider
			.verify(
				raw_token,
				&TokenExpectations { issuer, audience: None, leeway: role.clock_skew_leeway },
			)
			.await?;

		identity::assemble(
			role_name,
			role,
			&claims,
			AudiencePolicy::Strict,
			self.directory.as_ref(),
		)
		.await
	}
}
