//! Role configuration and the read-only role store seam.
//!
//! Roles describe which tokens a login may succeed with and how claims map onto the resulting
//! identity. They are immutable for the duration of a login and shared as `Arc<Role>`.

// std
use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
// self
use crate::_prelude::*;

/// Default lifetime requested for issued credentials.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
/// Default clock skew tolerated on `exp`/`nbf`.
pub const DEFAULT_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(60);

/// Login flow served by a role.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
	/// Caller presents a signed JWT directly.
	Jwt,
	/// Browser-based authorization-code flow.
	#[default]
	Oidc,
}
impl Display for RoleType {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			RoleType::Jwt => f.write_str("jwt"),
			RoleType::Oidc => f.write_str("oidc"),
		}
	}
}

/// Named login configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Role {
	/// Login flow this role accepts.
	#[serde(default)]
	pub role_type: RoleType,
	/// Claim (or JSON pointer) whose value becomes the alias name.
	pub user_claim: String,
	/// Audiences of which at least one must appear in the token.
	#[serde(default)]
	pub bound_audiences: BTreeSet<String>,
	/// Exact value required of the `sub` claim.
	#[serde(default)]
	pub bound_subject: Option<String>,
	/// Claims that must be present with exactly the given values.
	#[serde(default)]
	pub bound_claims: BTreeMap<String, Value>,
	/// Compare string-valued bound claims ignoring ASCII case.
	#[serde(default)]
	pub bound_claims_case_insensitive: bool,
	/// Claim (or pointer) to alias metadata key.
	#[serde(default)]
	pub claim_mappings: BTreeMap<String, String>,
	/// Claim (or pointer) holding the caller's group names.
	#[serde(default)]
	pub groups_claim: Option<String>,
	/// Groups the caller must belong to.
	#[serde(default)]
	pub bound_groups: BTreeSet<String>,
	/// Callback targets accepted by the OIDC flow, in configuration order.
	#[serde(default)]
	pub allowed_redirect_uris: Vec<String>,
	/// Scopes requested in addition to `openid`.
	#[serde(default)]
	pub oidc_scopes: Vec<String>,
	/// Requested credential TTL.
	#[serde(default = "default_token_ttl")]
	pub token_ttl: Duration,
	/// Upper bound for credential renewal; zero defers to the host default.
	#[serde(default)]
	pub token_max_ttl: Duration,
	/// Tolerance applied to `exp` and `nbf`.
	#[serde(default = "default_clock_skew_leeway")]
	pub clock_skew_leeway: Duration,
}
impl Role {
	/// Create a role of the given type keyed on `user_claim`, with defaults elsewhere.
	pub fn new(role_type: RoleType, user_claim: impl Into<String>) -> Self {
		Self {
			role_type,
			user_claim: user_claim.into(),
			token_ttl: DEFAULT_TOKEN_TTL,
			clock_skew_leeway: DEFAULT_CLOCK_SKEW_LEEWAY,
			..Default::default()
		}
	}

	/// Validate the role against its documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.user_claim.trim().is_empty() {
			return Err(Error::config("user_claim", "Must not be empty."));
		}
		if self.role_type == RoleType::Oidc && self.allowed_redirect_uris.is_empty() {
			return Err(Error::config(
				"allowed_redirect_uris",
				"OIDC roles must allow at least one redirect URI.",
			));
		}
		if !self.token_max_ttl.is_zero() && self.token_max_ttl < self.token_ttl {
			return Err(Error::config(
				"token_max_ttl",
				"Must be zero or greater than or equal to token_ttl.",
			));
		}
		if !self.bound_groups.is_empty() && self.groups_claim.is_none() {
			return Err(Error::config(
				"bound_groups",
				"Binding groups requires a groups_claim to read memberships from.",
			));
		}
		if self.bound_claims.keys().chain(self.claim_mappings.keys()).any(|k| k.is_empty()) {
			return Err(Error::config("bound_claims", "Claim paths must not be empty."));
		}

		let mut targets = BTreeSet::new();

		for target in self.claim_mappings.values() {
			if target == "role" {
				return Err(Error::config(
					"claim_mappings",
					"Metadata key 'role' is reserved for the role name.",
				));
			}
			if !targets.insert(target) {
				return Err(Error::config(
					"claim_mappings",
					format!("Metadata key '{target}' is mapped more than once."),
				));
			}
		}

		Ok(())
	}

	/// Ensure the role serves the requested flow.
	pub fn expect_type(&self, name: &str, expected: RoleType) -> Result<()> {
		if self.role_type == expected {
			Ok(())
		} else {
			Err(ValidationError::WrongRoleType {
				role: name.to_owned(),
				expected,
				actual: self.role_type,
			}
			.into())
		}
	}
}

/// Read path of the external configuration store.
#[async_trait::async_trait]
pub trait RoleStore: Send + Sync {
	/// Look up a role by name.
	async fn role(&self, name: &str) -> Result<Option<Arc<Role>>>;
}

/// Role store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
	roles: RwLock<HashMap<String, Arc<Role>>>,
}
impl InMemoryRoleStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Validate and insert (or replace) a role.
	pub async fn insert(&self, name: impl Into<String>, role: Role) -> Result<()> {
		let name = name.into();

		if name.is_empty() {
			return Err(Error::config("role", "Role name must not be empty."));
		}

		role.validate()?;
		self.roles.write().await.insert(name, Arc::new(role));

		Ok(())
	}

	/// Remove a role, reporting whether it existed.
	pub async fn remove(&self, name: &str) -> bool {
		self.roles.write().await.remove(name).is_some()
	}
}
#[async_trait::async_trait]
impl RoleStore for InMemoryRoleStore {
	async fn role(&self, name: &str) -> Result<Option<Arc<Role>>> {
		Ok(self.roles.read().await.get(name).cloned())
	}
}

fn default_token_ttl() -> Duration {
	DEFAULT_TOKEN_TTL
}

fn default_clock_skew_leeway() -> Duration {
	DEFAULT_CLOCK_SKEW_LEEWAY
}
