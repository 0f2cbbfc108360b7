//! Validated login results and the shared claims-to-identity pipeline.

// std
use std::collections::BTreeMap;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	claims::Claims,
	directory::DirectoryService,
	error::chain,
	role::Role,
	validation::{self, extend_groups},
};

/// Metadata key carrying the role name on every identity.
pub const ROLE_METADATA_KEY: &str = "role";

/// External identity as known to the host system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
	/// Value of the role's user claim.
	pub name: String,
	/// Metadata extracted through the role's claim mappings.
	pub metadata: BTreeMap<String, String>,
}

/// Group membership granted to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupAlias {
	/// Group name.
	pub name: String,
}
impl GroupAlias {
	/// Create a group alias.
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}
}

/// Result of a successful login, handed to the host for credential issuance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	/// Human-facing name, identical to the alias name.
	pub display_name: String,
	/// Role the login was performed against.
	pub role: String,
	/// Mapped external identity.
	pub alias: Alias,
	/// Group aliases from the groups claim and the directory service.
	pub group_aliases: Vec<GroupAlias>,
	/// Alias metadata plus the role name.
	pub metadata: BTreeMap<String, String>,
	/// Requested credential TTL.
	pub ttl: Duration,
	/// Requested maximum credential TTL.
	pub max_ttl: Duration,
	/// Time the identity was assembled.
	pub issued_at: DateTime<Utc>,
}

/// Audience policy applied by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AudiencePolicy {
	/// A token with audiences must match bound audiences.
	Strict,
	/// Empty bound audiences accept any token.
	Lenient,
}

/// Run the role's validators against verified claims and assemble the identity.
pub(crate) async fn assemble(
	role_name: &str,
	role: &Role,
	claims: &Claims,
	audience: AudiencePolicy,
	directory: &dyn DirectoryService,
) -> Result<Identity> {
	if let Some(subject) = &role.bound_subject
		&& claims.get_str("sub") != Some(subject.as_str())
	{
		return Err(ValidationError::SubjectMismatch.into());
	}

	validation::validate_bound_claims(
		&role.bound_claims,
		claims,
		role.bound_claims_case_insensitive,
	)?;
	validation::validate_audience(
		&role.bound_audiences,
		&claims.audiences(),
		audience == AudiencePolicy::Strict,
	)?;

	let alias_name = match claims.get(&role.user_claim) {
		None => return Err(ValidationError::ClaimMissing(role.user_claim.clone()).into()),
		Some(value) => value
			.as_str()
			.filter(|name| !name.is_empty())
			.ok_or_else(|| ValidationError::ClaimType(role.user_claim.clone()))?
			.to_owned(),
	};
	let alias_metadata = validation::extract_metadata(&role.claim_mappings, claims)?;
	let mut group_aliases = match &role.groups_claim {
		Some(groups_claim) => validation::groups_from_claims(claims, groups_claim)?,
		None => Vec::new(),
	};
	let directory_groups =
		directory.groups_for_user(&alias_name).await.map_err(|err| match err {
			Error::Provider(ProviderError::Directory(_)) => err,
			err => ProviderError::Directory(chain(&err)).into(),
		})?;

	if !directory_groups.is_empty() {
		tracing::debug!(
			role = role_name,
			count = directory_groups.len(),
			"merging directory group memberships"
		);
	}

	extend_groups(&mut group_aliases, directory_groups);
	validation::validate_groups(&role.bound_groups, &group_aliases)?;

	let mut metadata = alias_metadata.clone();

	metadata.insert(ROLE_METADATA_KEY.into(), role_name.into());

	Ok(Identity {
		display_name: alias_name.clone(),
		role: role_name.to_owned(),
		alias: Alias { name: alias_name, metadata: alias_metadata },
		group_aliases,
		metadata,
		ttl: role.token_ttl,
		max_ttl: role.token_max_ttl,
		issued_at: Utc::now(),
	})
}
