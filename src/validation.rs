//! Pure claim validators: bound claims, audiences, groups, and metadata extraction.
//!
//! Every validator is conjunctive and side-effect free; the login pipeline runs them in sequence
//! and aborts on the first rejection.

// std
use std::collections::{BTreeMap, BTreeSet, HashSet};
// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, claims::Claims, identity::GroupAlias};

/// Check every `(path, expected)` pair against the claim set.
///
/// Values compare with strict JSON equality: an integer never equals a float or a string of the
/// same digits. With `case_insensitive`, string values compare with ASCII case folding.
pub fn validate_bound_claims(
	bound: &BTreeMap<String, Value>,
	claims: &Claims,
	case_insensitive: bool,
) -> std::result::Result<(), ValidationError> {
	for (path, expected) in bound {
		let Some(actual) = claims.get(path) else {
			return Err(ValidationError::ClaimMissing(path.clone()));
		};
		let matched = match (expected, actual) {
			(Value::String(expected), Value::String(actual)) if case_insensitive =>
				expected.eq_ignore_ascii_case(actual),
			_ => expected == actual,
		};

		if !matched {
			return Err(ValidationError::ClaimMismatch(path.clone()));
		}
	}

	Ok(())
}

/// Check token audiences against the role's bound audiences.
///
/// With no bound audiences the check passes unless `strict` is set and the token declares any.
pub fn validate_audience(
	bound: &BTreeSet<String>,
	actual: &[String],
	strict: bool,
) -> std::result::Result<(), ValidationError> {
	if bound.is_empty() {
		return if strict && !actual.is_empty() {
			Err(ValidationError::UnexpectedAudience)
		} else {
			Ok(())
		};
	}

	if actual.iter().any(|aud| bound.contains(aud)) {
		Ok(())
	} else {
		Err(ValidationError::AudienceMismatch)
	}
}

/// Require membership in every bound group, reporting all missing names at once.
pub fn validate_groups(
	bound: &BTreeSet<String>,
	group_aliases: &[GroupAlias],
) -> std::result::Result<(), ValidationError> {
	if bound.is_empty() {
		return Ok(());
	}

	let held: HashSet<&str> = group_aliases.iter().map(|alias| alias.name.as_str()).collect();
	let missing: Vec<String> =
		bound.iter().filter(|group| !held.contains(group.as_str())).cloned().collect();

	if missing.is_empty() { Ok(()) } else { Err(ValidationError::MissingGroups(missing)) }
}

/// Map claims to metadata keys; absent claims are skipped, non-strings rejected.
pub fn extract_metadata(
	mappings: &BTreeMap<String, String>,
	claims: &Claims,
) -> std::result::Result<BTreeMap<String, String>, ValidationError> {
	let mut metadata = BTreeMap::new();

	for (path, key) in mappings {
		let Some(value) = claims.get(path) else {
			continue;
		};
		let Value::String(value) = value else {
			return Err(ValidationError::ClaimType(path.clone()));
		};

		metadata.insert(key.clone(), value.clone());
	}

	Ok(metadata)
}

/// Read group aliases from the configured groups claim.
///
/// The claim may hold a single string or a list of strings; duplicates keep their first position.
pub fn groups_from_claims(
	claims: &Claims,
	groups_claim: &str,
) -> std::result::Result<Vec<GroupAlias>, ValidationError> {
	let Some(raw) = claims.get(groups_claim) else {
		return Err(ValidationError::ClaimMissing(groups_claim.to_owned()));
	};
	let names: Vec<&str> = match raw {
		Value::String(name) => vec![name.as_str()],
		Value::Array(items) => items
			.iter()
			.map(|item| item.as_str().ok_or_else(|| ValidationError::ClaimType(groups_claim.into())))
			.collect::<std::result::Result<_, _>>()?,
		_ => return Err(ValidationError::ClaimType(groups_claim.to_owned())),
	};
	let mut aliases = Vec::with_capacity(names.len());

	extend_groups(&mut aliases, names);

	Ok(aliases)
}

/// Append group names not already present.
pub fn extend_groups<I, S>(aliases: &mut Vec<GroupAlias>, names: I)
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen: HashSet<String> = aliases.iter().map(|alias| alias.name.clone()).collect();

	for name in names {
		let name = name.as_ref();

		if !name.is_empty() && seen.insert(name.to_owned()) {
			aliases.push(GroupAlias::new(name));
		}
	}
}
