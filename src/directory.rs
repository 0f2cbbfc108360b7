//! Optional directory lookups that enrich group membership.

// std
use std::collections::HashMap;
// self
use crate::_prelude::*;

/// Source of group memberships keyed by the resolved user (the alias name).
#[async_trait::async_trait]
pub trait DirectoryService: Send + Sync {
	/// Groups the user belongs to; an unconfigured directory returns an empty list.
	///
	/// Failures reach the caller as [`ProviderError::Directory`].
	async fn groups_for_user(&self, user_key: &str) -> Result<Vec<String>>;
}

/// Directory that is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDirectory;
#[async_trait::async_trait]
impl DirectoryService for NoDirectory {
	async fn groups_for_user(&self, _: &str) -> Result<Vec<String>> {
		Ok(Vec::new())
	}
}

/// Fixed user-to-groups table.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
	members: HashMap<String, Vec<String>>,
}
impl StaticDirectory {
	/// Create an empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Add (or replace) a user's memberships.
	pub fn with_user<I, S>(mut self, user_key: impl Into<String>, groups: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.members.insert(user_key.into(), groups.into_iter().map(Into::into).collect());

		self
	}
}
#[async_trait::async_trait]
impl DirectoryService for StaticDirectory {
	async fn groups_for_user(&self, user_key: &str) -> Result<Vec<String>> {
		Ok(self.members.get(user_key).cloned().unwrap_or_default())
	}
}
