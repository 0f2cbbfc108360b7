//! JWT/OIDC claims validation engine with an authorization-code login state machine: bound
//! claims, audiences, subjects, and groups are enforced per role before an identity is issued.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod claims;
pub mod config;
pub mod directory;
pub mod handler;
pub mod http;
pub mod identity;
pub mod jwt;
pub mod login;
pub mod metrics;
pub mod provider;
pub mod redirect;
pub mod role;
pub mod security;
pub mod state;
pub mod validation;

mod error;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, ProviderError, Result, StateError, ValidationError};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	claims::Claims,
	config::{AuthConfig, JitterStrategy, KeySetPolicy, RetryPolicy},
	directory::{DirectoryService, NoDirectory, StaticDirectory},
	error::{Error, ProviderError, Result, StateError, ValidationError},
	handler::{AuthRequestHandler, AuthUrl, Authenticator, AuthenticatorBuilder},
	identity::{Alias, GroupAlias, Identity},
	role::{InMemoryRoleStore, Role, RoleStore, RoleType},
};
