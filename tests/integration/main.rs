//! Integration tests against a mock OpenID Connect provider.

mod direct_jwt;
mod oidc_login;
mod support;
