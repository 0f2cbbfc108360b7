//! Directly presented JWTs verified against `jwt` roles.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use jwt_auth::{
	AuthRequestHandler, Authenticator, Error, GroupAlias, InMemoryRoleStore, ProviderError, Role,
	RoleType, StaticDirectory, ValidationError,
};
use serde_json::{Value, json};
use wiremock::{
	Mock, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{self, KID, MockProvider};

const BOUND_ISSUER: &str = "http://vault.example.com/";

fn direct_role() -> Role {
	let mut role = Role::new(RoleType::Jwt, "email");

	role.bound_audiences.insert("vault".into());
	role.bound_subject = Some("r3qXcK2bix9eFECzsU3Sbmh0K16fatW6@clients".into());
	role.claim_mappings.insert("COLOR".into(), "color".into());

	role
}

fn direct_claims(provider: &MockProvider, custom: Value) -> Value {
	let mut claims = provider.id_token_claims(json!({
		"email": "ci@example.com",
		"COLOR": "blue",
	}));

	claims["iss"] = json!(BOUND_ISSUER);
	claims["aud"] = json!(["vault"]);

	if let (Some(target), Value::Object(extra)) = (claims.as_object_mut(), custom) {
		target.extend(extra);
	}

	claims
}

#[tokio::test]
async fn direct_token_produces_identity() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({})));
	let identity = auth.verify_direct_token(Some("ci"), &token).await.expect("identity");

	assert_eq!(identity.role, "ci");
	assert_eq!(identity.alias.name, "ci@example.com");
	assert_eq!(identity.alias.metadata.get("color").map(String::as_str), Some("blue"));
	assert_eq!(identity.metadata.get("role").map(String::as_str), Some("ci"));
	assert!(identity.group_aliases.is_empty());
}

#[tokio::test]
async fn audiences_are_matched_strictly() {
	let provider = MockProvider::start().await;
	let mut unbound = direct_role();

	unbound.bound_audiences.clear();

	let auth = support::authenticator(
		provider.config(),
		vec![("ci", direct_role()), ("unbound", unbound)],
	)
	.await;
	let foreign = support::sign(&direct_claims(&provider, json!({ "aud": ["other"] })));
	let err = auth.verify_direct_token(Some("ci"), &foreign).await.expect_err("foreign aud");

	assert!(matches!(err, Error::Validation(ValidationError::AudienceMismatch)));

	let token = support::sign(&direct_claims(&provider, json!({})));
	let err = auth.verify_direct_token(Some("unbound"), &token).await.expect_err("unbound aud");

	assert!(matches!(err, Error::Validation(ValidationError::UnexpectedAudience)));
}

#[tokio::test]
async fn subject_must_match_the_bound_subject() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({ "sub": "someone-else" })));
	let err = auth.verify_direct_token(Some("ci"), &token).await.expect_err("subject");

	assert!(matches!(err, Error::Validation(ValidationError::SubjectMismatch)));
}

#[tokio::test]
async fn oidc_roles_refuse_direct_tokens() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({})));
	let err = auth.verify_direct_token(None, &token).await.expect_err("wrong role type");

	assert!(matches!(
		err,
		Error::Validation(ValidationError::WrongRoleType {
			expected: RoleType::Jwt,
			actual: RoleType::Oidc,
			..
		})
	));
}

#[tokio::test]
async fn bound_issuer_is_enforced() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({ "iss": provider.issuer() })));
	let err = auth.verify_direct_token(Some("ci"), &token).await.expect_err("issuer");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));
}

#[tokio::test]
async fn forged_and_unsupported_tokens_fail_verification() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let claims = direct_claims(&provider, json!({}));
	let mut header = Header::new(Algorithm::HS256);

	header.kid = Some(KID.into());

	let forged = jsonwebtoken::encode(
		&header,
		&claims,
		&EncodingKey::from_secret(b"not-the-provider-signing-secret-at-all"),
	)
	.expect("sign");
	let err = auth.verify_direct_token(Some("ci"), &forged).await.expect_err("forged");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));

	header.alg = Algorithm::HS384;

	let unsupported =
		jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(b"any-secret"))
			.expect("sign");
	let err = auth.verify_direct_token(Some("ci"), &unsupported).await.expect_err("alg");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));

	let err = auth.verify_direct_token(Some("ci"), "not.a.jwt").await.expect_err("garbage");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));
}

#[tokio::test]
async fn expired_tokens_fail_verification() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let now = support::unix_now();
	let token =
		support::sign(&direct_claims(&provider, json!({ "nbf": now - 900, "exp": now - 600 })));
	let err = auth.verify_direct_token(Some("ci"), &token).await.expect_err("expired");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));
}

#[tokio::test]
async fn tokens_without_kid_try_every_key() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let token = support::sign_with_kid(&direct_claims(&provider, json!({})), None);

	auth.verify_direct_token(Some("ci"), &token).await.expect("identity");
}

#[tokio::test]
async fn unknown_kid_refreshes_the_key_set() {
	let provider = MockProvider::start().await;
	let mut config = provider.config();

	config.key_set.kid_miss_cooldown = Duration::ZERO;

	let auth = support::authenticator(config, vec![("ci", direct_role())]).await;
	let claims = direct_claims(&provider, json!({}));

	auth.verify_direct_token(Some("ci"), &support::sign(&claims)).await.expect("cached keys");

	Mock::given(method("GET"))
		.and(path("/certs"))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(support::key_set(&[KID, "rotated"])),
		)
		.with_priority(1)
		.expect(1)
		.mount(&provider.server)
		.await;

	let rotated = support::sign_with_kid(&claims, Some("rotated"));

	auth.verify_direct_token(Some("ci"), &rotated).await.expect("rotated key");
	auth.verify_direct_token(Some("ci"), &rotated).await.expect("served from cache");
}

#[tokio::test]
async fn unknown_kid_within_cooldown_is_rejected() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("ci", direct_role())]).await;
	let claims = direct_claims(&provider, json!({}));

	auth.verify_direct_token(Some("ci"), &support::sign(&claims)).await.expect("cached keys");

	let err = auth
		.verify_direct_token(Some("ci"), &support::sign_with_kid(&claims, Some("rotated")))
		.await
		.expect_err("cooldown");

	assert!(matches!(err, Error::Provider(ProviderError::TokenVerificationFailed(_))));
}

#[tokio::test]
async fn directory_groups_satisfy_bound_groups() {
	let provider = MockProvider::start().await;
	let mut role = direct_role();

	role.groups_claim = Some("groups".into());
	role.bound_groups.insert("ops".into());

	let roles = Arc::new(InMemoryRoleStore::new());

	roles.insert("ci", role).await.expect("role");

	let directory = StaticDirectory::new().with_user("ci@example.com", ["ops"]);
	let auth = Authenticator::builder(provider.config())
		.role_store(roles)
		.directory(Arc::new(directory))
		.build()
		.expect("authenticator");
	let token = support::sign(&direct_claims(&provider, json!({ "groups": ["dev"] })));
	let identity = auth.verify_direct_token(Some("ci"), &token).await.expect("identity");

	assert_eq!(identity.group_aliases, vec![GroupAlias::new("dev"), GroupAlias::new("ops")]);
}

#[tokio::test]
async fn missing_role_without_default_is_a_config_error() {
	let provider = MockProvider::start().await;
	let mut config = provider.config();

	config.default_role = None;

	let auth = support::authenticator(config, vec![("ci", direct_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({})));
	let err = auth.verify_direct_token(None, &token).await.expect_err("no role");

	assert!(matches!(err, Error::Config { field: "role", .. }));

	let err = auth.verify_direct_token(Some("nope"), &token).await.expect_err("unknown role");

	assert!(matches!(err, Error::Config { field: "role", .. }));
}

#[tokio::test]
async fn key_set_only_configuration_verifies_tokens() {
	let provider = MockProvider::start().await;
	let mut config = jwt_auth::AuthConfig::jwks(format!("{}/certs", provider.issuer()))
		.expect("config")
		.with_require_https(false)
		.with_supported_algs([Algorithm::HS256]);

	config.bound_issuer = Some(BOUND_ISSUER.into());

	let auth = support::authenticator(config, vec![("ci", direct_role())]).await;
	let token = support::sign(&direct_claims(&provider, json!({})));

	auth.verify_direct_token(Some("ci"), &token).await.expect("identity");

	let auth_url = auth.generate_auth_url(Some("ci"), support::REDIRECT_URI).await.expect("url");

	assert!(auth_url.is_empty());
}
