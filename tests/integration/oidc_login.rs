//! Authorization-code logins end to end.

// std
use std::collections::BTreeMap;
// crates.io
use jwt_auth::{
	AuthRequestHandler, Error, GroupAlias, ProviderError, Role, RoleType, StateError,
	ValidationError,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
	Mock, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{self, CLIENT_ID, MockProvider, REDIRECT_URI};

fn successful_claims(nonce: &str) -> serde_json::Value {
	json!({
		"nonce": nonce,
		"email": "bob@example.com",
		"COLOR": "green",
		"sk": "42",
		"nested": {
			"Size": "medium",
			"Groups": ["a", "b"],
			"secret_code": "bar",
		},
		"password": "foo",
	})
}

fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
	pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
}

#[tokio::test]
async fn successful_login_produces_mapped_identity() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");
	let id_token = support::sign(&provider.id_token_claims(successful_claims(&nonce)));

	provider.expect_code("abc", &id_token).await;

	let identity = auth.handle_callback(Some(&state), Some("abc")).await.expect("identity");

	assert_eq!(identity.display_name, "bob@example.com");
	assert_eq!(identity.role, "test");
	assert_eq!(identity.alias.name, "bob@example.com");
	assert_eq!(identity.alias.metadata, metadata(&[("color", "green"), ("size", "medium")]));
	assert_eq!(identity.group_aliases, vec![GroupAlias::new("a"), GroupAlias::new("b")]);
	assert_eq!(
		identity.metadata,
		metadata(&[("role", "test"), ("color", "green"), ("size", "medium")])
	);
	assert_eq!(identity.ttl.as_secs(), 3 * 60);
	assert_eq!(identity.max_ttl.as_secs(), 5 * 60);
	assert!(auth.states().is_empty().await);
}

#[tokio::test]
async fn auth_url_carries_login_parameters() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(None, REDIRECT_URI).await.expect("auth url");
	let url = auth_url.auth_url.as_str();

	assert!(url.starts_with(&format!("{}/auth?", provider.issuer())));
	assert_eq!(support::query_param(url, "client_id"), CLIENT_ID);
	assert_eq!(support::query_param(url, "redirect_uri"), REDIRECT_URI);
	assert_eq!(support::query_param(url, "response_type"), "code");
	assert_eq!(support::query_param(url, "scope"), "openid");
	assert_eq!(support::query_param(url, "code_challenge_method"), "S256");
	assert_eq!(support::query_param(url, "state").len(), 43);
	assert_ne!(support::query_param(url, "state"), support::query_param(url, "nonce"));
	assert_eq!(auth.states().len().await, 1);
}

#[tokio::test]
async fn refused_auth_urls_are_empty_and_record_nothing() {
	let provider = MockProvider::start().await;
	let mut direct = Role::new(RoleType::Jwt, "sub");

	direct.bound_audiences.insert("vault".into());

	let auth = support::authenticator(
		provider.config(),
		vec![("test", support::test_role()), ("direct", direct)],
	)
	.await;
	let cases = [
		(Some("test"), "https://evil.example.com"),
		(Some("test"), "http://example.com"),
		(Some("missing"), REDIRECT_URI),
		(Some("direct"), REDIRECT_URI),
	];

	for (role, redirect_uri) in cases {
		let auth_url = auth.generate_auth_url(role, redirect_uri).await.expect("no error");

		assert!(auth_url.is_empty(), "{role:?} {redirect_uri} should be refused");
	}

	assert!(auth.states().is_empty().await);
}

#[tokio::test]
async fn nonce_mismatch_is_rejected() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let id_token = support::sign(&provider.id_token_claims(successful_claims("notgonnamatch")));

	provider.expect_code("abc", &id_token).await;

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("bad nonce");

	assert!(matches!(err, Error::State(StateError::NonceMismatch)));
}

#[tokio::test]
async fn bound_claim_mismatch_is_rejected() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");
	let mut claims = successful_claims(&nonce);

	claims["sk"] = json!("43");

	provider.expect_code("abc", &support::sign(&provider.id_token_claims(claims))).await;

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("sk mismatch");

	assert!(matches!(
		err,
		Error::Validation(ValidationError::ClaimMismatch(ref claim)) if claim == "sk"
	));
}

#[tokio::test]
async fn audience_scenario_maps_color_metadata() {
	let provider = MockProvider::start().await;
	let mut config = provider.config();

	config.oidc_client_id = Some("vault".into());

	let mut role = Role::new(RoleType::Oidc, "email");

	role.allowed_redirect_uris = vec![REDIRECT_URI.into()];
	role.bound_audiences.insert("vault".into());
	role.claim_mappings.insert("COLOR".into(), "color".into());
	role.bound_claims.insert("sk".into(), json!("42"));

	let auth = support::authenticator(config, vec![("test", role)]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");
	let mut claims = provider.id_token_claims(json!({
		"email": "bob@x.com",
		"COLOR": "green",
		"sk": "42",
		"nonce": nonce,
	}));

	claims["aud"] = json!(["vault"]);

	provider.expect_code("abc", &support::sign(&claims)).await;

	let identity = auth.handle_callback(Some(&state), Some("abc")).await.expect("identity");

	assert_eq!(identity.alias.name, "bob@x.com");
	assert_eq!(identity.alias.metadata, metadata(&[("color", "green")]));
}

async fn override_user_info(provider: &MockProvider, response: ResponseTemplate) {
	Mock::given(method("GET"))
		.and(path("/userinfo"))
		.respond_with(response)
		.with_priority(1)
		.mount(&provider.server)
		.await;
}

#[tokio::test]
async fn user_info_for_another_subject_is_discarded() {
	let provider = MockProvider::start().await;

	override_user_info(
		&provider,
		ResponseTemplate::new(200)
			.set_body_json(json!({ "sub": "someone-else", "temperature": "76" })),
	)
	.await;

	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");

	provider
		.expect_code("abc", &support::sign(&provider.id_token_claims(successful_claims(&nonce))))
		.await;

	// `temperature` is only bound through user info, which no longer applies.
	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("discarded");

	assert!(matches!(
		err,
		Error::Validation(ValidationError::ClaimMissing(ref claim)) if claim == "temperature"
	));
}

#[tokio::test]
async fn failing_user_info_does_not_block_login() {
	let provider = MockProvider::start().await;

	override_user_info(&provider, ResponseTemplate::new(500)).await;

	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");
	let mut claims = successful_claims(&nonce);

	claims["temperature"] = json!("76");

	provider.expect_code("abc", &support::sign(&provider.id_token_claims(claims))).await;

	let identity = auth.handle_callback(Some(&state), Some("abc")).await.expect("identity");

	assert_eq!(identity.alias.name, "bob@example.com");
	assert_eq!(identity.alias.metadata, metadata(&[("color", "green"), ("size", "medium")]));
}

#[tokio::test]
async fn missing_or_unknown_state_is_rejected() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;

	for state in [None, Some(""), Some("not-a-state")] {
		let err = auth.handle_callback(state, Some("abc")).await.expect_err("unknown state");

		assert!(matches!(err, Error::State(StateError::ExpiredOrMissingState)));
		assert!(err.to_string().contains("Expired or missing OAuth state"));
	}
}

#[tokio::test]
async fn missing_code_consumes_the_state() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let err = auth.handle_callback(Some(&state), None).await.expect_err("no code");

	assert!(matches!(err, Error::State(StateError::MissingCode)));

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("redeemed");

	assert!(matches!(err, Error::State(StateError::ExpiredOrMissingState)));
}

#[tokio::test]
async fn wrong_code_is_an_exchange_failure() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");

	provider
		.expect_code("abc", &support::sign(&provider.id_token_claims(successful_claims(&nonce))))
		.await;

	let err = auth.handle_callback(Some(&state), Some("wrong_code")).await.expect_err("401");

	assert!(matches!(err, Error::Provider(ProviderError::ExchangeFailed(_))));
	assert!(err.to_string().starts_with("Cannot fetch token"));
}

#[tokio::test]
async fn unreachable_provider_is_an_exchange_failure() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");

	drop(provider);

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("server down");

	assert!(matches!(err, Error::Provider(ProviderError::ExchangeFailed(_))));
}

#[tokio::test]
async fn state_cannot_be_redeemed_twice() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let nonce = support::query_param(&auth_url.auth_url, "nonce");

	provider
		.expect_code("abc", &support::sign(&provider.id_token_claims(successful_claims(&nonce))))
		.await;

	auth.handle_callback(Some(&state), Some("abc")).await.expect("first redemption");

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("replay");

	assert!(matches!(err, Error::State(StateError::ExpiredOrMissingState)));
}

#[tokio::test]
async fn deleted_role_fails_the_callback() {
	let provider = MockProvider::start().await;
	let roles = std::sync::Arc::new(jwt_auth::InMemoryRoleStore::new());

	roles.insert("test", support::test_role()).await.expect("role");

	let auth = jwt_auth::Authenticator::builder(provider.config())
		.role_store(roles.clone())
		.build()
		.expect("authenticator");
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");

	roles.remove("test").await;

	let err = auth.handle_callback(Some(&state), Some("abc")).await.expect_err("role gone");

	assert!(matches!(err, Error::Config { field: "role", .. }));
}

#[tokio::test]
async fn cancelled_callback_returns_cancelled() {
	let provider = MockProvider::start().await;
	let auth = support::authenticator(provider.config(), vec![("test", support::test_role())]).await;
	let auth_url = auth.generate_auth_url(Some("test"), REDIRECT_URI).await.expect("auth url");
	let state = support::query_param(&auth_url.auth_url, "state");
	let cancel = CancellationToken::new();

	cancel.cancel();

	let err = auth
		.handle_callback_with_cancel(Some(&state), Some("abc"), &cancel)
		.await
		.expect_err("cancelled");

	assert!(matches!(err, Error::Cancelled));
}
