//! Mock OpenID Connect provider shared by the integration tests.

// std
use std::sync::Arc;
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use jwt_auth::{AuthConfig, Authenticator, InMemoryRoleStore, Role, RoleType};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string_contains, method, path},
};

pub const CLIENT_ID: &str = "abc";
pub const CLIENT_SECRET: &str = "def";
pub const REDIRECT_URI: &str = "https://example.com";
pub const KID: &str = "integration";

const SIGNING_SECRET: &[u8] = b"jwt-auth-integration-signing-secret-012345678";
// `SIGNING_SECRET` in base64url.
const SIGNING_SECRET_B64: &str = "and0LWF1dGgtaW50ZWdyYXRpb24tc2lnbmluZy1zZWNyZXQtMDEyMzQ1Njc4";

pub struct MockProvider {
	pub server: MockServer,
}
impl MockProvider {
	/// Start a provider serving discovery, keys, and user info.
	pub async fn start() -> Self {
		let _ = tracing_subscriber::fmt::try_init();
		// Not pooled: dropping the provider must take the server down.
		let server = MockServer::builder().start().await;
		let issuer = server.uri();

		Mock::given(method("GET"))
			.and(path("/.well-known/openid-configuration"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"issuer": issuer,
				"authorization_endpoint": format!("{issuer}/auth"),
				"token_endpoint": format!("{issuer}/token"),
				"jwks_uri": format!("{issuer}/certs"),
				"userinfo_endpoint": format!("{issuer}/userinfo"),
			})))
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/certs"))
			.respond_with(
				ResponseTemplate::new(200)
					.insert_header("cache-control", "public, max-age=300")
					.set_body_json(key_set(&[KID])),
			)
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/userinfo"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(json!({ "color": "red", "temperature": "76" })),
			)
			.mount(&server)
			.await;

		Self { server }
	}

	pub fn issuer(&self) -> String {
		self.server.uri()
	}

	/// Engine configuration pointing at this provider.
	pub fn config(&self) -> AuthConfig {
		let mut config =
			AuthConfig::oidc(self.issuer(), CLIENT_ID, Some(CLIENT_SECRET.into()))
				.expect("config")
				.with_require_https(false)
				.with_default_role("test")
				.with_supported_algs([Algorithm::HS256]);

		// Ignored by the authorization-code flow, which trusts the discovered issuer.
		config.bound_issuer = Some("http://vault.example.com/".into());
		config.retry_policy.max_retries = 0;

		config
	}

	/// Answer the token endpoint for `code` with `id_token`; other codes get a 401.
	pub async fn expect_code(&self, code: &str, id_token: &str) {
		Mock::given(method("POST"))
			.and(path("/token"))
			.and(body_string_contains(format!("code={code}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"access_token": id_token,
				"id_token": id_token,
				"token_type": "Bearer",
			})))
			.with_priority(1)
			.mount(&self.server)
			.await;
		Mock::given(method("POST"))
			.and(path("/token"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&self.server)
			.await;
	}

	/// Standard ID-token claims issued to the test client, merged with `custom`.
	pub fn id_token_claims(&self, custom: Value) -> Value {
		let now = unix_now();
		let mut claims = json!({
			"sub": "r3qXcK2bix9eFECzsU3Sbmh0K16fatW6@clients",
			"iss": self.issuer(),
			"aud": [CLIENT_ID],
			"nbf": now - 5,
			"exp": now + 60,
		});

		if let (Some(target), Value::Object(extra)) = (claims.as_object_mut(), custom) {
			target.extend(extra);
		}

		claims
	}
}

/// The role used by the login scenarios.
pub fn test_role() -> Role {
	let mut role = Role::new(RoleType::Oidc, "email");

	role.allowed_redirect_uris = vec![REDIRECT_URI.into()];
	role.claim_mappings = [("COLOR", "color"), ("/nested/Size", "size")]
		.map(|(path, key)| (path.to_owned(), key.to_owned()))
		.into();
	role.groups_claim = Some("/nested/Groups".into());
	role.token_ttl = std::time::Duration::from_secs(3 * 60);
	role.token_max_ttl = std::time::Duration::from_secs(5 * 60);
	role.bound_claims = [
		("password", json!("foo")),
		("sk", json!("42")),
		("/nested/secret_code", json!("bar")),
		("temperature", json!("76")),
	]
	.map(|(path, value)| (path.to_owned(), value))
	.into();

	role
}

/// Build an engine whose role store holds `roles`.
pub async fn authenticator(config: AuthConfig, roles: Vec<(&str, Role)>) -> Authenticator {
	let store = Arc::new(InMemoryRoleStore::new());

	for (name, role) in roles {
		store.insert(name, role).await.expect("role");
	}

	Authenticator::builder(config).role_store(store).build().expect("authenticator")
}

pub fn key_set(kids: &[&str]) -> Value {
	let keys: Vec<_> = kids
		.iter()
		.map(|kid| {
			json!({
				"kty": "oct",
				"use": "sig",
				"alg": "HS256",
				"kid": kid,
				"k": SIGNING_SECRET_B64,
			})
		})
		.collect();

	json!({ "keys": keys })
}

pub fn sign(claims: &Value) -> String {
	sign_with_kid(claims, Some(KID))
}

pub fn sign_with_kid(claims: &Value, kid: Option<&str>) -> String {
	let mut header = Header::new(Algorithm::HS256);

	header.kid = kid.map(Into::into);

	jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SIGNING_SECRET)).expect("sign")
}

pub fn query_param(url: &str, name: &str) -> String {
	let url = url::Url::parse(url).expect("auth url");

	url.query_pairs()
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
		.unwrap_or_else(|| panic!("query param {name} not found in {url}"))
}

pub fn unix_now() -> i64 {
	chrono::Utc::now().timestamp()
}
