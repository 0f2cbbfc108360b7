//! HTTP client integration for provider endpoints.

// std
use std::marker::PhantomData;
// crates.io
use http::{HeaderMap, Method, Request, Response, StatusCode, header::ACCEPT};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;
// self
use crate::_prelude::*;

const APPLICATION_JSON: &str = "application/json";
// Upstream error bodies are kept for diagnostics only.
const ERROR_BODY_LIMIT: usize = 1024;

/// HTTP exchange metadata captured for cache semantics evaluation.
#[derive(Clone, Debug)]
pub struct HttpExchange {
	/// Header-only mirror of the request sent upstream.
	pub request: Request<()>,
	/// Response metadata returned from the upstream.
	pub response: Response<()>,
	/// Round-trip duration of the exchange.
	pub elapsed: Duration,
	/// Marker to signal that the response body is empty.
	_body: PhantomData<()>,
}
impl HttpExchange {
	/// Construct a new header-only exchange instance.
	pub fn new(request: Request<()>, response: Response<()>, elapsed: Duration) -> Self {
		Self { request, response, elapsed, _body: PhantomData }
	}

	/// Response headers helper.
	pub fn headers(&self) -> &HeaderMap {
		self.response.headers()
	}

	/// Response status helper.
	pub fn status(&self) -> StatusCode {
		self.response.status()
	}
}

/// Successful upstream response with its body.
#[derive(Clone, Debug)]
pub struct HttpFetch {
	/// Captured HTTP exchange for diagnostics and cache evaluation.
	pub exchange: HttpExchange,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl HttpFetch {
	/// Decode the body as JSON.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		Ok(serde_json::from_slice(&self.body)?)
	}
}

/// Issue a JSON `GET`, optionally authorized with a bearer token.
pub async fn get_json(
	client: &Client,
	url: &Url,
	bearer: Option<&str>,
	attempt_timeout: Duration,
	max_response_bytes: u64,
) -> Result<HttpFetch> {
	let mut builder = client.get(url.clone()).header(ACCEPT, APPLICATION_JSON);

	if let Some(token) = bearer {
		builder = builder.bearer_auth(token);
	}

	execute(builder, Method::GET, url, attempt_timeout, max_response_bytes).await
}

/// Issue a form-encoded `POST` expecting a JSON response.
pub async fn post_form(
	client: &Client,
	url: &Url,
	form: &[(&str, &str)],
	attempt_timeout: Duration,
	max_response_bytes: u64,
) -> Result<HttpFetch> {
	let builder = client.post(url.clone()).header(ACCEPT, APPLICATION_JSON).form(form);

	execute(builder, Method::POST, url, attempt_timeout, max_response_bytes).await
}

async fn execute(
	builder: RequestBuilder,
	method: Method,
	url: &Url,
	attempt_timeout: Duration,
	max_response_bytes: u64,
) -> Result<HttpFetch> {
	let request = Request::builder()
		.method(method)
		.uri(url.as_str())
		.header(ACCEPT, APPLICATION_JSON)
		.body(())
		.map_err(Error::from)?;
	let start = Instant::now();
	let mut response = builder.timeout(attempt_timeout).send().await?;
	let elapsed = start.elapsed();
	let status = response.status();
	let mut response_builder = Response::builder().status(status);

	if let Some(existing) = response_builder.headers_mut() {
		existing.extend(
			response.headers().iter().map(|(name, value)| (name.clone(), value.clone())),
		);
	}

	let response_template = response_builder.body(()).map_err(Error::from)?;

	if !status.is_success() {
		let body = error_body(response).await;

		return Err(Error::HttpStatus { status, url: url.clone(), body });
	}
	if let Some(size) = response.content_length()
		&& size > max_response_bytes
	{
		return Err(Error::ResponseTooLarge { url: url.clone(), size, limit: max_response_bytes });
	}

	let bytes = read_capped(&mut response, url, max_response_bytes).await?;

	tracing::debug!(url = %url, status = %status, elapsed = ?elapsed, "provider request complete");

	Ok(HttpFetch {
		exchange: HttpExchange::new(request, response_template, elapsed),
		body: bytes,
	})
}

// Chunked bodies carry no length up front, so the cap is enforced while reading.
async fn read_capped(response: &mut reqwest::Response, url: &Url, limit: u64) -> Result<Vec<u8>> {
	let mut body = Vec::new();

	while let Some(chunk) = response.chunk().await? {
		let size = (body.len() + chunk.len()) as u64;

		if size > limit {
			return Err(Error::ResponseTooLarge { url: url.clone(), size, limit });
		}

		body.extend_from_slice(&chunk);
	}

	Ok(body)
}

async fn error_body(mut response: reqwest::Response) -> Option<String> {
	let mut body = Vec::new();

	while body.len() < ERROR_BODY_LIMIT {
		match response.chunk().await {
			Ok(Some(chunk)) => body.extend_from_slice(&chunk),
			_ => break,
		}
	}

	body.truncate(ERROR_BODY_LIMIT);

	let text = String::from_utf8_lossy(&body).trim().to_owned();

	(!text.is_empty()).then_some(text)
}
