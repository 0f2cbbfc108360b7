//! Redirect-URI allow-list matching.
//!
//! Matching is structural and exact: scheme, host, port, path, and raw query must all agree.
//! DNS hosts compare case-insensitively and IP literals in canonical form. Ports and paths compare
//! as written, so an explicit default port differs from an omitted one, and candidates whose path
//! changes under normalization never match. The only leniency is
//! for loopback hosts, whose port is ignored so native clients can listen on ephemeral ports
//! (RFC 8252 §7.3).

// std
use std::net::{Ipv4Addr, Ipv6Addr};
// crates.io
use url::{Host, Url};

/// Whether `candidate` matches any entry of `allowed`. Unparseable entries never match.
pub fn is_allowed(candidate: &str, allowed: &[String]) -> bool {
	let Some(candidate) = Redirect::parse(candidate) else {
		tracing::debug!(candidate, "redirect uri is not a valid url");

		return false;
	};

	if candidate.url.fragment().is_some() {
		return false;
	}
	// Dot segments and percent-encoded dots collapse during parsing.
	if !candidate.is_normalized() {
		tracing::debug!(path = candidate.path, "redirect uri path is not in normal form");

		return false;
	}

	allowed
		.iter()
		.filter_map(|entry| Redirect::parse(entry))
		.any(|entry| matches(&candidate, &entry))
}

/// Parsed URL alongside the port and path exactly as written.
struct Redirect<'a> {
	url: Url,
	port: Option<&'a str>,
	path: &'a str,
}
impl<'a> Redirect<'a> {
	fn parse(raw: &'a str) -> Option<Self> {
		let url = Url::parse(raw).ok()?;
		let (_, rest) = raw.split_once("://")?;
		let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
		let (authority, tail) = rest.split_at(authority_end);
		let host_port = authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port);
		let port = match host_port.rfind(']') {
			Some(end) => host_port[end + 1..].strip_prefix(':'),
			None => host_port.rsplit_once(':').map(|(_, port)| port),
		};
		let path = &tail[..tail.find(['?', '#']).unwrap_or(tail.len())];

		Some(Self { url, port, path })
	}

	fn is_normalized(&self) -> bool {
		self.url.path() == self.path || (self.path.is_empty() && self.url.path() == "/")
	}
}

fn matches(candidate: &Redirect<'_>, allowed: &Redirect<'_>) -> bool {
	let (candidate_url, allowed_url) = (&candidate.url, &allowed.url);

	if candidate_url.scheme() != allowed_url.scheme()
		|| candidate_url.username() != allowed_url.username()
		|| candidate_url.password() != allowed_url.password()
	{
		return false;
	}

	let (Some(candidate_host), Some(allowed_host)) = (candidate_url.host(), allowed_url.host())
	else {
		return false;
	};

	if !same_host(&candidate_host, &allowed_host) {
		return false;
	}
	if !is_loopback(&candidate_host) && candidate.port != allowed.port {
		return false;
	}

	candidate.path == allowed.path && candidate_url.query() == allowed_url.query()
}

fn same_host(candidate: &Host<&str>, allowed: &Host<&str>) -> bool {
	match (candidate, allowed) {
		(Host::Domain(a), Host::Domain(b)) => a.eq_ignore_ascii_case(b),
		(Host::Ipv4(a), Host::Ipv4(b)) => a == b,
		(Host::Ipv6(a), Host::Ipv6(b)) => a == b,
		_ => false,
	}
}

fn is_loopback(host: &Host<&str>) -> bool {
	match host {
		Host::Domain(domain) => domain.eq_ignore_ascii_case("localhost"),
		Host::Ipv4(ip) => *ip == Ipv4Addr::LOCALHOST,
		Host::Ipv6(ip) => *ip == Ipv6Addr::LOCALHOST,
	}
}
