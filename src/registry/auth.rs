//! Registry bearer authentication
//!
//! Parses `WWW-Authenticate: Bearer` challenges, fetches tokens from the
//! advertised realm, and rewrites challenges so docker clients keep talking
//! to the proxy's own `/token` endpoint instead of the upstream realm.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use http_body_util::BodyExt;
use serde::Deserialize;
use url::Url;

use crate::prelude::*;
use crate::upstream::UpstreamClient;

/// A parsed `WWW-Authenticate: Bearer realm=…,service=…,scope=…` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
	pub realm: String,
	pub service: String,
	pub scope: String,
}

/// Parse a bearer challenge. Returns `None` for other auth schemes.
pub fn parse_challenge(header: &str) -> Option<BearerChallenge> {
	let params = header.trim().strip_prefix("Bearer ")?;
	let mut challenge =
		BearerChallenge { realm: String::new(), service: String::new(), scope: String::new() };
	for part in split_params(params) {
		let (key, value) = part.split_once('=')?;
		let value = value.trim().trim_matches('"');
		match key.trim() {
			"realm" => challenge.realm = value.to_string(),
			"service" => challenge.service = value.to_string(),
			"scope" => challenge.scope = value.to_string(),
			_ => {}
		}
	}
	if challenge.realm.is_empty() {
		return None;
	}
	Some(challenge)
}

/// Split challenge parameters on commas outside quotes
fn split_params(s: &str) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut start = 0;
	let mut in_quotes = false;
	for (idx, c) in s.char_indices() {
		match c {
			'"' => in_quotes = !in_quotes,
			',' if !in_quotes => {
				parts.push(&s[start..idx]);
				start = idx + 1;
			}
			_ => {}
		}
	}
	parts.push(&s[start..]);
	parts
}

/// Build the challenge presented to the client: same service and scope, but
/// the realm points at the proxy's `/token` endpoint.
pub fn client_challenge(proxy_host: &str, challenge: &BearerChallenge) -> String {
	let mut value = format!(r#"Bearer realm="{}/token""#, proxy_host.trim_end_matches('/'));
	if !challenge.service.is_empty() {
		value.push_str(&format!(r#",service="{}""#, challenge.service));
	}
	if !challenge.scope.is_empty() {
		value.push_str(&format!(r#",scope="{}""#, challenge.scope));
	}
	value
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	token: Option<String>,
	access_token: Option<String>,
	expires_in: Option<u64>,
}

/// Fetch a bearer token from the challenge realm. `forward_auth` carries the
/// client's `Authorization` header for basic-auth upstreams.
pub async fn fetch_token(
	client: &UpstreamClient,
	challenge: &BearerChallenge,
	forward_auth: Option<&HeaderValue>,
) -> HpResult<(String, Option<u64>)> {
	let mut url = Url::parse(&challenge.realm)?;
	if !challenge.service.is_empty() {
		url.query_pairs_mut().append_pair("service", &challenge.service);
	}
	if !challenge.scope.is_empty() {
		url.query_pairs_mut().append_pair("scope", &challenge.scope);
	}

	let mut headers = HeaderMap::new();
	if let Some(auth) = forward_auth {
		headers.insert(header::AUTHORIZATION, auth.clone());
	}
	let resp = client.forward(Method::GET, url.as_str(), &headers, Body::empty()).await?;

	let status = resp.status();
	if !status.is_success() {
		return Err(Error::Upstream(format!("token endpoint returned {}", status)));
	}
	let body = resp
		.into_body()
		.collect()
		.await
		.map_err(|err| Error::Upstream(err.to_string()))?
		.to_bytes();
	let parsed: TokenResponse = serde_json::from_slice(&body)?;
	let token = parsed
		.token
		.or(parsed.access_token)
		.ok_or_else(|| Error::Upstream("token endpoint returned no token".into()))?;
	Ok((token, parsed.expires_in))
}


// vim: ts=4
