//! Generic URL proxy
//!
//! Catch-all handler: treats the request URI as a target URL, admits it
//! through the pattern registry and the access controller, then forwards it
//! upstream. Proxyable redirects are rewritten back onto this host; foreign
//! ones are followed server-side. `*.sh` bodies go through the script
//! rewriter.

pub mod patterns;
pub mod rewrite;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::access::check_github;
use crate::prelude::*;
use crate::upstream::{request_host, sanitize_response_headers};

const MAX_REDIRECTS: usize = 20;

/// Normalise a raw request path into an `https://` target URL, repairing
/// the `http:/`-style prefixes that path normalisation leaves behind.
fn normalize_target(raw: &str) -> String {
	let raw = raw.trim_start_matches('/');
	if raw.starts_with("https://") {
		return raw.to_string();
	}
	let stripped = if let Some(rest) = raw.strip_prefix("http://") {
		rest
	} else if let Some(rest) = raw.strip_prefix("https:/") {
		rest
	} else if let Some(rest) = raw.strip_prefix("http:/") {
		rest
	} else {
		raw
	};
	format!("https://{}", stripped.trim_start_matches('/'))
}

/// Whether the target's path component names a shell script
fn is_shell_script(target: &str) -> bool {
	let path = target.split(['?', '#']).next().unwrap_or(target);
	path.to_lowercase().ends_with(".sh")
}

pub async fn handler(State(app): State<App>, req: Request) -> Response {
	match forward(app, req).await {
		Ok(resp) => resp,
		Err(err) => err.into_response(),
	}
}

async fn forward(app: App, req: Request) -> HpResult<Response> {
	let config = app.config.current();

	let raw = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
	let mut target = normalize_target(raw);

	let Some(matches) = patterns::match_target(&target) else {
		debug!("rejecting non-proxyable target {}", target);
		return Err(Error::InvalidTarget);
	};
	let user = matches.first().map(String::as_str).unwrap_or("");
	let repo = matches.get(1).map(String::as_str).unwrap_or("");
	check_github(&config, user, repo).map_err(|err| {
		info!("github access denied for {}/{}: {}", user, repo, err);
		err
	})?;

	if patterns::is_blob_url(&target) {
		target = target.replacen("/blob/", "/raw/", 1);
	}

	let (parts, body) = req.into_parts();
	let proxy_host = request_host(&parts.headers);
	let mut body = Some(body);
	let mut current = target;
	let mut hops = 0;

	loop {
		debug!("proxying {} {}", parts.method, current);
		let resp = app
			.client
			.forward(
				parts.method.clone(),
				&current,
				&parts.headers,
				body.take().unwrap_or_else(Body::empty),
			)
			.await?;

		// Enforce the size limit on declared lengths before streaming.
		if let Some(length) = resp
			.headers()
			.get(header::CONTENT_LENGTH)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.parse::<u64>().ok())
		{
			if length > config.server.file_size {
				return Err(Error::BodyTooLarge(config.server.file_size));
			}
		}

		if let Some(location) =
			resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).map(str::to_string)
		{
			if patterns::match_target(&location).is_some() {
				// Keep the client on the proxy: point the redirect back at us.
				return respond(resp, &current, &proxy_host, Some(&location));
			}
			hops += 1;
			if hops > MAX_REDIRECTS {
				return Err(Error::RedirectLoop);
			}
			current = Url::parse(&current)?.join(&location)?.to_string();
			continue;
		}

		return respond(resp, &current, &proxy_host, None);
	}
}

fn respond(
	resp: hyper::Response<hyper::body::Incoming>,
	target: &str,
	proxy_host: &str,
	rewritten_location: Option<&str>,
) -> HpResult<Response> {
	let status = resp.status();
	let mut response = hyper::Response::builder().status(status);

	let is_sh = is_shell_script(target);
	let is_gzip = resp
		.headers()
		.get(header::CONTENT_ENCODING)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.eq_ignore_ascii_case("gzip"))
		.unwrap_or(false);

	if let Some(headers) = response.headers_mut() {
		*headers = resp.headers().clone();
		sanitize_response_headers(headers);
		if let Some(location) = rewritten_location {
			if let Ok(value) = HeaderValue::from_str(&format!("/{}", location)) {
				headers.insert(header::LOCATION, value);
			}
		}
		if is_sh {
			// The rewriter changes the length and emits plain text; the
			// response re-frames as chunked.
			headers.remove(header::CONTENT_LENGTH);
			headers.remove(header::CONTENT_ENCODING);
		}
	}

	let body = if is_sh {
		rewrite::rewrite_script_body(resp.into_body(), is_gzip, proxy_host)
	} else {
		Body::new(resp.into_body())
	};
	Ok(response.body(body)?)
}


// vim: ts=4
