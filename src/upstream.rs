//! Shared outbound HTTP client and header plumbing
//!
//! One pooled hyper client serves every handler. Redirects are handled by
//! the proxies themselves (the client never follows them), and only the
//! header read is bounded by a timeout so arbitrarily large bodies can
//! stream.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::prelude::*;

/// Headers that must not be forwarded between client and upstream
const HOP_BY_HOP_HEADERS: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailers",
	"transfer-encoding",
];

/// Upstream security headers stripped from proxied responses
const SECURITY_HEADERS: &[&str] = &[
	"content-security-policy",
	"referrer-policy",
	"strict-transport-security",
];

/// Check if a header is a hop-by-hop header that should be stripped
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
	HOP_BY_HOP_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

/// Copy headers from an inbound request into an outbound one, dropping
/// hop-by-hop headers and `Host` (the client sets it from the target URI).
pub fn copy_request_headers(src: &HeaderMap, dst: &mut HeaderMap) {
	for (name, value) in src.iter() {
		if is_hop_by_hop(name) || name == header::HOST {
			continue;
		}
		dst.append(name.clone(), value.clone());
	}
}

/// Strip hop-by-hop and security headers from an upstream response
pub fn sanitize_response_headers(headers: &mut HeaderMap) {
	let to_remove: Vec<HeaderName> = headers
		.keys()
		.filter(|name| {
			is_hop_by_hop(name)
				|| SECURITY_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
		})
		.cloned()
		.collect();
	for name in to_remove {
		headers.remove(&name);
	}
}

/// The externally visible host of this proxy, for URL rewriting:
/// `X-Forwarded-Host` when present, otherwise `Host`, `https://`-prefixed
/// when bare.
pub fn request_host(headers: &HeaderMap) -> String {
	let host = headers
		.get("x-forwarded-host")
		.or_else(|| headers.get(header::HOST))
		.and_then(|h| h.to_str().ok())
		.unwrap_or("localhost");
	if host.starts_with("http://") || host.starts_with("https://") {
		host.to_string()
	} else {
		format!("https://{}", host)
	}
}

type PooledClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// Shared outbound client: pooled keep-alive connections, HTTP/2 where
/// negotiated, no automatic redirects.
pub struct UpstreamClient {
	client: PooledClient,
	header_timeout: Duration,
}

impl UpstreamClient {
	pub fn new() -> HpResult<Self> {
		let connector = hyper_rustls::HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::Config("no native root CA certificates found".into()))?
			.https_or_http()
			.enable_all_versions()
			.build();
		let client = Client::builder(TokioExecutor::new())
			.pool_idle_timeout(Duration::from_secs(90))
			.build(connector);
		Ok(Self { client, header_timeout: Duration::from_secs(30) })
	}

	/// Send a request. The timeout covers connection and response headers
	/// only; the body streams for as long as it takes.
	pub async fn request(&self, req: hyper::Request<Body>) -> HpResult<hyper::Response<Incoming>> {
		match tokio::time::timeout(self.header_timeout, self.client.request(req)).await {
			Ok(Ok(resp)) => Ok(resp),
			Ok(Err(err)) => {
				warn!("upstream request failed: {}", err);
				Err(Error::Upstream(err.to_string()))
			}
			Err(_) => {
				warn!("upstream response headers timed out");
				Err(Error::Upstream("upstream timeout".into()))
			}
		}
	}

	/// Build and send a request forwarding the given inbound headers.
	pub async fn forward(
		&self,
		method: Method,
		url: &str,
		headers: &HeaderMap,
		body: Body,
	) -> HpResult<hyper::Response<Incoming>> {
		let uri: Uri = url.parse()?;
		let mut req = hyper::Request::builder().method(method).uri(uri);
		if let Some(dst) = req.headers_mut() {
			copy_request_headers(headers, dst);
		}
		self.request(req.body(body)?).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;

	#[test]
	fn test_is_hop_by_hop() {
		assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
		assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
		assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
		assert!(!is_hop_by_hop(&HeaderName::from_static("authorization")));
	}

	#[test]
	fn test_copy_request_headers_drops_host() {
		let mut src = HeaderMap::new();
		src.insert(header::HOST, HeaderValue::from_static("proxy.example.com"));
		src.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
		src.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
		let mut dst = HeaderMap::new();
		copy_request_headers(&src, &mut dst);
		assert!(dst.get(header::HOST).is_none());
		assert!(dst.get(header::CONNECTION).is_none());
		assert_eq!(dst.get(header::ACCEPT).unwrap(), "*/*");
	}

	#[test]
	fn test_sanitize_response_headers() {
		let mut headers = HeaderMap::new();
		headers.insert("content-security-policy", HeaderValue::from_static("default-src"));
		headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
		headers.insert("strict-transport-security", HeaderValue::from_static("max-age=1"));
		headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
		headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
		headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
		sanitize_response_headers(&mut headers);
		assert!(headers.get("content-security-policy").is_none());
		assert!(headers.get("referrer-policy").is_none());
		assert!(headers.get("strict-transport-security").is_none());
		assert!(headers.get("transfer-encoding").is_none());
		assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/plain");
		assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "42");
	}

	#[test]
	fn test_request_host() {
		let mut headers = HeaderMap::new();
		headers.insert(header::HOST, HeaderValue::from_static("proxy.example.com"));
		assert_eq!(request_host(&headers), "https://proxy.example.com");

		headers.insert("x-forwarded-host", HeaderValue::from_static("public.example.com"));
		assert_eq!(request_host(&headers), "https://public.example.com");

		let empty = HeaderMap::new();
		assert_eq!(request_host(&empty), "https://localhost");
	}
}

// vim: ts=4
