//! Rate limiting middleware
//!
//! Tower middleware layer applying the per-IP limiter to the whole router.
//! Static pages are exempt from counting.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::response::IntoResponse;
use futures::future::BoxFuture;
use hyper::Request;
use tower::{Layer, Service};

use super::extract::client_ip;
use super::limiter::IpRateLimiter;
use crate::prelude::*;

/// Paths that never consume rate-limit tokens
fn is_exempt(path: &str) -> bool {
	matches!(path, "/" | "/favicon.ico" | "/images.html" | "/search.html")
		|| path.starts_with("/public/")
}

/// Rate limit middleware layer
#[derive(Clone)]
pub struct RateLimitLayer {
	limiter: Arc<IpRateLimiter>,
}

impl RateLimitLayer {
	pub fn new(limiter: Arc<IpRateLimiter>) -> Self {
		Self { limiter }
	}
}

impl<S> Layer<S> for RateLimitLayer {
	type Service = RateLimitService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		RateLimitService { inner, limiter: self.limiter.clone() }
	}
}

/// Rate limit middleware service
#[derive(Clone)]
pub struct RateLimitService<S> {
	inner: S,
	limiter: Arc<IpRateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
	S: Service<Request<Body>, Response = axum::response::Response> + Clone + Send + 'static,
	S::Future: Send + 'static,
{
	type Response = S::Response;
	type Error = S::Error;
	type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, req: Request<Body>) -> Self::Future {
		let limiter = self.limiter.clone();
		let mut inner = self.inner.clone();

		Box::pin(async move {
			if !is_exempt(req.uri().path()) {
				if let Some(ip) = client_ip(&req) {
					debug!(
						"request from {} (path {}, x-forwarded-for {:?})",
						ip,
						req.uri().path(),
						req.headers().get("x-forwarded-for"),
					);
					if let Err(error) = limiter.check(ip) {
						return Ok(error.into_response());
					}
				}
			}

			inner.call(req).await
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exempt_paths() {
		assert!(is_exempt("/"));
		assert!(is_exempt("/favicon.ico"));
		assert!(is_exempt("/images.html"));
		assert!(is_exempt("/search.html"));
		assert!(is_exempt("/public/app.css"));
		assert!(!is_exempt("/health"));
		assert!(!is_exempt("/v2/library/nginx/manifests/latest"));
		assert!(!is_exempt("/token"));
		assert!(!is_exempt("/https://github.com/user/repo/releases/download/v1/x"));
	}
}

// vim: ts=4
