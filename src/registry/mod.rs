//! OCI registry proxy
//!
//! Demultiplexes `/v2/*` onto the configured upstream registries (Docker Hub
//! by default), checks image access, performs the bearer token dance on 401
//! with a one-retry cap, follows blob-store redirects server-side, and
//! streams bodies without buffering.

pub mod auth;
pub mod token_cache;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use url::Url;

use crate::access::check_image;
use crate::config::{AppConfig, AuthType};
use crate::prelude::*;
use crate::upstream::{request_host, sanitize_response_headers};
use self::token_cache::{token_ttl, TokenCache};

const DOCKER_HUB_UPSTREAM: &str = "registry-1.docker.io";
const DOCKER_AUTH_HOST: &str = "auth.docker.io/token";
const MAX_REDIRECTS: usize = 20;

/// Path segments that terminate an image name in a /v2 URL
const RESOURCE_KEYWORDS: &[&str] = &["manifests", "blobs", "tags", "referrers"];

#[derive(Debug, PartialEq, Eq)]
struct RegistryRoute {
	upstream: String,
	path: String,
	/// Image string submitted to the access controller, when the path
	/// addresses one
	image: Option<String>,
	auth_type: AuthType,
}

/// Decide the upstream for a `/v2/...` path. A first segment naming an
/// enabled registry is stripped; everything else goes to Docker Hub, with
/// `library/` injected for single-segment repositories.
fn resolve_route(config: &AppConfig, path: &str) -> RegistryRoute {
	let rest = path.strip_prefix("/v2").unwrap_or(path);
	let segs: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

	if let Some(first) = segs.first() {
		if let Some(mapping) = config.registries.get(*first).filter(|m| m.enabled) {
			let inner = &segs[1..];
			let resource_idx = inner.iter().position(|s| RESOURCE_KEYWORDS.contains(s));
			let image = resource_idx
				.filter(|&idx| idx > 0)
				.map(|idx| format!("{}/{}", first, inner[..idx].join("/")));
			return RegistryRoute {
				upstream: mapping.upstream.clone(),
				path: format!("/v2/{}", inner.join("/")),
				image,
				auth_type: mapping.auth_type,
			};
		}
	}

	let resource_idx = segs.iter().position(|s| RESOURCE_KEYWORDS.contains(s));
	match resource_idx {
		Some(idx) if idx > 0 => {
			let mut name_segs = segs[..idx].to_vec();
			if name_segs.len() == 1 {
				name_segs.insert(0, "library");
			}
			let image = name_segs.join("/");
			RegistryRoute {
				upstream: DOCKER_HUB_UPSTREAM.into(),
				path: format!("/v2/{}/{}", image, segs[idx..].join("/")),
				image: Some(image),
				auth_type: AuthType::Docker,
			}
		}
		_ => RegistryRoute {
			upstream: DOCKER_HUB_UPSTREAM.into(),
			path: if segs.is_empty() { "/v2/".into() } else { format!("/v2/{}", segs.join("/")) },
			image: None,
			auth_type: AuthType::Docker,
		},
	}
}

pub async fn proxy_registry(State(app): State<App>, req: Request) -> Response {
	match handle_registry(app, req).await {
		Ok(resp) => resp,
		Err(err) => err.into_response(),
	}
}

async fn handle_registry(app: App, req: Request) -> HpResult<Response> {
	let config = app.config.current();
	let (parts, body) = req.into_parts();

	let route = resolve_route(&config, parts.uri.path());
	if let Some(image) = &route.image {
		check_image(&config, image).map_err(|err| {
			info!("registry access denied for {}: {}", image, err);
			err
		})?;
	}

	let query = parts.uri.query().map(|q| format!("?{}", q)).unwrap_or_default();
	let url = format!("https://{}{}{}", route.upstream, route.path, query);
	let has_auth = parts.headers.contains_key(header::AUTHORIZATION);
	let proxy_host = request_host(&parts.headers);

	debug!("registry {} {} -> {}", parts.method, parts.uri.path(), url);
	let mut resp = app.client.forward(parts.method.clone(), &url, &parts.headers, body).await?;

	if resp.status() == StatusCode::UNAUTHORIZED && route.auth_type != AuthType::Anonymous {
		if let Some(challenge) = bearer_challenge(&resp) {
			let enabled = config.token_cache.enabled;
			let key =
				TokenCache::key(&route.upstream, &challenge.scope, &challenge.service, has_auth);
			let token = match app.token_cache.get(enabled, &key) {
				Some(token) => Some(token),
				None => {
					let forward_auth = (route.auth_type == AuthType::Basic)
						.then(|| parts.headers.get(header::AUTHORIZATION))
						.flatten();
					match auth::fetch_token(&app.client, &challenge, forward_auth).await {
						Ok((token, expires_in)) => {
							let ttl = token_ttl(expires_in, config.token_cache.default_ttl());
							app.token_cache.put(enabled, key, token.clone(), ttl);
							Some(token)
						}
						Err(err) => {
							warn!("token fetch for {} failed: {}", route.upstream, err);
							None
						}
					}
				}
			};
			// Retry exactly once; a persisting 401 surfaces to the client.
			if let Some(token) = token {
				let mut headers = parts.headers.clone();
				if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
					headers.insert(header::AUTHORIZATION, value);
				}
				resp =
					app.client.forward(parts.method.clone(), &url, &headers, Body::empty()).await?;
			}
		}
	}

	// Blob requests commonly 307 to a storage CDN; follow server-side so the
	// client sees one origin. Credentials never cross to the redirect target.
	let mut current_url = url;
	let mut hops = 0;
	while resp.status().is_redirection() {
		let Some(location) =
			resp.headers().get(header::LOCATION).and_then(|h| h.to_str().ok()).map(str::to_string)
		else {
			break;
		};
		hops += 1;
		if hops > MAX_REDIRECTS {
			return Err(Error::RedirectLoop);
		}
		current_url = Url::parse(&current_url)?.join(&location)?.to_string();
		debug!("registry redirect ({}) -> {}", hops, current_url);
		let mut headers = parts.headers.clone();
		headers.remove(header::AUTHORIZATION);
		resp = app.client.forward(parts.method.clone(), &current_url, &headers, Body::empty()).await?;
	}

	let status = resp.status();
	let rewritten_challenge = if status == StatusCode::UNAUTHORIZED {
		bearer_challenge(&resp).map(|ch| auth::client_challenge(&proxy_host, &ch))
	} else {
		None
	};

	let mut response = hyper::Response::builder().status(status);
	if let Some(headers) = response.headers_mut() {
		*headers = resp.headers().clone();
		sanitize_response_headers(headers);
		// The upstream challenge realm would send the docker client to the
		// upstream directly; present the proxy's own /token instead.
		headers.remove(header::WWW_AUTHENTICATE);
		if let Some(challenge) = rewritten_challenge {
			if let Ok(value) = HeaderValue::from_str(&challenge) {
				headers.insert(header::WWW_AUTHENTICATE, value);
			}
		}
	}
	Ok(response.body(Body::new(resp.into_body()))?)
}

fn bearer_challenge(resp: &hyper::Response<Incoming>) -> Option<auth::BearerChallenge> {
	resp.headers()
		.get(header::WWW_AUTHENTICATE)
		.and_then(|h| h.to_str().ok())
		.and_then(auth::parse_challenge)
}

/// `/token*` front door: a pass-through to the auth host selected by the
/// `service` query parameter, Docker Hub by default. Server-initiated token
/// fetches use the cache; this path deliberately does not.
pub async fn proxy_token(State(app): State<App>, req: Request) -> Response {
	match handle_token(app, req).await {
		Ok(resp) => resp,
		Err(err) => err.into_response(),
	}
}

async fn handle_token(app: App, req: Request) -> HpResult<Response> {
	let config = app.config.current();
	let (parts, body) = req.into_parts();

	let query = parts.uri.query().unwrap_or("");
	let service = url::form_urlencoded::parse(query.as_bytes())
		.find(|(key, _)| key.as_ref() == "service")
		.map(|(_, value)| value.to_string())
		.unwrap_or_default();
	let auth_host = resolve_auth_host(&config, &service);

	let extra = parts.uri.path().strip_prefix("/token").unwrap_or("");
	let mut url = format!("https://{}{}", auth_host, extra);
	if !query.is_empty() {
		url.push('?');
		url.push_str(query);
	}

	debug!("token passthrough (service {:?}) -> {}", service, url);
	let resp = app.client.forward(parts.method.clone(), &url, &parts.headers, body).await?;

	let mut response = hyper::Response::builder().status(resp.status());
	if let Some(headers) = response.headers_mut() {
		*headers = resp.headers().clone();
		sanitize_response_headers(headers);
	}
	Ok(response.body(Body::new(resp.into_body()))?)
}

fn resolve_auth_host(config: &AppConfig, service: &str) -> String {
	if !service.is_empty() {
		for (name, mapping) in &config.registries {
			if mapping.enabled && (name == service || mapping.upstream == service) {
				return mapping.auth_host.clone();
			}
		}
	}
	DOCKER_AUTH_HOST.to_string()
}


// vim: ts=4
