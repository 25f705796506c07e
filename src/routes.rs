use std::any::Any;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::limit::RateLimitLayer;
use crate::prelude::*;
use crate::{assets, proxy, registry, search};

pub fn init(app: App) -> Router {
	Router::new()
		.route("/", get(assets::index))
		.route("/images.html", get(assets::images_page))
		.route("/search.html", get(assets::search_page))
		.route("/favicon.ico", get(assets::favicon))
		.route("/public/{*path}", get(assets::public_file))
		.route("/health", get(assets::health))
		.route("/ready", get(assets::ready))
		.route("/search", get(search::search))
		.route("/token", any(registry::proxy_token))
		.route("/token/{*path}", any(registry::proxy_token))
		.route("/v2", any(registry::proxy_registry))
		.route("/v2/", any(registry::proxy_registry))
		.route("/v2/{*path}", any(registry::proxy_registry))
		.fallback(proxy::handler)
		.layer(RateLimitLayer::new(app.limiter.clone()))
		.layer(CatchPanicLayer::custom(handle_panic))
		.with_state(app)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Body> {
	let detail = if let Some(s) = err.downcast_ref::<String>() {
		s.clone()
	} else if let Some(s) = err.downcast_ref::<&str>() {
		s.to_string()
	} else {
		"unknown panic".to_string()
	};
	error!("panic recovered: {}", detail);
	(
		StatusCode::INTERNAL_SERVER_ERROR,
		Json(serde_json::json!({ "error": "Internal server error", "code": "INTERNAL_ERROR" })),
	)
		.into_response()
}

// vim: ts=4
