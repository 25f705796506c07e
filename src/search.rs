//! Docker Hub search passthrough

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use url::Url;

use crate::prelude::*;
use crate::upstream::sanitize_response_headers;

const SEARCH_ENDPOINT: &str = "https://hub.docker.com/v2/search/repositories/";

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
	#[serde(default)]
	q: String,
}

pub async fn search(State(app): State<App>, Query(query): Query<SearchQuery>) -> Response {
	if query.q.trim().is_empty() {
		return (
			StatusCode::BAD_REQUEST,
			axum::Json(serde_json::json!({ "error": "missing query parameter q" })),
		)
			.into_response();
	}
	match run_search(app, &query.q).await {
		Ok(resp) => resp,
		Err(err) => err.into_response(),
	}
}

async fn run_search(app: App, term: &str) -> HpResult<Response> {
	let mut url = Url::parse(SEARCH_ENDPOINT)?;
	url.query_pairs_mut().append_pair("query", term).append_pair("page_size", "25");

	let resp = app.client.forward(Method::GET, url.as_str(), &HeaderMap::new(), Body::empty()).await?;

	let mut response = hyper::Response::builder().status(resp.status());
	if let Some(headers) = response.headers_mut() {
		*headers = resp.headers().clone();
		sanitize_response_headers(headers);
	}
	Ok(response.body(Body::new(resp.into_body()))?)
}

// vim: ts=4
