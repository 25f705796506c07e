//! Embedded static pages and liveness endpoints

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::FixedOffset;

use crate::prelude::*;

static INDEX_HTML: &str = include_str!("../public/index.html");
static IMAGES_HTML: &str = include_str!("../public/images.html");
static SEARCH_HTML: &str = include_str!("../public/search.html");
static FAVICON: &[u8] = include_bytes!("../public/favicon.ico");

pub async fn index() -> Html<&'static str> {
	Html(INDEX_HTML)
}

pub async fn images_page() -> Html<&'static str> {
	Html(IMAGES_HTML)
}

pub async fn search_page() -> Html<&'static str> {
	Html(SEARCH_HTML)
}

pub async fn favicon() -> impl IntoResponse {
	([(header::CONTENT_TYPE, "image/x-icon")], FAVICON)
}

/// `/public/*` lookup over the embedded file set
pub async fn public_file(Path(path): Path<String>) -> Response {
	match path.trim_start_matches('/') {
		"index.html" => Html(INDEX_HTML).into_response(),
		"images.html" => Html(IMAGES_HTML).into_response(),
		"search.html" => Html(SEARCH_HTML).into_response(),
		"favicon.ico" => ([(header::CONTENT_TYPE, "image/x-icon")], FAVICON).into_response(),
		_ => StatusCode::NOT_FOUND.into_response(),
	}
}

pub async fn health(State(app): State<App>) -> Json<serde_json::Value> {
	let uptime = app.started_at.elapsed();
	Json(serde_json::json!({
		"status": "healthy",
		"timestamp_unix": app.started_at_utc.timestamp(),
		"uptime_sec": uptime.as_secs_f64(),
		"service": "hubproxy",
		"start_time_bj": format_beijing_time(&app.started_at_utc),
		"uptime_human": format_duration(uptime.as_secs()),
	}))
}

pub async fn ready(State(app): State<App>) -> Json<serde_json::Value> {
	let uptime = app.started_at.elapsed();
	Json(serde_json::json!({
		"ready": true,
		"timestamp_unix": chrono::Utc::now().timestamp(),
		"uptime_sec": uptime.as_secs_f64(),
		"uptime_human": format_duration(uptime.as_secs()),
	}))
}

/// Start time rendered in UTC+8
fn format_beijing_time(time: &chrono::DateTime<chrono::Utc>) -> String {
	match FixedOffset::east_opt(8 * 3600) {
		Some(offset) => time.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string(),
		None => time.format("%Y-%m-%d %H:%M:%S").to_string(),
	}
}

/// Human-readable uptime
fn format_duration(secs: u64) -> String {
	if secs < 60 {
		format!("{}秒", secs)
	} else if secs < 3600 {
		format!("{}分钟{}秒", secs / 60, secs % 60)
	} else if secs < 86_400 {
		format!("{}小时{}分钟", secs / 3600, (secs % 3600) / 60)
	} else {
		format!("{}天{}小时", secs / 86_400, (secs % 86_400) / 3600)
	}
}


// vim: ts=4
