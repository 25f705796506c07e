//! End-to-end router behaviour: static pages, liveness, admission and rate
//! limiting, all driven through the assembled router without sockets.
//! Paths that would reach an upstream are rejected before any dial.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use hubproxy::config::{AppConfig, ConfigStore};
use hubproxy::{routes, AppState};

fn router_with(config: AppConfig) -> Router {
	let _ = rustls::crypto::CryptoProvider::install_default(
		rustls::crypto::aws_lc_rs::default_provider(),
	);
	let store = Arc::new(ConfigStore::from_config(config));
	let app = AppState::new(store).expect("app state");
	routes::init(app)
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_from(uri: &str, ip: &str) -> Request<Body> {
	Request::builder().uri(uri).header("x-forwarded-for", ip).body(Body::empty()).unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
	let bytes = resp.into_body().collect().await.unwrap().to_bytes();
	String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_index_page() {
	let router = router_with(AppConfig::default());
	let resp = router.oneshot(get("/")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body = body_string(resp).await;
	assert!(body.contains("HubProxy"));
}

#[tokio::test]
async fn test_static_pages_and_favicon() {
	let router = router_with(AppConfig::default());
	for path in ["/images.html", "/search.html"] {
		let resp = router.clone().oneshot(get(path)).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK, "{}", path);
	}
	let resp = router.clone().oneshot(get("/favicon.ico")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	assert_eq!(resp.headers()["content-type"], "image/x-icon");

	let resp = router.oneshot(get("/public/missing.css")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_ready() {
	let router = router_with(AppConfig::default());
	let resp = router.clone().oneshot(get("/health")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
	assert_eq!(body["status"], "healthy");
	assert_eq!(body["service"], "hubproxy");
	assert!(body["uptime_sec"].is_number());

	let resp = router.oneshot(get("/ready")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
	assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_unproxyable_target_is_rejected() {
	let router = router_with(AppConfig::default());
	let resp = router.oneshot(get("/ftp://example.com/file")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	assert_eq!(body_string(resp).await, "无效输入");
}

#[tokio::test]
async fn test_plain_host_target_is_rejected() {
	let router = router_with(AppConfig::default());
	let resp = router.oneshot(get("/https://example.com/file.tar.gz")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_blacklisted_github_repo_is_rejected() {
	let mut config = AppConfig::default();
	config.proxy.black_list = vec!["user/repo".into()];
	let router = router_with(config);
	let resp = router
		.oneshot(get("/https://github.com/user/repo/releases/download/v1/x.tar.gz"))
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	assert!(body_string(resp).await.contains("在黑名单内"));
}

#[tokio::test]
async fn test_github_whitelist_monotonicity() {
	let mut config = AppConfig::default();
	config.proxy.white_list = vec!["allowed/*".into()];
	let router = router_with(config);
	let resp = router
		.oneshot(get("/https://github.com/other/repo/releases/download/v1/x.tar.gz"))
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	assert!(body_string(resp).await.contains("白名单"));
}

#[tokio::test]
async fn test_blacklisted_image_is_rejected() {
	let mut config = AppConfig::default();
	config.proxy.black_list = vec!["library/nginx".into()];
	let router = router_with(config);
	let resp =
		router.oneshot(get("/v2/library/nginx/manifests/latest")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	assert!(body_string(resp).await.contains("在黑名单内"));
}

#[tokio::test]
async fn test_bare_image_name_is_blacklisted_as_library() {
	let mut config = AppConfig::default();
	config.proxy.black_list = vec!["library/nginx".into()];
	let router = router_with(config);
	let resp = router.oneshot(get("/v2/nginx/manifests/latest")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limit_kicks_in() {
	let mut config = AppConfig::default();
	config.rate_limit.request_limit = 2;
	let router = router_with(config);

	for _ in 0..2 {
		let resp = router.clone().oneshot(get_from("/health", "9.9.9.9")).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
	}
	let resp = router.oneshot(get_from("/health", "9.9.9.9")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
	let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
	assert_eq!(body["error"], "请求频率过快，暂时限制访问");
}

#[tokio::test]
async fn test_rate_limit_is_per_client() {
	let mut config = AppConfig::default();
	config.rate_limit.request_limit = 1;
	let router = router_with(config);

	let resp = router.clone().oneshot(get_from("/health", "9.9.9.1")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let resp = router.clone().oneshot(get_from("/health", "9.9.9.1")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
	let resp = router.oneshot(get_from("/health", "9.9.9.2")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ipv6_clients_share_subnet_bucket() {
	let mut config = AppConfig::default();
	config.rate_limit.request_limit = 1;
	let router = router_with(config);

	let resp = router.clone().oneshot(get_from("/health", "2001:db8::1")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	let resp = router.clone().oneshot(get_from("/health", "2001:db8::ffff")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
	let resp = router.oneshot(get_from("/health", "2001:db9::1")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_denied_ip_gets_403() {
	let mut config = AppConfig::default();
	config.security.black_list = vec!["10.0.0.0/8".into()];
	let router = router_with(config);

	let resp = router.oneshot(get_from("/health", "10.1.2.3")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::FORBIDDEN);
	let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
	assert_eq!(body["error"], "您已被限制访问");
}

#[tokio::test]
async fn test_static_pages_are_exempt_from_rate_limit() {
	let mut config = AppConfig::default();
	config.rate_limit.request_limit = 1;
	let router = router_with(config);

	for _ in 0..5 {
		let resp = router.clone().oneshot(get_from("/", "9.9.9.9")).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
	}
}

#[tokio::test]
async fn test_search_requires_query() {
	let router = router_with(AppConfig::default());
	let resp = router.oneshot(get("/search")).await.unwrap();
	assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
