#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

pub mod access;
pub mod assets;
pub mod config;
pub mod error;
pub mod limit;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod search;
pub mod upstream;

use crate::prelude::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub config: Arc<config::ConfigStore>,
	pub limiter: Arc<limit::IpRateLimiter>,
	pub token_cache: registry::token_cache::TokenCache,
	pub client: upstream::UpstreamClient,
	pub started_at: Instant,
	pub started_at_utc: chrono::DateTime<chrono::Utc>,
}

pub type App = Arc<AppState>;

impl AppState {
	/// Assemble the shared application state from a config store.
	pub fn new(config: Arc<config::ConfigStore>) -> HpResult<App> {
		let limiter = Arc::new(limit::IpRateLimiter::new(&config.current()));

		// Components deriving state from the snapshot rebuild on reload.
		let reload_limiter = Arc::clone(&limiter);
		config.on_reload(move |snapshot| reload_limiter.rebuild(snapshot));

		Ok(Arc::new(AppState {
			config,
			limiter,
			token_cache: registry::token_cache::TokenCache::new(),
			client: upstream::UpstreamClient::new()?,
			started_at: Instant::now(),
			started_at_utc: chrono::Utc::now(),
		}))
	}
}

/// Load configuration, start background tasks and serve until signalled.
pub async fn run() -> HpResult<()> {
	let config = Arc::new(config::ConfigStore::load("config.toml")?);
	let app = AppState::new(Arc::clone(&config))?;

	if let Err(err) = config::ConfigStore::watch(&config) {
		warn!("hot reload unavailable: {}", err);
	}

	let evict_limiter = Arc::clone(&app.limiter);
	tokio::spawn(async move {
		let mut tick = tokio::time::interval(limit::CLEANUP_INTERVAL);
		tick.tick().await;
		loop {
			tick.tick().await;
			evict_limiter.evict();
		}
	});

	let snapshot = config.current();
	let addr = format!("{}:{}", snapshot.server.host, snapshot.server.port);
	let listener = tokio::net::TcpListener::bind(&addr).await?;

	info!("hubproxy v{} listening on {}", VERSION, addr);
	info!(
		"rate limit: {} requests / {} h",
		snapshot.rate_limit.request_limit, snapshot.rate_limit.period_hours
	);

	let router = routes::init(app);
	axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
		})
		.await?;

	Ok(())
}

// vim: ts=4
