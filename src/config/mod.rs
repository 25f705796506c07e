//! Configuration store
//!
//! Layered configuration (built-in defaults ← `config.toml` ← environment
//! variables) published as immutable snapshots through an atomic pointer
//! swap. A file watcher reparses on change; a failed reparse keeps the
//! running snapshot active.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::prelude::*;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	/// Response size limit in bytes for the generic URL proxy
	pub file_size: u64,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".into(),
			port: 5000,
			file_size: 2 * 1024 * 1024 * 1024,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
	/// Requests admitted per period (also the burst capacity)
	pub request_limit: u32,
	pub period_hours: f64,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self { request_limit: 20, period_hours: 1.0 }
	}
}

/// IP/CIDR lists consulted by the rate limiter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
	pub white_list: Vec<String>,
	pub black_list: Vec<String>,
}

/// Repository-level lists consulted by the access controller
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyListConfig {
	pub white_list: Vec<String>,
	pub black_list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadConfig {
	/// Image count cap consumed by the offline tar builder
	pub max_images: u32,
}

impl Default for DownloadConfig {
	fn default() -> Self {
		Self { max_images: 10 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
	Docker,
	Github,
	Google,
	Quay,
	Basic,
	Anonymous,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMapping {
	pub upstream: String,
	pub auth_host: String,
	pub auth_type: AuthType,
	#[serde(default = "default_true")]
	pub enabled: bool,
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenCacheConfig {
	pub enabled: bool,
	/// Human duration string, e.g. "20m"
	#[serde(rename = "defaultTTL")]
	pub default_ttl: String,
}

impl Default for TokenCacheConfig {
	fn default() -> Self {
		Self { enabled: true, default_ttl: "20m".into() }
	}
}

impl TokenCacheConfig {
	pub fn default_ttl(&self) -> Duration {
		parse_duration(&self.default_ttl).unwrap_or(Duration::from_secs(20 * 60))
	}
}

/// One immutable configuration snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
	pub server: ServerConfig,
	pub rate_limit: RateLimitConfig,
	pub security: SecurityConfig,
	pub proxy: ProxyListConfig,
	pub download: DownloadConfig,
	pub registries: HashMap<String, RegistryMapping>,
	pub token_cache: TokenCacheConfig,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			server: ServerConfig::default(),
			rate_limit: RateLimitConfig::default(),
			security: SecurityConfig::default(),
			proxy: ProxyListConfig::default(),
			download: DownloadConfig::default(),
			registries: default_registries(),
			token_cache: TokenCacheConfig::default(),
		}
	}
}

fn default_registries() -> HashMap<String, RegistryMapping> {
	let mut registries = HashMap::new();
	registries.insert(
		"ghcr.io".into(),
		RegistryMapping {
			upstream: "ghcr.io".into(),
			auth_host: "ghcr.io/token".into(),
			auth_type: AuthType::Github,
			enabled: true,
		},
	);
	registries.insert(
		"gcr.io".into(),
		RegistryMapping {
			upstream: "gcr.io".into(),
			auth_host: "gcr.io/v2/token".into(),
			auth_type: AuthType::Google,
			enabled: true,
		},
	);
	registries.insert(
		"quay.io".into(),
		RegistryMapping {
			upstream: "quay.io".into(),
			auth_host: "quay.io/v2/auth".into(),
			auth_type: AuthType::Quay,
			enabled: true,
		},
	);
	registries.insert(
		"registry.k8s.io".into(),
		RegistryMapping {
			upstream: "registry.k8s.io".into(),
			auth_host: "registry.k8s.io".into(),
			auth_type: AuthType::Anonymous,
			enabled: true,
		},
	);
	registries
}

/// Parse duration strings of the form "30s", "20m", "2h", "1d" or bare seconds
pub fn parse_duration(s: &str) -> Option<Duration> {
	let s = s.trim();
	if s.is_empty() {
		return None;
	}
	let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
		Some(idx) => s.split_at(idx),
		None => (s, "s"),
	};
	let value: u64 = num.parse().ok()?;
	let secs = match unit.trim() {
		"s" => value,
		"m" => value * 60,
		"h" => value * 3600,
		"d" => value * 86_400,
		_ => return None,
	};
	Some(Duration::from_secs(secs))
}

type ReloadHook = Box<dyn Fn(&AppConfig) + Send + Sync>;

/// Publishes immutable [`AppConfig`] snapshots and drives hot reload
pub struct ConfigStore {
	current: ArcSwap<AppConfig>,
	path: PathBuf,
	hooks: RwLock<Vec<ReloadHook>>,
	watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ConfigStore {
	/// Initial load. A missing file falls back to defaults; a file that
	/// exists but fails to parse is fatal.
	pub fn load(path: impl Into<PathBuf>) -> HpResult<Self> {
		let path = path.into();
		let config = read_config(&path)?;
		Ok(Self {
			current: ArcSwap::from_pointee(config),
			path,
			hooks: RwLock::new(Vec::new()),
			watcher: Mutex::new(None),
		})
	}

	/// Build a store around a fixed configuration (tests, embedding)
	pub fn from_config(config: AppConfig) -> Self {
		Self {
			current: ArcSwap::from_pointee(config),
			path: PathBuf::new(),
			hooks: RwLock::new(Vec::new()),
			watcher: Mutex::new(None),
		}
	}

	/// Current snapshot. Lock-free; the returned `Arc` stays valid for the
	/// reader even when a reload publishes a newer snapshot.
	pub fn current(&self) -> Arc<AppConfig> {
		self.current.load_full()
	}

	/// Register a hook run after every successful reload, for components
	/// that derive state from the snapshot.
	pub fn on_reload(&self, hook: impl Fn(&AppConfig) + Send + Sync + 'static) {
		self.hooks.write().push(Box::new(hook));
	}

	/// Start watching the config file. Missing file or unsupported platform
	/// disables hot reload without failing startup.
	pub fn watch(store: &Arc<Self>) -> HpResult<()> {
		let this = store.as_ref();
		if !this.path.exists() {
			info!("{} not found, hot reload disabled", this.path.display());
			return Ok(());
		}
		let store = Arc::clone(store);
		let mut watcher =
			notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
				Ok(event)
					if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) =>
				{
					store.reload();
				}
				Ok(_) => {}
				Err(err) => warn!("config watch error: {}", err),
			})?;
		watcher.watch(&this.path, RecursiveMode::NonRecursive)?;
		*this.watcher.lock() = Some(watcher);
		info!("watching {} for changes", this.path.display());
		Ok(())
	}

	/// Reparse and publish. Failures keep the active snapshot.
	pub fn reload(&self) {
		let started = Instant::now();
		match read_config(&self.path) {
			Ok(config) => {
				let config = Arc::new(config);
				self.current.store(Arc::clone(&config));
				for hook in self.hooks.read().iter() {
					hook(&config);
				}
				info!("configuration reloaded in {:?}", started.elapsed());
			}
			Err(err) => {
				warn!("config reload failed, keeping active configuration: {}", err);
			}
		}
	}
}

fn read_config(path: &Path) -> HpResult<AppConfig> {
	let mut config = match std::fs::read_to_string(path) {
		Ok(data) => toml::from_str::<AppConfig>(&data)?,
		Err(_) => {
			info!("{} not found, using default configuration", path.display());
			AppConfig::default()
		}
	};
	// A registries table in the file extends the built-in table rather than
	// replacing it.
	for (name, mapping) in default_registries() {
		config.registries.entry(name).or_insert(mapping);
	}
	override_from_env(&mut config);
	validate(&config)?;
	Ok(config)
}

fn validate(config: &AppConfig) -> HpResult<()> {
	if config.rate_limit.period_hours <= 0.0 {
		return Err(Error::Config("rateLimit.periodHours must be positive".into()));
	}
	if parse_duration(&config.token_cache.default_ttl).is_none() {
		return Err(Error::Config(format!(
			"tokenCache.defaultTTL is not a valid duration: {}",
			config.token_cache.default_ttl
		)));
	}
	Ok(())
}

fn override_from_env(config: &mut AppConfig) {
	if let Ok(val) = std::env::var("SERVER_HOST") {
		if !val.is_empty() {
			config.server.host = val;
		}
	}
	if let Ok(val) = std::env::var("SERVER_PORT") {
		if let Ok(port) = val.parse::<u16>() {
			if port > 0 {
				config.server.port = port;
			}
		}
	}
	if let Ok(val) = std::env::var("MAX_FILE_SIZE") {
		if let Ok(size) = val.parse::<u64>() {
			if size > 0 {
				config.server.file_size = size;
			}
		}
	}
	if let Ok(val) = std::env::var("RATE_LIMIT") {
		if let Ok(limit) = val.parse::<u32>() {
			if limit > 0 {
				config.rate_limit.request_limit = limit;
			}
		}
	}
	if let Ok(val) = std::env::var("RATE_PERIOD_HOURS") {
		if let Ok(period) = val.parse::<f64>() {
			if period > 0.0 {
				config.rate_limit.period_hours = period;
			}
		}
	}
	if let Ok(val) = std::env::var("IP_WHITELIST") {
		config
			.security
			.white_list
			.extend(val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
	}
	if let Ok(val) = std::env::var("IP_BLACKLIST") {
		config
			.security
			.black_list
			.extend(val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
	}
	if let Ok(val) = std::env::var("MAX_IMAGES") {
		if let Ok(max_images) = val.parse::<u32>() {
			if max_images > 0 {
				config.download.max_images = max_images;
			}
		}
	}
}


// vim: ts=4
