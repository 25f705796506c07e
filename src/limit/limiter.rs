//! Per-IP rate limiter
//!
//! Token buckets (governor GCRA) keyed by the normalised client IP, with
//! CIDR allow/deny lists and periodic eviction of idle entries. The table
//! lock covers only the key→entry map; every bucket is an independent
//! direct limiter and internally lock-free.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use ipnet::IpNet;
use parking_lot::{Mutex, RwLock};

use super::extract::IpKey;
use crate::config::AppConfig;
use crate::prelude::*;

/// Eviction sweep interval
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);
/// Entries idle longer than this are evicted
const IDLE_TTL: Duration = Duration::from_secs(3600);
/// Hard cap on tracked addresses; exceeding it truncates the table
const MAX_TRACKED: usize = 10_000;

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limit rejection
#[derive(Debug, PartialEq, Eq)]
pub enum LimitError {
	/// Address is on the deny list
	IpDenied,
	/// Token bucket is empty
	Limited,
}

impl std::fmt::Display for LimitError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LimitError::IpDenied => write!(f, "address is deny-listed"),
			LimitError::Limited => write!(f, "too many requests"),
		}
	}
}

impl std::error::Error for LimitError {}

impl IntoResponse for LimitError {
	fn into_response(self) -> Response {
		match self {
			LimitError::IpDenied => (
				StatusCode::FORBIDDEN,
				Json(serde_json::json!({ "error": "您已被限制访问" })),
			)
				.into_response(),
			LimitError::Limited => (
				StatusCode::TOO_MANY_REQUESTS,
				Json(serde_json::json!({ "error": "请求频率过快，暂时限制访问" })),
			)
				.into_response(),
		}
	}
}

/// Parameters derived from one config snapshot
struct Shape {
	quota: Quota,
	allow: Vec<IpNet>,
	deny: Vec<IpNet>,
}

struct Entry {
	/// `None` marks an allow-listed address: recorded, never limited
	bucket: Option<Bucket>,
	last_access: Mutex<Instant>,
}

pub struct IpRateLimiter {
	shape: ArcSwap<Shape>,
	table: RwLock<HashMap<IpKey, Arc<Entry>>>,
}

impl IpRateLimiter {
	pub fn new(config: &AppConfig) -> Self {
		Self {
			shape: ArcSwap::from_pointee(Shape::from_config(config)),
			table: RwLock::new(HashMap::new()),
		}
	}

	/// Re-derive quota and CIDR lists after a config reload. Existing
	/// buckets carry the old quota, so the table is reset.
	pub fn rebuild(&self, config: &AppConfig) {
		self.shape.store(Arc::new(Shape::from_config(config)));
		self.table.write().clear();
	}

	/// Admit or reject one request from the given address.
	pub fn check(&self, ip: IpAddr) -> Result<(), LimitError> {
		let shape = self.shape.load();

		if shape.deny.iter().any(|net| net.contains(&ip)) {
			return Err(LimitError::IpDenied);
		}
		let exempt = shape.allow.iter().any(|net| net.contains(&ip));

		let key = IpKey::from_ip(&ip);
		let now = Instant::now();

		// Fast path under the shared lock
		let existing = self.table.read().get(&key).cloned();
		let entry = match existing {
			Some(entry) => entry,
			None => {
				let mut table = self.table.write();
				Arc::clone(table.entry(key).or_insert_with(|| {
					Arc::new(Entry {
						bucket: (!exempt).then(|| RateLimiter::direct(shape.quota)),
						last_access: Mutex::new(now),
					})
				}))
			}
		};

		*entry.last_access.lock() = now;
		match &entry.bucket {
			Some(bucket) => bucket.check().map_err(|_| LimitError::Limited),
			None => Ok(()),
		}
	}

	/// One eviction sweep: drop entries idle beyond [`IDLE_TTL`]; if the
	/// table still holds more than [`MAX_TRACKED`] entries, truncate it.
	pub fn evict(&self) {
		let now = Instant::now();
		let expired: Vec<IpKey> = self
			.table
			.read()
			.iter()
			.filter(|(_, entry)| now.duration_since(*entry.last_access.lock()) > IDLE_TTL)
			.map(|(key, _)| key.clone())
			.collect();

		let oversized = self.table.read().len() > MAX_TRACKED;
		if expired.is_empty() && !oversized {
			return;
		}

		let mut table = self.table.write();
		for key in &expired {
			table.remove(key);
		}
		if table.len() > MAX_TRACKED {
			debug!("rate limiter table over {} entries, truncating", MAX_TRACKED);
			table.clear();
		}
	}

	/// Number of tracked addresses
	pub fn tracked(&self) -> usize {
		self.table.read().len()
	}
}

impl Shape {
	fn from_config(config: &AppConfig) -> Self {
		Self {
			quota: build_quota(&config.rate_limit),
			allow: parse_cidr_list(&config.security.white_list, "white"),
			deny: parse_cidr_list(&config.security.black_list, "black"),
		}
	}
}

/// Convert "requestLimit per periodHours" into a governor quota: one token
/// every `periodHours * 3600 / requestLimit` seconds, burst = requestLimit.
fn build_quota(config: &crate::config::RateLimitConfig) -> Quota {
	let limit = config.request_limit.max(1);
	let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
	let period = Duration::from_secs_f64(config.period_hours * 3600.0 / limit as f64);
	Quota::with_period(period)
		.unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
		.allow_burst(burst)
}

/// Parse IP/CIDR strings; bare addresses become /32 or /128 networks.
/// Invalid entries are logged and skipped.
fn parse_cidr_list(list: &[String], kind: &str) -> Vec<IpNet> {
	let mut nets = Vec::with_capacity(list.len());
	for item in list {
		let item = item.trim();
		if item.is_empty() {
			continue;
		}
		let parsed = if item.contains('/') {
			item.parse::<IpNet>().ok()
		} else {
			item.parse::<IpAddr>().ok().map(IpNet::from)
		};
		match parsed {
			Some(net) => nets.push(net),
			None => warn!("invalid {} list entry ignored: {}", kind, item),
		}
	}
	nets
}


// vim: ts=4
