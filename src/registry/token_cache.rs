//! Bearer token cache
//!
//! TTL-keyed map of `(upstream, scope, service, auth-present)` to bearer
//! tokens obtained for registry subrequests. A disabled cache behaves as a
//! constant miss.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// A token is only served while at least this much lifetime remains
const SERVE_MARGIN: Duration = Duration::from_secs(30);

struct CacheEntry {
	token: String,
	expires_at: Instant,
}

#[derive(Default)]
pub struct TokenCache {
	entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TokenCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn key(upstream: &str, scope: &str, service: &str, has_auth: bool) -> String {
		format!("{}|{}|{}|{}", upstream, scope, service, has_auth)
	}

	/// Get a cached token with at least 30 s of validity left.
	pub fn get(&self, enabled: bool, key: &str) -> Option<String> {
		if !enabled {
			return None;
		}
		let entries = self.entries.read();
		let entry = entries.get(key)?;
		if entry.expires_at.saturating_duration_since(Instant::now()) >= SERVE_MARGIN {
			Some(entry.token.clone())
		} else {
			None
		}
	}

	pub fn put(&self, enabled: bool, key: String, token: String, ttl: Duration) {
		if !enabled {
			return;
		}
		let now = Instant::now();
		let mut entries = self.entries.write();
		entries.retain(|_, entry| entry.expires_at > now);
		entries.insert(key, CacheEntry { token, expires_at: now + ttl });
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

/// Cache TTL for a fetched token: upstream `expires_in` less a 30 s safety
/// margin when provided, the configured default otherwise, never below 30 s.
pub fn token_ttl(expires_in: Option<u64>, default_ttl: Duration) -> Duration {
	match expires_in {
		Some(secs) => Duration::from_secs(secs.saturating_sub(30).max(30)),
		None => default_ttl.max(Duration::from_secs(30)),
	}
}


// vim: ts=4
