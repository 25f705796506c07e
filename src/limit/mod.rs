//! Per-IP rate limiting subsystem

pub mod extract;
pub mod limiter;
pub mod middleware;

pub use extract::{client_ip, IpKey};
pub use limiter::{IpRateLimiter, LimitError, CLEANUP_INTERVAL};
pub use middleware::RateLimitLayer;

// vim: ts=4
