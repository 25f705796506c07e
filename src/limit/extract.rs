//! Client address extraction
//!
//! Resolves the client IP from forwarding headers with a fallback to the
//! transport peer address, and normalises it into the rate-limit key
//! (IPv4 exact, IPv6 truncated to /64).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use axum::extract::ConnectInfo;
use hyper::Request;

/// Normalised rate-limit key for a client address
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum IpKey {
	/// IPv4 individual address
	V4(Ipv4Addr),
	/// IPv6 /64 subnet (top 64 bits)
	V6Subnet([u8; 8]),
}

impl IpKey {
	pub fn from_ip(addr: &IpAddr) -> Self {
		match addr {
			IpAddr::V4(ip) => IpKey::V4(*ip),
			IpAddr::V6(ip) => {
				let octets = ip.octets();
				let mut subnet = [0u8; 8];
				subnet.copy_from_slice(&octets[..8]);
				IpKey::V6Subnet(subnet)
			}
		}
	}
}

impl std::fmt::Display for IpKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			IpKey::V4(ip) => write!(f, "{}", ip),
			IpKey::V6Subnet(subnet) => {
				let mut octets = [0u8; 16];
				octets[..8].copy_from_slice(subnet);
				write!(f, "{}/64", Ipv6Addr::from(octets))
			}
		}
	}
}

/// Resolve the client IP: `X-Forwarded-For` first value, then `X-Real-IP`,
/// then `X-Original-Forwarded-For` first value, then the peer address.
pub fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
	first_forwarded(req, "x-forwarded-for")
		.or_else(|| single_header(req, "x-real-ip"))
		.or_else(|| first_forwarded(req, "x-original-forwarded-for"))
		.or_else(|| req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip()))
}

fn first_forwarded<B>(req: &Request<B>, name: &str) -> Option<IpAddr> {
	req.headers()
		.get(name)
		.and_then(|h| h.to_str().ok())
		.and_then(|s| s.split(',').next())
		.and_then(parse_addr)
}

fn single_header<B>(req: &Request<B>, name: &str) -> Option<IpAddr> {
	req.headers().get(name).and_then(|h| h.to_str().ok()).and_then(parse_addr)
}

fn parse_addr(s: &str) -> Option<IpAddr> {
	strip_port(s.trim()).parse().ok()
}

/// Strip a trailing `:port` and IPv6 brackets: `1.2.3.4:80` → `1.2.3.4`,
/// `[2001:db8::1]:80` → `2001:db8::1`. A bare IPv6 address is untouched.
fn strip_port(s: &str) -> &str {
	if let Some(rest) = s.strip_prefix('[') {
		return rest.split(']').next().unwrap_or(rest);
	}
	match s.find(':') {
		// a single ':' means host:port; more than one is a bare IPv6
		Some(idx) if s[idx + 1..].find(':').is_none() => &s[..idx],
		_ => s,
	}
}


// vim: ts=4
