//! Shell script rewriter
//!
//! Transforms `*.sh` response bodies so that every embedded proxyable URL is
//! prefixed with the proxy host, decompressing gzip on the fly. The
//! transformation is chunk-at-a-time with a bounded look-behind window, so
//! bodies of any size stream without buffering.

use std::sync::LazyLock;

use async_compression::tokio::bufread::GzipDecoder;
use axum::body::Body;
use bytes::{Buf, Bytes, BytesMut};
use futures::{future, Stream, StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use regex::bytes::Regex;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::prelude::*;

/// Bytes held back between chunks so a URL split across a chunk boundary
/// still matches. Sized well above any realistic proxyable URL.
const LOOKBEHIND: usize = 1024;

/// A match still open at the buffer end is held back at most this long;
/// past it the bytes pass through untouched instead of buffering forever.
const MAX_HELD_URL: usize = 8 * 1024;

/// Embedded (non-anchored) forms of the proxyable URL patterns. Path tails
/// are bounded by URL-safe characters so surrounding script text is never
/// swallowed; the scheme is required to keep false positives out.
static EMBEDDED: LazyLock<Regex> = LazyLock::new(|| {
	let seg = r#"[^/\s'"\\]+"#;
	let rest = r#"[^\s'"\\]*"#;
	let rest1 = r#"[^\s'"\\]+"#;
	let branches = [
		format!(r"github\.com/{seg}/{seg}/(?:releases|archive)/{rest}"),
		format!(r"github\.com/{seg}/{seg}/(?:blob|raw)/{rest}"),
		format!(r"github\.com/{seg}/{seg}/(?:info|git-){rest}"),
		format!(r"raw\.github(?:usercontent)?\.com/{seg}/{seg}/{seg}/{rest1}"),
		format!(r"gist\.github(?:usercontent)?\.com/{seg}/{seg}/{rest1}"),
		format!(r"api\.github\.com/repos/{seg}/{seg}/{rest}"),
		format!(r"huggingface\.co(?:/spaces)?/{seg}/{rest1}"),
		format!(r"cdn-lfs\.hf\.co(?:/spaces)?/{seg}/{seg}(?:/{rest})?"),
		format!(r"download\.docker\.com/{seg}/{rest}\.(?:tgz|zip)"),
		format!(r"(?:github|opengraph)\.githubassets\.com/{seg}/{rest1}"),
	];
	Regex::new(&format!("https?://(?:{})", branches.join("|"))).expect("embedded url regex")
});

/// Chunk-at-a-time URL rewriter with a bounded look-behind window.
///
/// A URL already carrying the proxy prefix is left alone, so applying the
/// rewriter twice with the same prefix equals applying it once.
pub struct ScriptRewriter {
	/// `https://host/`, the bytes inserted before each matched URL
	prefix: Vec<u8>,
	buf: BytesMut,
	/// Last `prefix.len()` bytes already emitted, for prefix detection at
	/// chunk boundaries
	context: Vec<u8>,
}

impl ScriptRewriter {
	pub fn new(proxy_host: &str) -> Self {
		let mut prefix = proxy_host.trim_end_matches('/').as_bytes().to_vec();
		prefix.push(b'/');
		Self { prefix, buf: BytesMut::new(), context: Vec::new() }
	}

	/// Feed a chunk, returning the bytes safe to emit so far.
	pub fn push(&mut self, chunk: &[u8]) -> Bytes {
		self.buf.extend_from_slice(chunk);
		self.drain(false)
	}

	/// Flush everything still buffered at end of stream.
	pub fn finish(&mut self) -> Bytes {
		self.drain(true)
	}

	fn drain(&mut self, finished: bool) -> Bytes {
		let data: &[u8] = &self.buf;
		let len = data.len();
		let mut out = BytesMut::with_capacity(len + self.prefix.len());
		let mut pos = 0usize;
		let mut hold: Option<usize> = None;

		for m in EMBEDDED.find_iter(data) {
			// A match running to the end of the buffer may continue in the
			// next chunk; hold it back.
			if !finished && m.end() == len {
				if len - m.start() <= MAX_HELD_URL {
					hold = Some(m.start());
				} else {
					out.extend_from_slice(&data[pos..m.end()]);
					pos = m.end();
				}
				break;
			}
			out.extend_from_slice(&data[pos..m.start()]);
			if !self.preceded_by_prefix(&out) {
				out.extend_from_slice(&self.prefix);
			}
			out.extend_from_slice(&data[m.start()..m.end()]);
			pos = m.end();
		}

		let cut = match hold {
			Some(start) => start,
			None if finished => len,
			None => len.saturating_sub(LOOKBEHIND).max(pos),
		};
		out.extend_from_slice(&data[pos..cut]);

		self.update_context(&out);
		self.buf.advance(cut);
		out.freeze()
	}

	/// Whether the bytes just before the upcoming match already end with the
	/// proxy prefix, looking across chunk boundaries when needed.
	fn preceded_by_prefix(&self, out: &BytesMut) -> bool {
		let need = self.prefix.len();
		if out.len() >= need {
			return out[out.len() - need..] == self.prefix[..];
		}
		let missing = need - out.len();
		if self.context.len() < missing {
			return false;
		}
		let mut candidate = Vec::with_capacity(need);
		candidate.extend_from_slice(&self.context[self.context.len() - missing..]);
		candidate.extend_from_slice(out);
		candidate == self.prefix
	}

	fn update_context(&mut self, emitted: &[u8]) {
		let need = self.prefix.len();
		if emitted.len() >= need {
			self.context.clear();
			self.context.extend_from_slice(&emitted[emitted.len() - need..]);
		} else {
			self.context.extend_from_slice(emitted);
			let overflow = self.context.len().saturating_sub(need);
			if overflow > 0 {
				self.context.drain(..overflow);
			}
		}
	}
}

/// Apply the rewriter to a chunk stream, flushing held-back bytes at the end.
pub fn rewrite_stream<S>(
	stream: S,
	is_gzip: bool,
	proxy_host: &str,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send
where
	S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
	let plain: Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Unpin> = if is_gzip {
		Box::new(ReaderStream::new(GzipDecoder::new(StreamReader::new(stream))))
	} else {
		Box::new(stream)
	};

	let mut rewriter = ScriptRewriter::new(proxy_host);
	plain
		.map(Some)
		.chain(futures::stream::once(future::ready(None)))
		.filter_map(move |item| {
			future::ready(match item {
				Some(Ok(chunk)) => {
					let emitted = rewriter.push(&chunk);
					(!emitted.is_empty()).then(|| Ok(emitted))
				}
				Some(Err(err)) => {
					warn!("script rewrite aborted: {}", err);
					Some(Err(err))
				}
				None => {
					let tail = rewriter.finish();
					(!tail.is_empty()).then(|| Ok(tail))
				}
			})
		})
}

/// Wrap an upstream response body in the rewriting stream.
pub fn rewrite_script_body(body: Incoming, is_gzip: bool, proxy_host: &str) -> Body {
	let stream = body.into_data_stream().map_err(std::io::Error::other);
	Body::from_stream(rewrite_stream(stream, is_gzip, proxy_host))
}


// vim: ts=4
