use axum::{http::StatusCode, response::IntoResponse};

use tracing::warn;

pub type HpResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Target URL did not match any proxyable pattern
	InvalidTarget,
	/// Rejected by the repository white/black lists
	AccessDenied(String),
	/// Declared Content-Length above the configured limit (bytes)
	BodyTooLarge(u64),
	/// More than the allowed number of upstream redirects
	RedirectLoop,
	/// Upstream dial/read failure or timeout
	Upstream(String),
	/// Configuration is unusable
	Config(String),

	// externals
	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::InvalidTarget => write!(f, "invalid target URL"),
			Error::AccessDenied(reason) => write!(f, "access denied: {}", reason),
			Error::BodyTooLarge(limit) => write!(f, "body exceeds limit of {} bytes", limit),
			Error::RedirectLoop => write!(f, "too many redirects"),
			Error::Upstream(msg) => write!(f, "upstream error: {}", msg),
			Error::Config(msg) => write!(f, "config error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
	fn into_response(self) -> axum::response::Response {
		match self {
			Error::InvalidTarget => (StatusCode::FORBIDDEN, "无效输入").into_response(),
			Error::AccessDenied(reason) => (StatusCode::FORBIDDEN, reason).into_response(),
			Error::BodyTooLarge(limit) => (
				StatusCode::PAYLOAD_TOO_LARGE,
				format!("文件过大，限制大小: {} MB", limit / (1024 * 1024)),
			)
				.into_response(),
			Error::RedirectLoop => (
				StatusCode::LOOP_DETECTED,
				"重定向次数过多，可能存在循环重定向",
			)
				.into_response(),
			Error::Upstream(msg) => {
				(StatusCode::INTERNAL_SERVER_ERROR, format!("server error {}", msg)).into_response()
			}
			_ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<axum::http::Error> for Error {
	fn from(err: axum::http::Error) -> Self {
		warn!("http error: {}", err);
		Error::Upstream(err.to_string())
	}
}

impl From<axum::http::uri::InvalidUri> for Error {
	fn from(err: axum::http::uri::InvalidUri) -> Self {
		warn!("invalid uri: {}", err);
		Error::Upstream(err.to_string())
	}
}

impl From<axum::http::header::ToStrError> for Error {
	fn from(err: axum::http::header::ToStrError) -> Self {
		warn!("header to str error: {}", err);
		Error::Upstream(err.to_string())
	}
}

impl From<url::ParseError> for Error {
	fn from(err: url::ParseError) -> Self {
		warn!("url parse error: {}", err);
		Error::Upstream(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Error::Upstream(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::Config(err.to_string())
	}
}

impl From<notify::Error> for Error {
	fn from(err: notify::Error) -> Self {
		warn!("file watch error: {}", err);
		Error::Config(err.to_string())
	}
}

// vim: ts=4
