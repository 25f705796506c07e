//! Proxyable URL pattern registry
//!
//! One table drives both admission of forwarded targets and the decision to
//! rewrite upstream `Location` headers back onto the proxy host.

use std::sync::LazyLock;

use regex::Regex;

/// The proxyable URL patterns. Capture groups carry `(user, repo)` where the
/// URL shape has them.
pub static EXPS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	[
		r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:releases|archive)/.*$",
		r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:blob|raw)/.*$",
		r"^(?:https?://)?github\.com/([^/]+)/([^/]+)/(?:info|git-).*$",
		r"^(?:https?://)?raw\.github(?:usercontent|)\.com/([^/]+)/([^/]+)/.+?/.+$",
		r"^(?:https?://)?gist\.github(?:usercontent|)\.com/([^/]+)/.+?/.+",
		r"^(?:https?://)?api\.github\.com/repos/([^/]+)/([^/]+)/.*",
		r"^(?:https?://)?huggingface\.co(?:/spaces)?/([^/]+)/(.+)$",
		r"^(?:https?://)?cdn-lfs\.hf\.co(?:/spaces)?/([^/]+)/([^/]+)(?:/(.*))?$",
		r"^(?:https?://)?download\.docker\.com/([^/]+)/.*\.(tgz|zip)$",
		r"^(?:https?://)?(github|opengraph)\.githubassets\.com/([^/]+)/.+?$",
	]
	.iter()
	.map(|pattern| Regex::new(pattern).expect("pattern registry regex"))
	.collect()
});

/// Match a target URL against the registry. Returns the capture groups
/// (without the full match) of the first matching pattern.
pub fn match_target(url: &str) -> Option<Vec<String>> {
	for exp in EXPS.iter() {
		if let Some(captures) = exp.captures(url) {
			return Some(
				captures
					.iter()
					.skip(1)
					.filter_map(|group| group.map(|m| m.as_str().to_string()))
					.collect(),
			);
		}
	}
	None
}

/// Whether the target is a `github.com/.../{blob,raw}/...` URL (pattern 2),
/// which gets its `/blob/` segment rewritten to `/raw/`.
pub fn is_blob_url(url: &str) -> bool {
	EXPS[1].is_match(url)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_release_asset_url() {
		let matches =
			match_target("https://github.com/user/repo/releases/download/v1.0/x.tar.gz").unwrap();
		assert_eq!(matches[0], "user");
		assert_eq!(matches[1], "repo");
	}

	#[test]
	fn test_archive_url() {
		assert!(match_target("https://github.com/user/repo/archive/refs/tags/v1.zip").is_some());
	}

	#[test]
	fn test_blob_and_raw_urls() {
		assert!(is_blob_url("https://github.com/user/repo/blob/main/README.md"));
		assert!(is_blob_url("https://github.com/user/repo/raw/main/README.md"));
		assert!(!is_blob_url("https://github.com/user/repo/releases/download/v1/x"));
		assert!(match_target("https://github.com/user/repo/blob/main/install.sh").is_some());
	}

	#[test]
	fn test_git_clone_urls() {
		assert!(match_target("https://github.com/user/repo/info/refs?service=git-upload-pack")
			.is_some());
		assert!(match_target("https://github.com/user/repo/git-upload-pack").is_some());
	}

	#[test]
	fn test_raw_githubusercontent() {
		let matches =
			match_target("https://raw.githubusercontent.com/user/repo/main/install.sh").unwrap();
		assert_eq!(matches[0], "user");
		assert_eq!(matches[1], "repo");
		// The legacy host spelling also matches.
		assert!(match_target("https://raw.github.com/user/repo/main/install.sh").is_some());
	}

	#[test]
	fn test_gist_url_captures_user() {
		let matches =
			match_target("https://gist.githubusercontent.com/user/abc123/raw/file.txt").unwrap();
		assert_eq!(matches[0], "user");
	}

	#[test]
	fn test_api_repos_url() {
		assert!(match_target("https://api.github.com/repos/user/repo/releases/latest").is_some());
	}

	#[test]
	fn test_huggingface_urls() {
		let matches =
			match_target("https://huggingface.co/org/model/resolve/main/model.safetensors")
				.unwrap();
		assert_eq!(matches[0], "org");
		assert!(match_target("https://huggingface.co/spaces/org/demo/resolve/main/app.py")
			.is_some());
		assert!(match_target("https://cdn-lfs.hf.co/org/repo/blob").is_some());
	}

	#[test]
	fn test_docker_static_downloads() {
		assert!(match_target("https://download.docker.com/linux/static/stable/x86_64/docker-24.0.7.tgz").is_some());
		assert!(match_target("https://download.docker.com/linux/ubuntu/gpg").is_none());
	}

	#[test]
	fn test_githubassets() {
		assert!(match_target("https://github.githubassets.com/assets/app.js").is_some());
		assert!(match_target("https://opengraph.githubassets.com/1/user/repo").is_some());
	}

	#[test]
	fn test_scheme_is_optional() {
		assert!(match_target("github.com/user/repo/releases/download/v1/x").is_some());
	}

	#[test]
	fn test_unproxyable_urls_are_rejected() {
		assert!(match_target("https://example.com/file").is_none());
		assert!(match_target("ftp://example.com/file").is_none());
		assert!(match_target("https://github.com/user").is_none());
		assert!(match_target("https://github.com/user/repo").is_none());
		assert!(match_target("https://gitlab.com/user/repo/releases/download/v1/x").is_none());
	}
}

// vim: ts=4
