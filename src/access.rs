//! Repository access control
//!
//! Stateless matching of parsed targets (Docker images, GitHub repos)
//! against the proxy white/black lists of the current config snapshot.

use crate::config::AppConfig;
use crate::prelude::*;

/// Parsed Docker image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
	pub namespace: String,
	pub repository: String,
	pub tag: String,
}

impl ImageRef {
	/// Parse an image string such as `nginx`, `grafana/loki:2.9`,
	/// `ghcr.io/owner/image:tag`. The first path segment is treated as an
	/// upstream host only when it contains a `.` and is then dropped.
	pub fn parse(image: &str) -> Self {
		let mut image = image.strip_prefix("docker://").unwrap_or(image);

		let mut tag = String::new();
		if let Some(idx) = image.rfind(':') {
			let part = &image[idx + 1..];
			if !part.contains('/') {
				tag = part.to_string();
				image = &image[..idx];
			}
		}
		if tag.is_empty() {
			tag = "latest".to_string();
		}

		let (namespace, repository) = if image.contains('/') {
			let parts: Vec<&str> = image.split('/').collect();
			if parts[0].contains('.') {
				if parts.len() >= 3 {
					(parts[1].to_string(), parts[2].to_string())
				} else {
					("library".to_string(), parts[1].to_string())
				}
			} else {
				(parts[0].to_string(), parts[1].to_string())
			}
		} else {
			("library".to_string(), image.to_string())
		};

		Self { namespace, repository, tag }
	}

	pub fn full_name(&self) -> String {
		format!("{}/{}", self.namespace, self.repository)
	}
}

/// Check a Docker image against the proxy lists. Non-empty white list
/// requires a match; a black list match then still rejects.
pub fn check_image(config: &AppConfig, image: &str) -> HpResult<ImageRef> {
	let image_ref = ImageRef::parse(image);

	if !config.proxy.white_list.is_empty()
		&& !matches_list(&image_ref.namespace, &image_ref.repository, &config.proxy.white_list)
	{
		return Err(Error::AccessDenied("不在Docker镜像白名单内".into()));
	}
	if !config.proxy.black_list.is_empty()
		&& matches_list(&image_ref.namespace, &image_ref.repository, &config.proxy.black_list)
	{
		return Err(Error::AccessDenied("Docker镜像在黑名单内".into()));
	}

	Ok(image_ref)
}

/// Check a GitHub `user/repo` pair against the proxy lists. A trailing
/// `.git` on the repo is ignored.
pub fn check_github(config: &AppConfig, user: &str, repo: &str) -> HpResult<()> {
	let user = user.trim();
	let repo = repo.trim();
	let repo = repo.strip_suffix(".git").unwrap_or(repo);

	if !config.proxy.white_list.is_empty() && !matches_list(user, repo, &config.proxy.white_list) {
		return Err(Error::AccessDenied("不在GitHub仓库白名单内".into()));
	}
	if !config.proxy.black_list.is_empty() && matches_list(user, repo, &config.proxy.black_list) {
		return Err(Error::AccessDenied("GitHub仓库在黑名单内".into()));
	}

	Ok(())
}

/// Case-insensitive pattern match over `namespace/repository`.
///
/// Entry forms: exact `ns/repo`; `ns` or `ns/*` (whole namespace);
/// `prefix*`; `*/repo` or `*/repo*` (repo-only wildcard); `prefix/`
/// subtree (matches iff the full name starts with `prefix/`).
fn matches_list(namespace: &str, repository: &str, list: &[String]) -> bool {
	let namespace = namespace.to_lowercase();
	let repository = repository.to_lowercase();
	let full_name = format!("{}/{}", namespace, repository);

	for item in list {
		let item = item.trim().to_lowercase();
		if item.is_empty() {
			continue;
		}

		if full_name == item {
			return true;
		}

		if item == namespace || item == format!("{}/*", namespace) {
			return true;
		}

		if let Some(prefix) = item.strip_suffix('*') {
			if !prefix.starts_with("*/") && full_name.starts_with(prefix) {
				return true;
			}
		}

		if let Some(repo_pattern) = item.strip_prefix("*/") {
			match repo_pattern.strip_suffix('*') {
				Some(repo_prefix) => {
					if repository.starts_with(repo_prefix) {
						return true;
					}
				}
				None => {
					if repository == repo_pattern {
						return true;
					}
				}
			}
		}

		if full_name.starts_with(&format!("{}/", item)) {
			return true;
		}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::AppConfig;

	fn config_with(white: &[&str], black: &[&str]) -> AppConfig {
		let mut config = AppConfig::default();
		config.proxy.white_list = white.iter().map(|s| s.to_string()).collect();
		config.proxy.black_list = black.iter().map(|s| s.to_string()).collect();
		config
	}

	#[test]
	fn test_parse_bare_image() {
		let image = ImageRef::parse("nginx");
		assert_eq!(image.namespace, "library");
		assert_eq!(image.repository, "nginx");
		assert_eq!(image.tag, "latest");
		assert_eq!(image.full_name(), "library/nginx");
	}

	#[test]
	fn test_parse_namespaced_image_with_tag() {
		let image = ImageRef::parse("grafana/loki:2.9.4");
		assert_eq!(image.namespace, "grafana");
		assert_eq!(image.repository, "loki");
		assert_eq!(image.tag, "2.9.4");
	}

	#[test]
	fn test_parse_registry_host_is_dropped() {
		let image = ImageRef::parse("ghcr.io/owner/image:v1");
		assert_eq!(image.namespace, "owner");
		assert_eq!(image.repository, "image");
		assert_eq!(image.tag, "v1");
	}

	#[test]
	fn test_parse_registry_host_single_repo() {
		let image = ImageRef::parse("registry.k8s.io/pause");
		assert_eq!(image.namespace, "library");
		assert_eq!(image.repository, "pause");
	}

	#[test]
	fn test_parse_port_is_not_a_tag() {
		// The segment after the last ':' contains '/', so it is not a tag.
		let image = ImageRef::parse("localhost.localdomain:5000/ns/repo");
		assert_eq!(image.tag, "latest");
		assert_eq!(image.namespace, "ns");
		assert_eq!(image.repository, "repo");
	}

	#[test]
	fn test_empty_lists_are_permissive() {
		let config = config_with(&[], &[]);
		assert!(check_image(&config, "nginx").is_ok());
		assert!(check_github(&config, "user", "repo").is_ok());
	}

	#[test]
	fn test_exact_match() {
		let config = config_with(&["library/nginx"], &[]);
		assert!(check_image(&config, "nginx").is_ok());
		assert!(check_image(&config, "redis").is_err());
	}

	#[test]
	fn test_namespace_wildcard() {
		let config = config_with(&["grafana/*"], &[]);
		assert!(check_image(&config, "grafana/loki").is_ok());
		assert!(check_image(&config, "grafana/mimir").is_ok());
		assert!(check_image(&config, "nginx").is_err());

		let config = config_with(&["grafana"], &[]);
		assert!(check_image(&config, "grafana/loki").is_ok());
	}

	#[test]
	fn test_prefix_wildcard() {
		let config = config_with(&["library/ng*"], &[]);
		assert!(check_image(&config, "nginx").is_ok());
		assert!(check_image(&config, "library/ngrok").is_ok());
		assert!(check_image(&config, "redis").is_err());
	}

	#[test]
	fn test_repo_only_wildcard() {
		let config = config_with(&["*/nginx"], &[]);
		assert!(check_image(&config, "nginx").is_ok());
		assert!(check_image(&config, "bitnami/nginx").is_ok());
		assert!(check_image(&config, "bitnami/redis").is_err());

		let config = config_with(&["*/ng*"], &[]);
		assert!(check_image(&config, "bitnami/nginx").is_ok());
		assert!(check_image(&config, "bitnami/redis").is_err());
	}

	#[test]
	fn test_subtree_does_not_match_sibling() {
		// "user/repo" must not match "user/repo-fork"
		let config = config_with(&["user/repo"], &[]);
		assert!(check_github(&config, "user", "repo").is_ok());
		assert!(check_github(&config, "user", "repo-fork").is_err());
	}

	#[test]
	fn test_case_insensitive() {
		let config = config_with(&["Grafana/Loki"], &[]);
		assert!(check_image(&config, "grafana/loki").is_ok());
		assert!(check_github(&config, "GRAFANA", "LOKI").is_ok());
	}

	#[test]
	fn test_git_suffix_stripped() {
		let config = config_with(&["user/repo"], &[]);
		assert!(check_github(&config, "user", "repo.git").is_ok());
	}

	#[test]
	fn test_blacklist_rejects() {
		let config = config_with(&[], &["library/nginx"]);
		let err = check_image(&config, "nginx").unwrap_err();
		match err {
			Error::AccessDenied(reason) => assert!(reason.contains("在黑名单内")),
			other => panic!("unexpected error: {:?}", other),
		}
		assert!(check_image(&config, "redis").is_ok());
	}

	#[test]
	fn test_whitelist_wins_before_blacklist_is_consulted() {
		// Non-empty white list: anything unmatched is rejected regardless
		// of black list contents.
		let config = config_with(&["grafana/*"], &["library/nginx"]);
		assert!(check_image(&config, "nginx").is_err());
		assert!(check_image(&config, "redis").is_err());
		assert!(check_image(&config, "grafana/loki").is_ok());
	}

	#[test]
	fn test_whitelisted_but_blacklisted() {
		let config = config_with(&["grafana/*"], &["grafana/loki"]);
		assert!(check_image(&config, "grafana/loki").is_err());
		assert!(check_image(&config, "grafana/mimir").is_ok());
	}

	#[test]
	fn test_github_patterns_match_image_patterns() {
		let config = config_with(&["*/cli"], &[]);
		assert!(check_github(&config, "anyone", "cli").is_ok());
		assert!(check_github(&config, "anyone", "other").is_err());
	}
}

// vim: ts=4
