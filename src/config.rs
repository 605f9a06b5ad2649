//! Configuration files and deploy settings
//!
//! Two TOML files describe a repository:
//! - `repo.toml` at the root: categories, default scoreboard URL and deploy tuning
//! - `challenge.toml` in every challenge directory
//!
//! Deploy settings follow a priority chain:
//! 1. Built-in defaults (`DeployConfig::default()`)
//! 2. `repo.toml`
//! 3. Environment variables (`CTFD_URL`, `CTFD_API_TOKEN`)
//! 4. CLI flags (highest priority)

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{Difficulty, Score};
use crate::reconcile::{ReconcileOptions, DEFAULT_READ_CONCURRENCY, DEFAULT_WRITE_CONCURRENCY};
use crate::remote::HttpRemoteConfig;

/// Repository configuration file name
pub const REPO_FILE: &str = "repo.toml";

/// Challenge configuration file name
pub const CHALLENGE_FILE: &str = "challenge.toml";

pub const ENV_URL: &str = "CTFD_URL";
pub const ENV_TOKEN: &str = "CTFD_API_TOKEN";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
	/// File could not be read
	Read { path: PathBuf, source: io::Error },

	/// File is not valid TOML
	Parse { path: PathBuf, message: String },

	/// File is valid TOML but does not match the schema
	Schema { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Read { path, source } => write!(f, "Failed to read {}: {}", path.display(), source),
			ConfigError::Parse { path, message } => write!(f, "Failed to parse {}: {}", path.display(), message),
			ConfigError::Schema { path, message } => {
				write!(f, "{} failed schema validation: {}", path.display(), message)
			}
		}
	}
}

impl std::error::Error for ConfigError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			ConfigError::Read { source, .. } => Some(source),
			_ => None,
		}
	}
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
	let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
	let table: toml::Table = text
		.parse()
		.map_err(|e: toml::de::Error| ConfigError::Parse { path: path.to_path_buf(), message: e.message().to_string() })?;
	toml::Value::Table(table)
		.try_into()
		.map_err(|e: toml::de::Error| ConfigError::Schema { path: path.to_path_buf(), message: e.message().to_string() })
}

// ============================================================================
// REPOSITORY FILE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoFile {
	/// Category slugs challenges may use
	pub categories: Vec<String>,

	/// Default scoreboard URL
	#[serde(default)]
	pub url: Option<String>,

	#[serde(default)]
	pub deploy: DeploySection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySection {
	pub read_concurrency: Option<usize>,
	pub write_concurrency: Option<usize>,
	pub request_timeout_secs: Option<u64>,
}

impl RepoFile {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		load(path)
	}
}

// ============================================================================
// CHALLENGE FILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChallengeFile {
	pub meta: MetaSection,
	pub scoring: ScoringSection,

	#[serde(default)]
	pub hints: Vec<HintEntry>,

	#[serde(default, rename = "static")]
	pub static_files: Option<StaticSection>,

	/// Containers by id; build files live under the `dynamic/` subdirectory
	#[serde(default)]
	pub dynamic: Option<BTreeMap<String, ContainerConfig>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaSection {
	pub id: String,
	pub name: Option<String>,
	pub category: String,
	pub difficulty: Difficulty,
	pub description: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringSection {
	pub flag: Option<String>,
	#[serde(default)]
	pub flags: Vec<String>,
	pub points: Option<u32>,
	pub dynamic: Option<DynamicScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicScore {
	pub initial: u32,
	pub minimum: u32,
	pub decay: u32,
}

impl ScoringSection {
	/// `flag` first, then `flags` in order
	pub fn all_flags(&self) -> Vec<String> {
		self.flag.iter().chain(self.flags.iter()).cloned().collect()
	}

	/// Score, if one was configured
	pub fn score(&self) -> Option<Score> {
		match (self.dynamic, self.points) {
			(Some(d), _) => Some(Score::Dynamic { initial: d.initial, minimum: d.minimum, decay: d.decay }),
			(None, Some(points)) => Some(Score::Static { points }),
			(None, None) => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HintEntry {
	pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
	/// Containerfile path, relative to `dynamic/`
	pub build: String,
	/// Exposed ports by id
	#[serde(default)]
	pub ports: BTreeMap<String, u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticSection {
	pub include: Vec<String>,
	pub exclude: Vec<String>,
	pub strip_prefixes: Vec<String>,
	pub archive: bool,
}

impl ChallengeFile {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		load(path)
	}
}

// ============================================================================
// DEPLOY SETTINGS
// ============================================================================

/// Settings of one deploy run, resolved through the priority chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
	pub url: Option<String>,
	pub token: Option<String>,

	pub read_concurrency: usize,
	pub write_concurrency: usize,
	pub request_timeout: Duration,
}

impl Default for DeployConfig {
	fn default() -> Self {
		Self {
			url: None,
			token: None,
			read_concurrency: DEFAULT_READ_CONCURRENCY,
			write_concurrency: DEFAULT_WRITE_CONCURRENCY,
			request_timeout: crate::remote::DEFAULT_TIMEOUT,
		}
	}
}

impl DeployConfig {
	/// Layer the repository file over the current values
	pub fn apply_repo(&mut self, repo: &RepoFile) {
		if let Some(url) = &repo.url {
			self.url = Some(url.clone());
		}
		let deploy = &repo.deploy;
		if let Some(n) = deploy.read_concurrency.filter(|n| *n > 0) {
			self.read_concurrency = n;
		}
		if let Some(n) = deploy.write_concurrency.filter(|n| *n > 0) {
			self.write_concurrency = n;
		}
		if let Some(secs) = deploy.request_timeout_secs.filter(|s| *s > 0) {
			self.request_timeout = Duration::from_secs(secs);
		}
	}

	/// Layer environment variables over the current values
	pub fn apply_env(&mut self) {
		self.apply_env_from(|key| std::env::var(key).ok());
	}

	pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		if let Some(url) = lookup(ENV_URL).filter(|v| !v.is_empty()) {
			self.url = Some(url);
		}
		if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
			self.token = Some(token);
		}
	}

	/// Layer command line flags over the current values
	pub fn apply_cli(&mut self, url: Option<String>, token: Option<String>) {
		if url.is_some() {
			self.url = url;
		}
		if token.is_some() {
			self.token = token;
		}
	}

	pub fn reconcile_options(&self) -> ReconcileOptions {
		ReconcileOptions { read_concurrency: self.read_concurrency, write_concurrency: self.write_concurrency }
	}

	/// HTTP client settings, once both URL and token are known
	pub fn remote_config(&self) -> Option<HttpRemoteConfig> {
		match (&self.url, &self.token) {
			(Some(url), Some(token)) => Some(HttpRemoteConfig {
				url: url.clone(),
				token: token.clone(),
				timeout: self.request_timeout,
			}),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	#[test]
	fn test_repo_file() {
		let repo: RepoFile = toml::from_str(
			r#"
			categories = ["web", "pwn"]
			url = "https://ctf.example"

			[deploy]
			write_concurrency = 1
			"#,
		)
		.unwrap();
		assert_eq!(repo.categories, vec!["web", "pwn"]);
		assert_eq!(repo.deploy.write_concurrency, Some(1));
		assert_eq!(repo.deploy.read_concurrency, None);
	}

	#[test]
	fn test_repo_file_rejects_unknown_keys() {
		assert!(toml::from_str::<RepoFile>("categories = []\ncolour = 1\n").is_err());
	}

	#[test]
	fn test_challenge_file() {
		let file: ChallengeFile = toml::from_str(
			r#"
			[meta]
			id = "web-01"
			category = "web"
			difficulty = "easy"
			tags = ["intro"]

			[scoring]
			flag = "flag{a}"
			flags = ["flag{b}"]
			dynamic = { initial = 500, minimum = 100, decay = 20 }

			[[hints]]
			content = "first"

			[[hints]]
			content = "second"

			[static]
			include = ["static/**"]
			archive = true
			"#,
		)
		.unwrap();
		assert_eq!(file.meta.difficulty, Difficulty::Easy);
		assert_eq!(file.scoring.all_flags(), vec!["flag{a}", "flag{b}"]);
		assert_eq!(file.scoring.score(), Some(Score::Dynamic { initial: 500, minimum: 100, decay: 20 }));
		assert_eq!(file.hints.len(), 2);
		let st = file.static_files.unwrap();
		assert!(st.archive);
		assert!(st.exclude.is_empty());
	}

	#[test]
	fn test_container_sections() {
		let base = "[meta]\nid = \"web-01\"\ncategory = \"web\"\ndifficulty = \"easy\"\n[scoring]\nflag = \"x\"\n";
		let file: ChallengeFile = toml::from_str(&format!(
			"{}[dynamic.app]\nbuild = \"app/Containerfile\"\nports = {{ http = 8080 }}\n[dynamic.db]\nbuild = \"db.Containerfile\"\n",
			base
		))
		.unwrap();
		let containers = file.dynamic.unwrap();
		assert_eq!(containers.keys().collect::<Vec<_>>(), vec!["app", "db"]);
		assert_eq!(containers["app"].build, "app/Containerfile");
		assert_eq!(containers["app"].ports.get("http"), Some(&8080));
		assert!(containers["db"].ports.is_empty());

		assert!(toml::from_str::<ChallengeFile>(&format!("{}[dynamic.app]\nports = {{}}\n", base)).is_err());
		assert!(toml::from_str::<ChallengeFile>(&format!("{}[dynamic.app]\nbuild = \"x\"\nimage = \"y\"\n", base)).is_err());
	}

	#[test]
	fn test_invalid_difficulty() {
		let res = toml::from_str::<ChallengeFile>(
			"[meta]\nid = \"a-b\"\ncategory = \"web\"\ndifficulty = \"insane\"\n[scoring]\nflag = \"x\"\n",
		);
		assert!(res.is_err());
	}

	#[test]
	fn test_priority_chain() {
		let mut config = DeployConfig::default();
		assert_eq!(config.read_concurrency, 5);
		assert_eq!(config.write_concurrency, 3);

		let repo = RepoFile {
			categories: vec![],
			url: Some("https://repo".into()),
			deploy: DeploySection { read_concurrency: Some(8), write_concurrency: Some(0), request_timeout_secs: Some(10) },
		};
		config.apply_repo(&repo);
		assert_eq!(config.url.as_deref(), Some("https://repo"));
		assert_eq!(config.read_concurrency, 8);
		assert_eq!(config.write_concurrency, 3);
		assert_eq!(config.request_timeout, Duration::from_secs(10));

		let env: HashMap<&str, &str> = [(ENV_URL, "https://env"), (ENV_TOKEN, "tok-env")].into_iter().collect();
		config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
		assert_eq!(config.url.as_deref(), Some("https://env"));

		config.apply_cli(None, Some("tok-cli".into()));
		assert_eq!(config.url.as_deref(), Some("https://env"));
		assert_eq!(config.token.as_deref(), Some("tok-cli"));

		let remote = config.remote_config().unwrap();
		assert_eq!(remote.timeout, Duration::from_secs(10));
	}

	#[test]
	fn test_remote_config_needs_token() {
		let mut config = DeployConfig::default();
		config.apply_cli(Some("https://x".into()), None);
		assert!(config.remote_config().is_none());
	}
}

// vim: ts=4
