//! Loading and validating a challenge repository from disk

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::config::{ChallengeFile, ConfigError, RepoFile, CHALLENGE_FILE, REPO_FILE};
use crate::identity::{validate_slug, ChallengeId};
use crate::logging::*;
use crate::matching::{check_pattern, PatternKind, PatternResolver};
use crate::model::{Difficulty, LocalChallenge, Score, StaticSpec};
use crate::packaging;
use crate::validation::{Pen, Severity, ValidationBook, ValidationFailed};

/// Subdirectory holding container challenge sources
const DYNAMIC_DIR: &str = "dynamic";

/// A validated challenge repository
#[derive(Debug, Clone)]
pub struct ChallengeRepo {
	path: PathBuf,
	config: RepoFile,
}

impl ChallengeRepo {
	/// Open and validate the repository at `path`
	pub fn open(book: &mut ValidationBook, path: impl Into<PathBuf>) -> Result<Self, ValidationFailed> {
		let path = path.into();
		let config_path = path.join(REPO_FILE);

		if !path.exists() {
			return Err(book.bind(None, &path).fatal("repo-not-found", "Challenge repository directory does not exist"));
		}
		if !path.is_dir() {
			return Err(book
				.bind(None, &path)
				.fatal("repo-not-directory", "Challenge repository directory exists but is not a directory"));
		}
		if !config_path.exists() {
			return Err(book.bind(None, &config_path).fatal(
				"repo-config-not-found",
				format!("Challenge repository does not contain a {} file", REPO_FILE),
			));
		}
		if !config_path.is_file() {
			return Err(book
				.bind(None, &config_path)
				.fatal("repo-config-not-file", "Challenge repository config exists but is not a file"));
		}

		let mut pen = book.bind(None, &config_path);
		let config = match RepoFile::load(&config_path) {
			Ok(config) => config,
			Err(e) => {
				pen.error(config_error_code("repo", &e), e.to_string());
				return Err(ValidationFailed);
			}
		};

		let mut failed = false;
		let mut seen = HashSet::new();
		for category in &config.categories {
			if let Err(msg) = validate_slug(category) {
				pen.error("repo-config-category-invalid", format!("Category {:?} is invalid: {}", category, msg));
				failed = true;
			}
			if !seen.insert(category.as_str()) {
				pen.error("repo-config-category-duplicate", format!("Category {:?} is listed more than once", category));
				failed = true;
			}
		}
		let deploy = &config.deploy;
		if deploy.read_concurrency == Some(0) || deploy.write_concurrency == Some(0) {
			pen.warn("repo-config-concurrency-invalid", "Deploy concurrency of 0 is ignored; using the default");
		}
		if deploy.request_timeout_secs == Some(0) {
			pen.warn("repo-config-timeout-invalid", "Request timeout of 0 is ignored; using the default");
		}

		if failed {
			return Err(ValidationFailed);
		}
		debug!("Opened repository {} with {} categories", path.display(), config.categories.len());
		Ok(Self { path, config })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn config(&self) -> &RepoFile {
		&self.config
	}

	pub fn categories(&self) -> &[String] {
		&self.config.categories
	}

	/// Immediate subdirectories containing a challenge file, sorted
	pub fn find_challenges(&self) -> std::io::Result<Vec<String>> {
		let mut found = Vec::new();
		for entry in std::fs::read_dir(&self.path)? {
			let entry = entry?;
			let path = entry.path();
			if path.is_dir() && path.join(CHALLENGE_FILE).exists() {
				found.push(entry.file_name().to_string_lossy().into_owned());
			}
		}
		found.sort();
		Ok(found)
	}

	/// Load and validate one challenge by directory name
	pub fn load_challenge(&self, book: &mut ValidationBook, slug: &str) -> Result<LocalChallenge, ValidationFailed> {
		let dir = self.path.join(slug);
		let config_path = dir.join(CHALLENGE_FILE);

		let id = match ChallengeId::new(slug) {
			Ok(id) => id,
			Err(msg) => {
				return Err(book
					.bind(Some(slug), &dir)
					.fatal("challenge-id-invalid", format!("Challenge ID {:?} is invalid: {}", slug, msg)))
			}
		};
		if !dir.exists() {
			return Err(book.bind(Some(slug), &dir).fatal("challenge-not-found", "Challenge directory does not exist"));
		}
		if !dir.is_dir() {
			return Err(book
				.bind(Some(slug), &dir)
				.fatal("challenge-not-directory", "Challenge directory exists but is not a directory"));
		}
		if !config_path.exists() {
			return Err(book.bind(Some(slug), &config_path).fatal(
				"challenge-config-not-found",
				format!("Challenge directory does not contain a {} file", CHALLENGE_FILE),
			));
		}
		if !config_path.is_file() {
			return Err(book
				.bind(Some(slug), &config_path)
				.fatal("challenge-config-not-file", "Challenge config exists but is not a file"));
		}

		let mut pen = book.bind(Some(slug), &config_path);
		let file = match ChallengeFile::load(&config_path) {
			Ok(file) => file,
			Err(e) => {
				pen.error(config_error_code("challenge", &e), e.to_string());
				return Err(ValidationFailed);
			}
		};

		let loader = ChallengeLoader { repo: self, dir: &dir, slug };
		loader.build(&mut pen, id, file)
	}
}

/// Issue code for a config file that failed to load
fn config_error_code(kind: &str, e: &ConfigError) -> &'static str {
	match (kind, e) {
		("repo", ConfigError::Read { .. }) => "repo-config-unreadable",
		("repo", ConfigError::Parse { .. }) => "repo-config-invalid-toml",
		("repo", ConfigError::Schema { .. }) => "repo-config-schema-failure",
		(_, ConfigError::Read { .. }) => "challenge-config-unreadable",
		(_, ConfigError::Parse { .. }) => "challenge-config-invalid-toml",
		(_, ConfigError::Schema { .. }) => "challenge-config-schema-failure",
	}
}

struct ChallengeLoader<'a> {
	repo: &'a ChallengeRepo,
	dir: &'a Path,
	slug: &'a str,
}

impl ChallengeLoader<'_> {
	fn build(&self, pen: &mut Pen<'_>, id: ChallengeId, file: ChallengeFile) -> Result<LocalChallenge, ValidationFailed> {
		let mut failed = false;
		let meta = file.meta;
		let scoring = file.scoring;

		if meta.id != self.slug {
			pen.error(
				"challenge-config-id-mismatch",
				format!("Challenge config ID does not match directory name ({:?} != {:?})", meta.id, self.slug),
			);
			failed = true;
		}

		if !self.repo.categories().contains(&meta.category) {
			pen.error(
				"challenge-config-category-invalid",
				format!(
					"Challenge category is invalid ({:?} must match one of the repository-defined categories)",
					meta.category
				),
			);
			failed = true;
		}

		if meta.difficulty == Difficulty::Undefined {
			pen.warn("challenge-config-difficulty-undefined", "Challenge difficulty is set to 'undefined'");
		}

		let name = match meta.name {
			Some(name) => name,
			None => {
				pen.warn("challenge-config-missing-name", "Challenge config does not specify a name; using challenge ID");
				self.slug.to_string()
			}
		};
		if meta.description.is_none() {
			pen.warn("challenge-config-missing-description", "Challenge config does not specify a description");
		}

		let mut seen = HashSet::new();
		for tag in &meta.tags {
			if !seen.insert(tag.as_str()) {
				pen.error("challenge-config-tag-duplicate", format!("Tag {:?} is listed more than once", tag));
				failed = true;
			}
		}

		let flags = scoring.all_flags();
		if flags.is_empty() {
			pen.error("challenge-config-missing-flag", "Challenge config does not specify a flag");
			failed = true;
		}

		let score = match scoring.score() {
			Some(score) => score,
			None => {
				pen.warn("challenge-config-missing-points", "Challenge config does not specify a point value; defaulting to 0");
				Score::default()
			}
		};
		if scoring.dynamic.is_some() && scoring.points.is_some() {
			pen.warn("challenge-config-points-ignored", "Both points and a dynamic score are set; using the dynamic score");
		}
		if let Score::Dynamic { initial, minimum, .. } = score {
			if minimum > initial {
				pen.error(
					"challenge-config-score-invalid",
					format!("Dynamic minimum ({}) is higher than the initial value ({})", minimum, initial),
				);
				failed = true;
			}
		}

		let dynamic_dir = self.dir.join(DYNAMIC_DIR);
		if let Some(containers) = &file.dynamic {
			if !dynamic_dir.is_dir() {
				pen.error(
					"challenge-dynamic-dir-missing",
					"Config contains dynamic section but `dynamic` subdirectory not found",
				);
				failed = true;
			}
			for (container, config) in containers {
				let build_file = dynamic_dir.join(&config.build);
				if !build_file.exists() {
					pen.error(
						"challenge-dynamic-build-file-missing",
						format!("Missing container build file for {:?}: {} not found", container, build_file.display()),
					);
					failed = true;
				}
			}
		} else if dynamic_dir.is_dir() {
			pen.warn(
				"challenge-dynamic-section-missing",
				"Config does not contain dynamic section but `dynamic` subdirectory exists",
			);
		}

		let mut challenge = LocalChallenge::new(id, meta.category, self.dir);
		challenge.name = name;
		challenge.difficulty = meta.difficulty;
		challenge.description = meta.description;
		challenge.score = score;
		challenge.tags = meta.tags;
		challenge.hints = file.hints.into_iter().map(|h| h.content).collect();
		challenge.flags = flags;

		if let Some(section) = file.static_files {
			let spec = StaticSpec {
				include: section.include,
				exclude: section.exclude,
				strip_prefixes: section.strip_prefixes,
				archive: section.archive,
			};
			match self.static_files(pen, &spec) {
				Some(files) => challenge.static_files = files,
				None => failed = true,
			}
			challenge.static_spec = Some(spec);

			if !failed {
				if let Err(e) = packaging::layout(&challenge) {
					pen.error("challenge-static-packaging", e.to_string());
					failed = true;
				}
			}
		}

		if failed {
			return Err(ValidationFailed);
		}
		Ok(challenge)
	}

	/// Check patterns and resolve them; `None` when an error was recorded
	fn static_files(&self, pen: &mut Pen<'_>, spec: &StaticSpec) -> Option<Vec<PathBuf>> {
		let mut bad = false;
		let patterns = spec
			.include
			.iter()
			.map(|p| (p, PatternKind::Include))
			.chain(spec.exclude.iter().map(|p| (p, PatternKind::Exclude)));
		for (pattern, kind) in patterns {
			if let Err(violation) = check_pattern(pattern, kind) {
				pen.error(violation.code(), format!("Invalid static {} pattern {:?}: {}", kind.as_str(), pattern, violation));
				bad = true;
			}
		}
		if bad {
			return None;
		}

		let mut resolver = PatternResolver::new(self.dir, &spec.include, &spec.exclude);
		let resolution = match resolver.resolve() {
			Ok(resolution) => resolution,
			Err(e) => {
				pen.error("challenge-static-resolve-failed", e.to_string());
				return None;
			}
		};
		for warning in &resolution.warnings {
			pen.warn(warning.code(), warning.to_string());
		}
		if resolution.files.is_empty() && !spec.include.is_empty() {
			let _ = pen.issue(Severity::Notice, "challenge-static-empty", "Static patterns matched no files");
		}
		Some(resolution.files.clone())
	}
}

/// Local side of a run: the repository and the challenges that loaded
#[derive(Debug)]
pub struct DeploySource {
	pub repo: ChallengeRepo,

	/// Successfully loaded challenges, sorted by id
	pub challenges: Vec<LocalChallenge>,

	/// Challenges that failed validation
	pub failed: BTreeSet<String>,
}

/// Open the repository and load the selected challenges.
///
/// With no `ids`, every challenge found in the repository is selected. Ids in
/// `skip` are dropped from the selection. Per-challenge failures are recorded
/// in the book and collected in [`DeploySource::failed`]; only a repository
/// failure is returned as an error.
pub fn load_sources(
	book: &mut ValidationBook,
	repo_path: &Path,
	ids: &[String],
	skip: &[String],
) -> Result<DeploySource, ValidationFailed> {
	let repo = ChallengeRepo::open(book, repo_path)?;

	let mut selected: Vec<String> = if ids.is_empty() {
		match repo.find_challenges() {
			Ok(found) => found,
			Err(e) => {
				return Err(book
					.bind(None, repo_path)
					.fatal("repo-unreadable", format!("Failed to list challenges: {}", e)))
			}
		}
	} else {
		ids.to_vec()
	};
	selected.retain(|id| !skip.contains(id));
	selected.sort();
	selected.dedup();
	info!("Validating {} challenges", selected.len());

	let mut challenges = Vec::with_capacity(selected.len());
	let mut failed = BTreeSet::new();
	for slug in selected {
		match repo.load_challenge(book, &slug) {
			Ok(challenge) => challenges.push(challenge),
			Err(ValidationFailed) => {
				failed.insert(slug);
			}
		}
	}

	// numeric ids are derived by hashing, so two slugs may collide
	let mut owners = std::collections::HashMap::new();
	for challenge in &challenges {
		if let Some(other) = owners.insert(challenge.numeric_id(), challenge.slug().to_string()) {
			book.bind(Some(challenge.slug()), &challenge.path).error(
				"challenge-id-collision",
				format!("Challenge {} has the same numeric ID as {}", challenge.slug(), other),
			);
			failed.insert(challenge.slug().to_string());
		}
	}
	challenges.retain(|c| !failed.contains(c.slug()));

	Ok(DeploySource { repo, challenges, failed })
}

// vim: ts=4
