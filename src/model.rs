//! Local challenge definitions (the intended state)

use serde::Deserialize;
use std::path::PathBuf;

use crate::identity::ChallengeId;

/// How many points a challenge is worth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
	/// Fixed point value
	Static { points: u32 },

	/// Value decays with the number of solves
	Dynamic { initial: u32, minimum: u32, decay: u32 },
}

impl Default for Score {
	fn default() -> Self {
		Score::Static { points: 0 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
	Undefined,
	Easy,
	Medium,
	Hard,
}

impl Difficulty {
	pub fn as_str(&self) -> &'static str {
		match self {
			Difficulty::Undefined => "undefined",
			Difficulty::Easy => "easy",
			Difficulty::Medium => "medium",
			Difficulty::Hard => "hard",
		}
	}
}

/// Which files make up a challenge's static artifacts, and how to ship them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSpec {
	/// Glob patterns, relative to the challenge directory
	pub include: Vec<String>,

	/// Literal relative paths removed from the include matches
	pub exclude: Vec<String>,

	/// Prefixes stripped from archive entry names
	pub strip_prefixes: Vec<String>,

	/// Bundle multiple files into one archive
	pub archive: bool,
}

/// A fully validated challenge as described on disk
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChallenge {
	pub id: ChallengeId,
	pub name: String,
	pub category: String,
	pub difficulty: Difficulty,
	pub description: Option<String>,
	pub score: Score,
	pub tags: Vec<String>,
	pub hints: Vec<String>,
	pub flags: Vec<String>,
	pub static_spec: Option<StaticSpec>,

	/// Challenge directory
	pub path: PathBuf,

	/// Resolved static files (absolute, sorted)
	pub static_files: Vec<PathBuf>,
}

impl LocalChallenge {
	/// Minimal challenge with no static files, mostly useful for tests and tooling
	pub fn new(id: ChallengeId, category: impl Into<String>, path: impl Into<PathBuf>) -> Self {
		Self {
			name: id.slug().to_string(),
			id,
			category: category.into(),
			difficulty: Difficulty::Undefined,
			description: None,
			score: Score::default(),
			tags: Vec::new(),
			hints: Vec::new(),
			flags: Vec::new(),
			static_spec: None,
			path: path.into(),
			static_files: Vec::new(),
		}
	}

	pub fn slug(&self) -> &str {
		self.id.slug()
	}

	pub fn numeric_id(&self) -> u32 {
		self.id.numeric()
	}

	pub fn archive_enabled(&self) -> bool {
		self.static_spec.as_ref().map(|s| s.archive).unwrap_or(false)
	}

	pub fn strip_prefixes(&self) -> &[String] {
		self.static_spec.as_ref().map(|s| s.strip_prefixes.as_slice()).unwrap_or(&[])
	}
}

// vim: ts=4
