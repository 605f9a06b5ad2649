//! Pattern policy checks
//!
//! Include patterns are globs and exclude patterns are literal paths, both
//! relative to the challenge directory. These checks run during configuration
//! validation, before any matching happens.

use globset::GlobBuilder;
use std::fmt;
use std::path::{Component, Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
	Include,
	Exclude,
}

impl PatternKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			PatternKind::Include => "include",
			PatternKind::Exclude => "exclude",
		}
	}
}

/// Ways a pattern can break the configuration policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternViolation {
	/// Starts with a path separator
	Absolute,

	/// Ends with a path separator
	DirectoryOnly,

	/// Contains a `..` component
	ParentReference,

	/// Does not compile as a glob
	InvalidGlob(String),
}

impl PatternViolation {
	pub fn code(&self) -> &'static str {
		match self {
			PatternViolation::Absolute => "challenge-static-pattern-absolute",
			PatternViolation::DirectoryOnly => "challenge-static-pattern-dironly",
			PatternViolation::ParentReference => "challenge-static-pattern-parent",
			PatternViolation::InvalidGlob(_) => "challenge-static-pattern-invalid",
		}
	}
}

impl fmt::Display for PatternViolation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PatternViolation::Absolute => write!(f, "cannot start with '/'"),
			PatternViolation::DirectoryOnly => write!(f, "cannot end with '/'"),
			PatternViolation::ParentReference => write!(f, "cannot contain '..'"),
			PatternViolation::InvalidGlob(msg) => write!(f, "not a valid glob: {}", msg),
		}
	}
}

/// Check a single static pattern against the policy
pub fn check_pattern(pattern: &str, kind: PatternKind) -> Result<(), PatternViolation> {
	if pattern.starts_with('/') {
		return Err(PatternViolation::Absolute);
	}
	if pattern.ends_with('/') {
		return Err(PatternViolation::DirectoryOnly);
	}
	if Path::new(pattern).components().any(|c| matches!(c, Component::ParentDir)) {
		return Err(PatternViolation::ParentReference);
	}
	if kind == PatternKind::Include {
		GlobBuilder::new(pattern)
			.literal_separator(true)
			.build()
			.map_err(|e| PatternViolation::InvalidGlob(e.kind().to_string()))?;
	}
	Ok(())
}


// vim: ts=4
