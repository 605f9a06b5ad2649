//! Static file matching
//!
//! Resolves a challenge's include/exclude patterns into the concrete list of
//! files that make up its static artifacts, and checks patterns against the
//! configuration policy.

mod patterns;
mod resolver;

pub use patterns::{check_pattern, PatternKind, PatternViolation};
pub use resolver::{PatternResolver, Resolution};

use std::fmt;
use std::path::PathBuf;

/// Advisory findings produced while matching include patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternWarning {
	/// The pattern did not match anything
	Matchless { pattern: String },

	/// Every match of the pattern was already matched by earlier patterns
	Redundant { pattern: String },
}

impl PatternWarning {
	pub fn pattern(&self) -> &str {
		match self {
			PatternWarning::Matchless { pattern } | PatternWarning::Redundant { pattern } => pattern,
		}
	}

	/// Validation issue code for this warning
	pub fn code(&self) -> &'static str {
		match self {
			PatternWarning::Matchless { .. } => "challenge-static-include-matchless",
			PatternWarning::Redundant { .. } => "challenge-static-pattern-redundant",
		}
	}
}

impl fmt::Display for PatternWarning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PatternWarning::Matchless { pattern } => {
				write!(f, "Static include pattern did not match anything: {:?}", pattern)
			}
			PatternWarning::Redundant { pattern } => {
				write!(f, "Static include pattern is redundant: {:?}", pattern)
			}
		}
	}
}

/// Errors that abort pattern resolution
#[derive(Debug)]
pub enum ResolveError {
	/// The root directory is missing or not a directory
	RootNotFound(PathBuf),

	/// A pattern could not be compiled
	InvalidPattern { pattern: String, message: String },

	/// Walking the directory tree failed
	Walk(String),
}

impl fmt::Display for ResolveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResolveError::RootNotFound(path) => {
				write!(f, "Root directory does not exist: {}", path.display())
			}
			ResolveError::InvalidPattern { pattern, message } => {
				write!(f, "Invalid pattern {:?}: {}", pattern, message)
			}
			ResolveError::Walk(msg) => write!(f, "Directory walk failed: {}", msg),
		}
	}
}

impl std::error::Error for ResolveError {}

// vim: ts=4
