//! Validation issues raised while loading a challenge repository
//!
//! Every problem found in local sources is recorded in a [`ValidationBook`]
//! with a severity, the challenge it belongs to (or none for the repository
//! itself), the file it came from, a short kebab-case code and a message.
//! Recording an issue also logs it.
//!
//! A fatal issue aborts the current unit of validation: recording one returns
//! `Err(ValidationFailed)` so callers can bail out with `?`.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::logging::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Notice,
	Warning,
	Error,
	Fatal,
}

impl Severity {
	pub const ALL: [Severity; 4] = [Severity::Fatal, Severity::Error, Severity::Warning, Severity::Notice];

	pub fn as_str(&self) -> &'static str {
		match self {
			Severity::Notice => "notice",
			Severity::Warning => "warning",
			Severity::Error => "error",
			Severity::Fatal => "fatal",
		}
	}
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
	pub severity: Severity,

	/// `None` for issues with the repository itself
	pub challenge: Option<String>,

	/// File or directory the issue was found in
	pub source: PathBuf,

	pub code: &'static str,
	pub message: String,
}

impl fmt::Display for Issue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let target = match &self.challenge {
			Some(id) => format!("challenge {}", id),
			None => "challenge repository".to_string(),
		};
		write!(
			f,
			"Validation {} from {} [{}] ({}): {}",
			self.severity,
			target,
			self.source.display(),
			self.code,
			self.message
		)
	}
}

/// Validation of a unit (repository or challenge) did not succeed; the
/// reasons are in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationFailed;

impl fmt::Display for ValidationFailed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Validation failed")
	}
}

impl Error for ValidationFailed {}

/// Issue counts of one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeIssues {
	pub challenge: String,
	pub max_severity: Severity,
	pub counts: BTreeMap<Severity, usize>,
}

impl ChallengeIssues {
	pub fn total(&self) -> usize {
		self.counts.values().sum()
	}
}

/// Records validation issues
#[derive(Debug, Default)]
pub struct ValidationBook {
	issues: Vec<Issue>,
}

impl ValidationBook {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record an issue. Fails for fatal issues.
	pub fn issue(
		&mut self,
		severity: Severity,
		challenge: Option<&str>,
		source: &Path,
		code: &'static str,
		message: impl Into<String>,
	) -> Result<(), ValidationFailed> {
		let issue = Issue {
			severity,
			challenge: challenge.map(str::to_string),
			source: source.to_path_buf(),
			code,
			message: message.into(),
		};

		let target = issue.challenge.as_deref().unwrap_or("-");
		match severity {
			Severity::Notice => info!(challenge = target, code, "{}", issue.message),
			Severity::Warning => warn!(challenge = target, code, "{}", issue.message),
			Severity::Error | Severity::Fatal => {
				error!(challenge = target, code, severity = severity.as_str(), "{}", issue.message)
			}
		}
		self.issues.push(issue);

		if severity == Severity::Fatal {
			Err(ValidationFailed)
		} else {
			Ok(())
		}
	}

	/// Pen that fills in challenge and source
	pub fn bind(&mut self, challenge: Option<&str>, source: &Path) -> Pen<'_> {
		Pen { book: self, challenge: challenge.map(str::to_string), source: source.to_path_buf() }
	}

	pub fn issues(&self) -> &[Issue] {
		&self.issues
	}

	/// Issues of one challenge, or of the repository for `None`
	pub fn issues_for(&self, challenge: Option<&str>) -> impl Iterator<Item = &Issue> + '_ {
		let challenge = challenge.map(str::to_string);
		self.issues.iter().filter(move |i| i.challenge == challenge)
	}

	pub fn max_severity(&self, challenge: Option<&str>) -> Option<Severity> {
		self.issues_for(challenge).map(|i| i.severity).max()
	}

	/// Whether anything at error level or worse was recorded
	pub fn has_errors(&self) -> bool {
		self.issues.iter().any(|i| i.severity >= Severity::Error)
	}

	pub fn is_empty(&self) -> bool {
		self.issues.is_empty()
	}

	/// Per-challenge counts, worst challenges first, then by id
	pub fn challenge_summary(&self) -> Vec<ChallengeIssues> {
		let mut by_challenge: BTreeMap<&str, BTreeMap<Severity, usize>> = BTreeMap::new();
		for issue in &self.issues {
			if let Some(id) = &issue.challenge {
				*by_challenge.entry(id).or_default().entry(issue.severity).or_default() += 1;
			}
		}

		let mut summary: Vec<ChallengeIssues> = by_challenge
			.into_iter()
			.filter_map(|(id, counts)| {
				let max_severity = *counts.keys().next_back()?;
				Some(ChallengeIssues { challenge: id.to_string(), max_severity, counts })
			})
			.collect();
		summary.sort_by(|a, b| b.max_severity.cmp(&a.max_severity).then_with(|| a.challenge.cmp(&b.challenge)));
		summary
	}
}

/// Records issues for one challenge and source
pub struct Pen<'a> {
	book: &'a mut ValidationBook,
	challenge: Option<String>,
	source: PathBuf,
}

impl Pen<'_> {
	pub fn issue(
		&mut self,
		severity: Severity,
		code: &'static str,
		message: impl Into<String>,
	) -> Result<(), ValidationFailed> {
		self.book.issue(severity, self.challenge.as_deref(), &self.source, code, message)
	}

	pub fn warn(&mut self, code: &'static str, message: impl Into<String>) {
		// warnings never fail
		let _ = self.issue(Severity::Warning, code, message);
	}

	pub fn error(&mut self, code: &'static str, message: impl Into<String>) {
		let _ = self.issue(Severity::Error, code, message);
	}

	pub fn fatal(&mut self, code: &'static str, message: impl Into<String>) -> ValidationFailed {
		let _ = self.issue(Severity::Fatal, code, message);
		ValidationFailed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_severity_order() {
		assert!(Severity::Notice < Severity::Warning);
		assert!(Severity::Error < Severity::Fatal);
	}

	#[test]
	fn test_fatal_fails() {
		let mut book = ValidationBook::new();
		let p = Path::new("repo.toml");
		assert!(book.issue(Severity::Warning, None, p, "w", "warn").is_ok());
		assert_eq!(book.issue(Severity::Fatal, None, p, "f", "fatal"), Err(ValidationFailed));
		assert_eq!(book.issues().len(), 2);
		assert!(book.has_errors());
	}

	#[test]
	fn test_pen_binds_context() {
		let mut book = ValidationBook::new();
		{
			let mut pen = book.bind(Some("web-01"), Path::new("web-01/challenge.toml"));
			pen.warn("challenge-config-missing-name", "no name");
			pen.error("challenge-config-id-mismatch", "bad id");
		}
		assert_eq!(book.max_severity(Some("web-01")), Some(Severity::Error));
		assert_eq!(book.max_severity(None), None);
		assert_eq!(book.issues_for(Some("web-01")).count(), 2);
		assert!(book.issues()[0].to_string().contains("challenge web-01"));
	}

	#[test]
	fn test_summary_sorted_by_severity_then_id() {
		let mut book = ValidationBook::new();
		let p = Path::new("x");
		let _ = book.issue(Severity::Warning, Some("b-chal"), p, "w", "");
		let _ = book.issue(Severity::Warning, Some("a-chal"), p, "w", "");
		let _ = book.issue(Severity::Warning, Some("a-chal"), p, "w", "");
		let _ = book.issue(Severity::Error, Some("c-chal"), p, "e", "");
		let _ = book.issue(Severity::Error, None, p, "e", "");

		let summary = book.challenge_summary();
		let order: Vec<&str> = summary.iter().map(|s| s.challenge.as_str()).collect();
		assert_eq!(order, vec!["c-chal", "a-chal", "b-chal"]);
		assert_eq!(summary[1].total(), 2);
		assert_eq!(summary[1].counts[&Severity::Warning], 2);
	}
}

// vim: ts=4
