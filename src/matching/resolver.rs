//! Include/exclude resolution against a directory tree

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use super::{PatternWarning, ResolveError};
use crate::logging::*;

/// Outcome of a resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
	/// Matched files, absolute and sorted. Never contains directories.
	pub files: Vec<PathBuf>,

	/// Advisory warnings about the include patterns
	pub warnings: Vec<PatternWarning>,
}

/// Snapshot of the tree below the root: relative path -> is directory
type Tree = BTreeMap<PathBuf, bool>;

/// Resolves static include/exclude patterns below a root directory.
///
/// Include patterns are globs matched against every path below the root
/// (`**` crosses directories, `*` does not). Exclude patterns are literal
/// relative paths. A matched directory stands for every file below it, so an
/// exclude inside a matched directory splits that directory into its
/// children, level by level, until the excluded path itself can be dropped.
///
/// The result is computed once and memoized.
pub struct PatternResolver {
	root: PathBuf,
	include: Vec<String>,
	exclude: Vec<String>,
	resolved: Option<Resolution>,
}

impl PatternResolver {
	pub fn new(root: impl Into<PathBuf>, include: &[String], exclude: &[String]) -> Self {
		Self { root: root.into(), include: include.to_vec(), exclude: exclude.to_vec(), resolved: None }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Resolve the patterns, reusing the previous result if there is one
	pub fn resolve(&mut self) -> Result<&Resolution, ResolveError> {
		let resolution = match self.resolved.take() {
			Some(resolution) => resolution,
			None => self.resolve_uncached()?,
		};
		Ok(self.resolved.insert(resolution))
	}

	fn resolve_uncached(&self) -> Result<Resolution, ResolveError> {
		if !self.root.is_dir() {
			return Err(ResolveError::RootNotFound(self.root.clone()));
		}

		let tree = self.snapshot()?;
		let mut warnings = Vec::new();
		let mut results: BTreeSet<PathBuf> = BTreeSet::new();

		// include patterns
		for pattern in &self.include {
			let matcher = compile(pattern)?;
			let matches: Vec<&PathBuf> = tree.keys().filter(|p| matcher.is_match(p)).collect();

			if matches.is_empty() {
				warnings.push(PatternWarning::Matchless { pattern: pattern.clone() });
				continue;
			}

			let before = results.len();
			results.extend(matches.into_iter().cloned());
			if results.len() == before {
				warnings.push(PatternWarning::Redundant { pattern: pattern.clone() });
			}
		}

		// literal exclude patterns
		for pattern in &self.exclude {
			let literal = normalize(pattern);
			if literal.as_os_str().is_empty() || !tree.contains_key(&literal) {
				// not on disk
				continue;
			}

			// split matched ancestors into their children, top-down
			let mut ancestor = PathBuf::new();
			if let Some(parent) = literal.parent() {
				for component in parent.components() {
					ancestor.push(component);
					if results.remove(&ancestor) {
						results.extend(children(&tree, &ancestor));
					}
				}
			}

			results.remove(&literal);
		}

		// expand the remaining directories into their files
		let dirs: Vec<PathBuf> =
			results.iter().filter(|p| tree.get(*p).copied().unwrap_or(false)).cloned().collect();
		for dir in dirs {
			results.remove(&dir);
			results.extend(
				tree.iter()
					.filter(|(path, is_dir)| !**is_dir && path.starts_with(&dir))
					.map(|(path, _)| path.clone()),
			);
		}

		debug!(
			"Resolved {} static files below {} ({} warnings)",
			results.len(),
			self.root.display(),
			warnings.len()
		);

		let files = results.into_iter().map(|rel| self.root.join(rel)).collect();
		Ok(Resolution { files, warnings })
	}

	/// Walk the whole tree once; every pattern is evaluated against this snapshot.
	///
	/// Symbolic links are followed and recorded under their own path. A link
	/// back into one of its ancestors is left out.
	fn snapshot(&self) -> Result<Tree, ResolveError> {
		let mut tree = Tree::new();
		let walker = WalkBuilder::new(&self.root).standard_filters(false).follow_links(true).build();

		for entry in walker {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) if is_loop(&e) => {
					warn!("Skipping symbolic link loop below {}: {}", self.root.display(), e);
					continue;
				}
				Err(e) => return Err(ResolveError::Walk(e.to_string())),
			};
			if entry.depth() == 0 {
				continue;
			}
			let rel = match entry.path().strip_prefix(&self.root) {
				Ok(rel) => rel.to_path_buf(),
				Err(_) => continue,
			};
			tree.insert(rel, entry.path().is_dir());
		}

		Ok(tree)
	}
}

fn is_loop(err: &ignore::Error) -> bool {
	match err {
		ignore::Error::Loop { .. } => true,
		ignore::Error::WithPath { err, .. }
		| ignore::Error::WithDepth { err, .. }
		| ignore::Error::WithLineNumber { err, .. } => is_loop(err),
		_ => false,
	}
}

fn compile(pattern: &str) -> Result<GlobMatcher, ResolveError> {
	GlobBuilder::new(pattern)
		.literal_separator(true)
		.build()
		.map(|glob| glob.compile_matcher())
		.map_err(|e| ResolveError::InvalidPattern {
			pattern: pattern.to_string(),
			message: e.kind().to_string(),
		})
}

/// Keep only the normal components of a relative path ("./a//b" -> "a/b")
fn normalize(pattern: &str) -> PathBuf {
	Path::new(pattern)
		.components()
		.filter(|c| matches!(c, Component::Normal(_)))
		.collect()
}

fn children<'a>(tree: &'a Tree, dir: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
	tree.keys().filter(move |p| p.parent() == Some(dir)).cloned()
}


// vim: ts=4
