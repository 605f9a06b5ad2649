//! Static artifact packaging
//!
//! Turns a challenge's resolved static files into content-addressed upload
//! units. More than one file may be bundled into a single gzip-compressed tar
//! archive; the archive is built deterministically so that the same content
//! always hashes the same, whatever the mtimes and owners on the build host.

use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tar::{EntryType, Header, HeaderMode};

use crate::logging::*;
use crate::model::LocalChallenge;

/// Upper bound on individually uploaded files per challenge
pub const MAX_UNARCHIVED_FILES: usize = 25;

/// Prefix always tried when naming archive entries
pub const DEFAULT_STRIP_PREFIX: &str = "static/";

/// Lowercase hex SHA-256 of a payload
pub fn content_hash(payload: &[u8]) -> String {
	let mut h = Sha256::new();
	h.update(payload);
	hex::encode(h.finalize())
}

/// One file as it will be uploaded
#[derive(Clone, PartialEq, Eq)]
pub struct StaticArtifactUnit {
	pub filename: String,
	pub content_hash: String,
	pub payload: Vec<u8>,
}

impl StaticArtifactUnit {
	pub fn new(filename: impl Into<String>, payload: Vec<u8>) -> Self {
		let content_hash = content_hash(&payload);
		Self { filename: filename.into(), content_hash, payload }
	}

	/// Identity used when comparing against remote files
	pub fn key(&self) -> (&str, &str) {
		(&self.filename, &self.content_hash)
	}
}

impl fmt::Debug for StaticArtifactUnit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StaticArtifactUnit")
			.field("filename", &self.filename)
			.field("content_hash", &self.content_hash)
			.field("size", &self.payload.len())
			.finish()
	}
}

/// Units of one challenge, keyed by file name
pub type UnitMap = BTreeMap<String, StaticArtifactUnit>;

#[derive(Debug)]
pub enum PackagingError {
	/// A static file could not be read
	Read { path: PathBuf, source: io::Error },

	/// Archiving is off and there are too many files to upload one by one
	TooManyFiles { count: usize, max: usize },

	/// Two files would be uploaded (or archived) under the same name
	DuplicateName { name: String },

	/// A static file is not below the challenge directory
	OutsideChallenge { path: PathBuf },

	/// Building the archive failed
	Archive(io::Error),
}

impl fmt::Display for PackagingError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PackagingError::Read { path, source } => {
				write!(f, "Failed to read {}: {}", path.display(), source)
			}
			PackagingError::TooManyFiles { count, max } => write!(
				f,
				"{} static files matched but at most {} may be uploaded without archiving",
				count, max
			),
			PackagingError::DuplicateName { name } => {
				write!(f, "More than one static file would be named {:?}", name)
			}
			PackagingError::OutsideChallenge { path } => {
				write!(f, "Static file is outside the challenge directory: {}", path.display())
			}
			PackagingError::Archive(e) => write!(f, "Failed to build archive: {}", e),
		}
	}
}

impl std::error::Error for PackagingError {}

/// Name for a relative path with the prefix that leaves the shortest remainder removed.
///
/// Candidates are the configured prefixes plus [`DEFAULT_STRIP_PREFIX`]. A prefix
/// only applies on a path component boundary and never strips the whole path.
pub fn strip_prefix(rel_path: &str, prefixes: &[String]) -> String {
	let mut best = rel_path;
	for prefix in prefixes.iter().map(String::as_str).chain(std::iter::once(DEFAULT_STRIP_PREFIX)) {
		let prefix = prefix.trim_end_matches('/');
		if prefix.is_empty() {
			continue;
		}
		let stripped = match rel_path.strip_prefix(prefix).and_then(|rest| rest.strip_prefix('/')) {
			Some(rest) if !rest.is_empty() => rest,
			_ => continue,
		};
		if stripped.len() < best.len() {
			best = stripped;
		}
	}
	best.to_string()
}

/// Relative path with '/' separators
fn relative_name(root: &Path, path: &Path) -> Result<String, PackagingError> {
	let rel = path
		.strip_prefix(root)
		.map_err(|_| PackagingError::OutsideChallenge { path: path.to_path_buf() })?;
	let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
	Ok(parts.join("/"))
}

fn read(path: &Path) -> Result<Vec<u8>, PackagingError> {
	std::fs::read(path).map_err(|source| PackagingError::Read { path: path.to_path_buf(), source })
}

/// Build a gzip-compressed tar archive from `(name, payload)` pairs.
///
/// Entries are written in the given order with zeroed ownership and
/// timestamps and a fixed mode; the gzip header carries no name and mtime 0.
pub fn build_archive(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, io::Error> {
	let encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
	let mut builder = tar::Builder::new(encoder);
	builder.mode(HeaderMode::Deterministic);

	for (name, payload) in entries {
		let mut header = Header::new_gnu();
		header.set_entry_type(EntryType::Regular);
		header.set_size(payload.len() as u64);
		header.set_mode(0o644);
		header.set_mtime(0);
		header.set_uid(0);
		header.set_gid(0);
		header.set_username("")?;
		header.set_groupname("")?;
		builder.append_data(&mut header, name, payload.as_slice())?;
	}

	let encoder = builder.into_inner()?;
	encoder.finish()
}

/// How a challenge's static files map onto upload units
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
	/// Each file uploaded under its own name
	Files(Vec<(String, PathBuf)>),

	/// All files bundled into one archive; entries sorted by relative path
	Archive { name: String, entries: Vec<(String, PathBuf)> },
}

impl Layout {
	/// Names of the units that will be uploaded
	pub fn unit_names(&self) -> Vec<&str> {
		match self {
			Layout::Files(files) => files.iter().map(|(name, _)| name.as_str()).collect(),
			Layout::Archive { name, .. } => vec![name.as_str()],
		}
	}
}

/// Decide unit and entry names without reading any file content
pub fn layout(challenge: &LocalChallenge) -> Result<Layout, PackagingError> {
	let files = &challenge.static_files;

	// a single file is never archived
	if files.len() > 1 && challenge.archive_enabled() {
		let mut sorted: Vec<(String, &PathBuf)> = files
			.iter()
			.map(|p| relative_name(&challenge.path, p).map(|rel| (rel, p)))
			.collect::<Result<_, _>>()?;
		sorted.sort();

		let mut seen = HashSet::new();
		let mut entries = Vec::with_capacity(sorted.len());
		for (rel, path) in sorted {
			let name = strip_prefix(&rel, challenge.strip_prefixes());
			if !seen.insert(name.clone()) {
				return Err(PackagingError::DuplicateName { name });
			}
			entries.push((name, path.clone()));
		}
		return Ok(Layout::Archive { name: format!("{}.tar.gz", challenge.slug()), entries });
	}

	if files.len() > MAX_UNARCHIVED_FILES {
		return Err(PackagingError::TooManyFiles { count: files.len(), max: MAX_UNARCHIVED_FILES });
	}

	let mut seen = HashSet::new();
	let mut named = Vec::with_capacity(files.len());
	for path in files {
		let name = file_name(path)?;
		if !seen.insert(name.clone()) {
			return Err(PackagingError::DuplicateName { name });
		}
		named.push((name, path.clone()));
	}
	Ok(Layout::Files(named))
}

/// Package one challenge's resolved static files
pub fn package(challenge: &LocalChallenge) -> Result<UnitMap, PackagingError> {
	let mut units = UnitMap::new();
	match layout(challenge)? {
		Layout::Files(files) => {
			for (name, path) in files {
				units.insert(name.clone(), StaticArtifactUnit::new(name, read(&path)?));
			}
		}
		Layout::Archive { name, entries } => {
			let contents = entries
				.into_iter()
				.map(|(entry, path)| read(&path).map(|payload| (entry, payload)))
				.collect::<Result<Vec<_>, _>>()?;
			let archive = build_archive(&contents).map_err(PackagingError::Archive)?;
			debug!("Archived {} files into {} ({} bytes)", contents.len(), name, archive.len());
			units.insert(name.clone(), StaticArtifactUnit::new(name, archive));
		}
	}
	Ok(units)
}

fn file_name(path: &Path) -> Result<String, PackagingError> {
	path.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.ok_or_else(|| PackagingError::OutsideChallenge { path: path.to_path_buf() })
}

/// Lazily packages challenges and keeps the result for the rest of the run.
///
/// Payloads can be large, so callers that learn a challenge needs no upload
/// should [`evict`](ArtifactPackager::evict) it. Packaging again later gives
/// the same units.
#[derive(Default)]
pub struct ArtifactPackager {
	cache: Mutex<HashMap<String, Arc<UnitMap>>>,
}

impl ArtifactPackager {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<UnitMap>>> {
		match self.cache.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	/// Units for a challenge, packaging it on first use
	pub fn units(&self, challenge: &LocalChallenge) -> Result<Arc<UnitMap>, PackagingError> {
		if let Some(units) = self.lock().get(challenge.slug()) {
			return Ok(Arc::clone(units));
		}

		let units = Arc::new(package(challenge)?);
		debug!("Packaged {} into {} units", challenge.slug(), units.len());
		self.lock().insert(challenge.slug().to_string(), Arc::clone(&units));
		Ok(units)
	}

	/// Drop the cached units of a challenge. Returns whether anything was cached.
	pub fn evict(&self, slug: &str) -> bool {
		self.lock().remove(slug).is_some()
	}

	pub fn is_cached(&self, slug: &str) -> bool {
		self.lock().contains_key(slug)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn prefixes(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn test_content_hash() {
		assert_eq!(
			content_hash(b""),
			"e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
		);
		assert_eq!(
			content_hash(b"abc"),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
	}

	#[test]
	fn test_strip_default_prefix() {
		assert_eq!(strip_prefix("static/a.txt", &[]), "a.txt");
		assert_eq!(strip_prefix("other/a.txt", &[]), "other/a.txt");
	}

	#[test]
	fn test_strip_shortest_wins() {
		let p = prefixes(&["static/files", "static/files/deep/"]);
		assert_eq!(strip_prefix("static/files/deep/x.bin", &p), "x.bin");
		assert_eq!(strip_prefix("static/files/y.bin", &p), "y.bin");
		assert_eq!(strip_prefix("static/z.bin", &p), "z.bin");
	}

	#[test]
	fn test_strip_respects_component_boundary() {
		let p = prefixes(&["src"]);
		assert_eq!(strip_prefix("srcfile.c", &p), "srcfile.c");
		assert_eq!(strip_prefix("src/file.c", &p), "file.c");
	}

	#[test]
	fn test_strip_never_empties_name() {
		assert_eq!(strip_prefix("static", &prefixes(&["static"])), "static");
	}

	#[test]
	fn test_archive_is_deterministic() {
		let entries = vec![("a.txt".to_string(), b"alpha".to_vec()), ("b/c.txt".to_string(), b"gamma".to_vec())];
		let one = build_archive(&entries).unwrap();
		let two = build_archive(&entries).unwrap();
		assert_eq!(one, two);
		// gzip magic
		assert_eq!(&one[..2], &[0x1f, 0x8b]);
	}

	#[test]
	fn test_unit_debug_hides_payload() {
		let unit = StaticArtifactUnit::new("a.txt", vec![0u8; 4]);
		let dbg = format!("{:?}", unit);
		assert!(dbg.contains("size: 4"));
		assert!(!dbg.contains("payload"));
	}
}

// vim: ts=4
