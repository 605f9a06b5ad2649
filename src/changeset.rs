//! Per-challenge differences between local intent and remote state

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cache::{RemoteSnapshot, RemoteStateCache};
use crate::logging::*;
use crate::model::LocalChallenge;
use crate::packaging::{ArtifactPackager, PackagingError, UnitMap};
use crate::remote::{RemoteError, RemoteFile};

/// A field or sub-resource that can differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
	Name,
	Description,
	Category,
	Score,
	Tags,
	Hints,
	Flags,
	Files,
}

impl Field {
	pub const ALL: [Field; 8] = [
		Field::Name,
		Field::Description,
		Field::Category,
		Field::Score,
		Field::Tags,
		Field::Hints,
		Field::Flags,
		Field::Files,
	];

	fn bit(self) -> u8 {
		1 << (self as u8)
	}

	/// Fields stored on the base challenge record
	pub fn is_scalar(self) -> bool {
		matches!(self, Field::Name | Field::Description | Field::Category | Field::Score)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Field::Name => "name",
			Field::Description => "description",
			Field::Category => "category",
			Field::Score => "score",
			Field::Tags => "tags",
			Field::Hints => "hints",
			Field::Flags => "flags",
			Field::Files => "files",
		}
	}
}

/// Set of changed fields
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FieldSet(u8);

impl FieldSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, field: Field) {
		self.0 |= field.bit();
	}

	pub fn with(mut self, field: Field) -> Self {
		self.insert(field);
		self
	}

	pub fn contains(&self, field: Field) -> bool {
		self.0 & field.bit() != 0
	}

	pub fn is_empty(&self) -> bool {
		self.0 == 0
	}

	pub fn len(&self) -> usize {
		self.0.count_ones() as usize
	}

	/// Whether the base record needs an update
	pub fn has_scalar(&self) -> bool {
		self.iter().any(Field::is_scalar)
	}

	pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
		Field::ALL.into_iter().filter(move |f| self.contains(*f))
	}
}

impl FromIterator<Field> for FieldSet {
	fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
		let mut set = FieldSet::new();
		for field in iter {
			set.insert(field);
		}
		set
	}
}

impl fmt::Debug for FieldSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.iter()).finish()
	}
}

impl fmt::Display for FieldSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let names: Vec<&str> = self.iter().map(Field::as_str).collect();
		f.write_str(&names.join(", "))
	}
}

/// What has to happen to one challenge. An empty update is never built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSet {
	/// Challenge does not exist remotely; create it with everything
	Create,

	/// Challenge exists; these fields differ
	Update(FieldSet),
}

impl ChangeSet {
	/// Whether the apply step for `field` has to run
	pub fn needs(&self, field: Field) -> bool {
		match self {
			ChangeSet::Create => true,
			ChangeSet::Update(fields) => fields.contains(field),
		}
	}

	pub fn is_create(&self) -> bool {
		matches!(self, ChangeSet::Create)
	}
}

impl fmt::Display for ChangeSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ChangeSet::Create => f.write_str("create"),
			ChangeSet::Update(fields) => write!(f, "update {}", fields),
		}
	}
}

/// Challenges needing changes, keyed by slug
pub type ChangePlan = BTreeMap<String, ChangeSet>;

/// Ordered sequences are equal only with equal values at each position
fn sequence_differs<'a, I>(local: &[String], remote: I) -> bool
where
	I: ExactSizeIterator<Item = &'a str>,
{
	local.len() != remote.len() || local.iter().map(String::as_str).zip(remote).any(|(l, r)| l != r)
}

/// Files are compared as an unordered set of `(filename, content hash)`
pub fn files_equal(units: &UnitMap, remote: &[RemoteFile]) -> bool {
	let local: BTreeSet<(&str, &str)> = units.values().map(|u| u.key()).collect();
	let remote: BTreeSet<(&str, &str)> = remote.iter().map(RemoteFile::key).collect();
	local == remote
}

/// Compare one challenge against its remote snapshot.
///
/// Returns `None` when nothing differs.
pub fn diff_challenge(
	local: &LocalChallenge,
	remote: Option<&RemoteSnapshot>,
	units: &UnitMap,
) -> Option<ChangeSet> {
	let remote = match remote {
		Some(remote) => remote,
		None => return Some(ChangeSet::Create),
	};

	let mut fields = FieldSet::new();
	let base = &remote.challenge;
	if local.name != base.name {
		fields.insert(Field::Name);
	}
	if local.description.as_deref().unwrap_or("") != base.description {
		fields.insert(Field::Description);
	}
	if local.category != base.category {
		fields.insert(Field::Category);
	}
	if local.score != base.score {
		fields.insert(Field::Score);
	}
	if sequence_differs(&local.tags, remote.tags.iter().map(|t| t.value.as_str())) {
		fields.insert(Field::Tags);
	}
	if sequence_differs(&local.hints, remote.hints.iter().map(|h| h.content.as_str())) {
		fields.insert(Field::Hints);
	}
	if sequence_differs(&local.flags, remote.flags.iter().map(|f| f.content.as_str())) {
		fields.insert(Field::Flags);
	}
	if !files_equal(units, &remote.files) {
		fields.insert(Field::Files);
	}

	if fields.is_empty() {
		None
	} else {
		Some(ChangeSet::Update(fields))
	}
}

#[derive(Debug)]
pub enum PlanError {
	Remote { slug: String, source: RemoteError },
	Packaging { slug: String, source: PackagingError },
}

impl fmt::Display for PlanError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PlanError::Remote { slug, source } => write!(f, "{}: {}", slug, source),
			PlanError::Packaging { slug, source } => write!(f, "{}: {}", slug, source),
		}
	}
}

impl std::error::Error for PlanError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			PlanError::Remote { source, .. } => Some(source),
			PlanError::Packaging { source, .. } => Some(source),
		}
	}
}

impl PlanError {
	/// Challenge the change set was computed for
	pub fn slug(&self) -> &str {
		match self {
			PlanError::Remote { slug, .. } | PlanError::Packaging { slug, .. } => slug,
		}
	}

	pub fn is_global(&self) -> bool {
		matches!(self, PlanError::Remote { source, .. } if source.is_global())
	}
}

/// Computes change sets from cached remote state and packaged artifacts
pub struct ChangeSetComputer<'a> {
	cache: &'a RemoteStateCache,
	packager: &'a ArtifactPackager,
}

impl<'a> ChangeSetComputer<'a> {
	pub fn new(cache: &'a RemoteStateCache, packager: &'a ArtifactPackager) -> Self {
		Self { cache, packager }
	}

	/// Change set of one challenge. Payloads are evicted from the packager
	/// when no upload will be needed.
	pub async fn compute(&self, challenge: &LocalChallenge) -> Result<Option<ChangeSet>, PlanError> {
		let slug = challenge.slug();
		let snapshot = self
			.cache
			.snapshot(challenge.numeric_id())
			.await
			.map_err(|source| PlanError::Remote { slug: slug.to_string(), source })?;

		// nothing to compare files against; they are packaged again on upload
		let snapshot = match snapshot {
			Some(snapshot) => snapshot,
			None => return Ok(Some(ChangeSet::Create)),
		};

		let units = self
			.packager
			.units(challenge)
			.map_err(|source| PlanError::Packaging { slug: slug.to_string(), source })?;
		let changes = diff_challenge(challenge, Some(&snapshot), &units);

		if !changes.is_some_and(|c| c.needs(Field::Files)) {
			self.packager.evict(slug);
		}
		debug!(challenge = slug, ?changes, "computed change set");
		Ok(changes)
	}

	/// Change sets of all challenges that differ, plus the challenges whose
	/// change set could not be computed. One failure does not stop the others.
	pub async fn compute_all(&self, challenges: &[LocalChallenge]) -> (ChangePlan, Vec<PlanError>) {
		let mut plan = ChangePlan::new();
		let mut failures = Vec::new();
		for challenge in challenges {
			match self.compute(challenge).await {
				Ok(Some(changes)) => {
					plan.insert(challenge.slug().to_string(), changes);
				}
				Ok(None) => {}
				Err(e) => {
					warn!(challenge = challenge.slug(), "Cannot plan changes: {}", e);
					failures.push(e);
				}
			}
		}
		(plan, failures)
	}
}


// vim: ts=4
