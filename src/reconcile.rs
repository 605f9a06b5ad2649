//! Reconciliation engine
//!
//! Three phases over a set of validated challenges:
//!
//! 1. **discover**: read remote state through the cache, at most
//!    `read_concurrency` challenges at a time
//! 2. **plan**: compute a [`ChangeSet`] per challenge
//! 3. **apply**: write the changes, at most `write_concurrency` challenges at a
//!    time. A challenge holds its permit for its whole apply sequence.
//!
//! Within one challenge the apply order is fixed: base record, tags, hints,
//! flags, files. Sub-resources are replaced by deleting the existing items
//! concurrently and then creating the new ones one by one, in order. Files are
//! only uploaded or deleted where the `(name, hash)` sets differ.
//!
//! A failing challenge stops at the failing step. Other challenges carry on
//! unless the failure is global (rejected credentials) or an invariant was
//! broken, in which case challenges that have not started are skipped.

use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::cache::{CacheKind, RemoteStateCache};
use crate::changeset::{ChangePlan, ChangeSet, ChangeSetComputer, Field, PlanError};
use crate::logging::*;
use crate::model::LocalChallenge;
use crate::packaging::{ArtifactPackager, PackagingError};
use crate::remote::{ChallengeState, RemoteApi, RemoteChallenge, RemoteError, RemoteFile, RemoteResult};

/// Default number of challenges read concurrently
pub const DEFAULT_READ_CONCURRENCY: usize = 5;

/// Default number of challenges written concurrently
pub const DEFAULT_WRITE_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
	pub read_concurrency: usize,
	pub write_concurrency: usize,
}

impl Default for ReconcileOptions {
	fn default() -> Self {
		Self { read_concurrency: DEFAULT_READ_CONCURRENCY, write_concurrency: DEFAULT_WRITE_CONCURRENCY }
	}
}

#[derive(Debug)]
pub enum ReconcileError {
	/// A remote call failed
	Remote(RemoteError),

	/// Static artifacts could not be packaged
	Packaging(PackagingError),

	/// Remote state contradicts what was observed earlier in the run
	Invariant(String),

	/// Discovery could not read the remote state of some challenges
	Discovery { failures: Vec<(String, RemoteError)> },

	/// Change sets of some challenges could not be computed
	Planning { failures: Vec<PlanError> },

	/// The run was stopped before this challenge started
	Stopped,
}

impl ReconcileError {
	/// Whether the whole run has to stop
	pub fn is_global(&self) -> bool {
		match self {
			ReconcileError::Remote(e) => e.is_global(),
			ReconcileError::Invariant(_) => true,
			_ => false,
		}
	}
}

impl fmt::Display for ReconcileError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReconcileError::Remote(e) => write!(f, "{}", e),
			ReconcileError::Packaging(e) => write!(f, "{}", e),
			ReconcileError::Invariant(msg) => write!(f, "Inconsistent remote state: {}", msg),
			ReconcileError::Discovery { failures } => {
				write!(f, "Failed to read remote state of {} challenge(s)", failures.len())?;
				for (slug, e) in failures {
					write!(f, "\n  {}: {}", slug, e)?;
				}
				Ok(())
			}
			ReconcileError::Planning { failures } => {
				write!(f, "Failed to plan changes of {} challenge(s)", failures.len())?;
				for e in failures {
					write!(f, "\n  {}", e)?;
				}
				Ok(())
			}
			ReconcileError::Stopped => write!(f, "Stopped before it started"),
		}
	}
}

impl std::error::Error for ReconcileError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			ReconcileError::Remote(e) => Some(e),
			ReconcileError::Packaging(e) => Some(e),
			_ => None,
		}
	}
}

impl From<RemoteError> for ReconcileError {
	fn from(e: RemoteError) -> Self {
		ReconcileError::Remote(e)
	}
}

impl From<PackagingError> for ReconcileError {
	fn from(e: PackagingError) -> Self {
		ReconcileError::Packaging(e)
	}
}

impl From<PlanError> for ReconcileError {
	fn from(e: PlanError) -> Self {
		match e {
			PlanError::Remote { source, .. } => ReconcileError::Remote(source),
			PlanError::Packaging { source, .. } => ReconcileError::Packaging(source),
		}
	}
}

/// Result of applying one challenge's changes
#[derive(Debug)]
pub enum Outcome {
	Applied,
	Failed(ReconcileError),
	Skipped,
}

/// Outcomes of an apply run, keyed by slug
#[derive(Debug, Default)]
pub struct ApplyReport {
	pub outcomes: BTreeMap<String, Outcome>,
}

impl ApplyReport {
	pub fn applied(&self) -> impl Iterator<Item = &str> {
		self.outcomes.iter().filter(|(_, o)| matches!(o, Outcome::Applied)).map(|(s, _)| s.as_str())
	}

	pub fn failed(&self) -> impl Iterator<Item = (&str, &ReconcileError)> {
		self.outcomes.iter().filter_map(|(s, o)| match o {
			Outcome::Failed(e) => Some((s.as_str(), e)),
			_ => None,
		})
	}

	pub fn skipped(&self) -> impl Iterator<Item = &str> {
		self.outcomes.iter().filter(|(_, o)| matches!(o, Outcome::Skipped)).map(|(s, _)| s.as_str())
	}

	/// Every planned challenge was applied
	pub fn is_success(&self) -> bool {
		self.outcomes.values().all(|o| matches!(o, Outcome::Applied))
	}
}

/// Shared flag asking the engine not to start any more challenges
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn stop(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_stopped(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Await every future, then return the first error if any
async fn all_ok<F>(futures: impl IntoIterator<Item = F>) -> RemoteResult<()>
where
	F: Future<Output = RemoteResult<()>>,
{
	join_all(futures).await.into_iter().collect()
}

/// Drives one reconciliation run against a remote
pub struct Reconciler {
	remote: Arc<dyn RemoteApi>,
	cache: RemoteStateCache,
	packager: ArtifactPackager,
	options: ReconcileOptions,
	stop: StopFlag,
}

impl Reconciler {
	pub fn new(remote: Arc<dyn RemoteApi>, options: ReconcileOptions) -> Self {
		Self {
			cache: RemoteStateCache::new(Arc::clone(&remote)),
			remote,
			packager: ArtifactPackager::new(),
			options,
			stop: StopFlag::new(),
		}
	}

	pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
		self.stop = stop;
		self
	}

	pub fn stop_flag(&self) -> StopFlag {
		self.stop.clone()
	}

	pub fn cache(&self) -> &RemoteStateCache {
		&self.cache
	}

	pub fn packager(&self) -> &ArtifactPackager {
		&self.packager
	}

	/// Read the remote state of every challenge into the cache
	pub async fn discover(&self, challenges: &[LocalChallenge]) -> Result<(), ReconcileError> {
		let permits = Semaphore::new(self.options.read_concurrency.max(1));
		info!("Reading remote state of {} challenges", challenges.len());

		let permits = &permits;
		let reads = challenges.iter().map(|challenge| async move {
			let _permit = permits.acquire().await.map_err(|_| RemoteError::Transport {
				message: "read pool closed".to_string(),
			})?;
			if self.stop.is_stopped() {
				return Ok(());
			}
			let result = self.cache.snapshot(challenge.numeric_id()).await;
			match &result {
				Ok(Some(_)) => debug!(challenge = challenge.slug(), "exists remotely"),
				Ok(None) => debug!(challenge = challenge.slug(), "does not exist remotely"),
				Err(e) if e.is_global() => self.stop.stop(),
				Err(_) => {}
			}
			result.map(|_| ())
		});
		let results = join_all(reads).await;

		let failures: Vec<(String, RemoteError)> = challenges
			.iter()
			.zip(results)
			.filter_map(|(c, r)| r.err().map(|e| (c.slug().to_string(), e)))
			.collect();

		if let Some((_, e)) = failures.iter().find(|(_, e)| e.is_global()) {
			return Err(ReconcileError::Remote(e.clone()));
		}
		if !failures.is_empty() {
			return Err(ReconcileError::Discovery { failures });
		}
		if self.stop.is_stopped() {
			return Err(ReconcileError::Stopped);
		}
		Ok(())
	}

	/// Change sets of all challenges that differ from the remote.
	///
	/// Every challenge is planned even when some fail; the failures are then
	/// returned together and nothing should be applied.
	pub async fn plan(&self, challenges: &[LocalChallenge]) -> Result<ChangePlan, ReconcileError> {
		let (plan, mut failures) = ChangeSetComputer::new(&self.cache, &self.packager).compute_all(challenges).await;
		info!("{} of {} challenges need changes", plan.len(), challenges.len());

		if let Some(pos) = failures.iter().position(PlanError::is_global) {
			return Err(failures.swap_remove(pos).into());
		}
		if !failures.is_empty() {
			return Err(ReconcileError::Planning { failures });
		}
		Ok(plan)
	}

	/// Apply a plan. Challenges not in the plan are left alone.
	pub async fn apply(&self, challenges: &[LocalChallenge], plan: &ChangePlan) -> ApplyReport {
		let permits = Semaphore::new(self.options.write_concurrency.max(1));
		let planned: Vec<(&LocalChallenge, ChangeSet)> = challenges
			.iter()
			.filter_map(|c| plan.get(c.slug()).map(|changes| (c, *changes)))
			.collect();

		let runs = planned.iter().map(|(challenge, changes)| {
			let permits = &permits;
			async move {
				// held until every step of this challenge is done
				let _permit = match permits.acquire().await {
					Ok(permit) => permit,
					Err(_) => return Outcome::Failed(ReconcileError::Stopped),
				};
				if self.stop.is_stopped() {
					info!(challenge = challenge.slug(), "Skipped");
					return Outcome::Skipped;
				}

				match self.apply_challenge(challenge, *changes).await {
					Ok(()) => {
						info!(challenge = challenge.slug(), "Applied {}", changes);
						Outcome::Applied
					}
					Err(e) => {
						error!(challenge = challenge.slug(), "Failed: {}", e);
						if e.is_global() {
							warn!("Stopping: no further challenges will be started");
							self.stop.stop();
						}
						Outcome::Failed(e)
					}
				}
			}
		});
		let outcomes = join_all(runs).await;

		let mut report = ApplyReport::default();
		for ((challenge, _), outcome) in planned.iter().zip(outcomes) {
			report.outcomes.insert(challenge.slug().to_string(), outcome);
		}
		report
	}

	/// Discover, plan and apply in one go
	pub async fn reconcile(&self, challenges: &[LocalChallenge]) -> Result<ApplyReport, ReconcileError> {
		self.discover(challenges).await?;
		let plan = self.plan(challenges).await?;
		Ok(self.apply(challenges, &plan).await)
	}

	async fn apply_challenge(&self, challenge: &LocalChallenge, changes: ChangeSet) -> Result<(), ReconcileError> {
		let id = challenge.numeric_id();

		match changes {
			ChangeSet::Create => {
				debug!(challenge = challenge.slug(), id, "creating");
				self.cache.invalidate(CacheKind::Challenge, id);
				let record = RemoteChallenge::from_local(challenge, ChallengeState::Hidden);
				self.remote.create_challenge(&record).await?;
			}
			ChangeSet::Update(fields) if fields.has_scalar() => {
				let existing = self.cache.challenge(id).await?.ok_or_else(|| {
					ReconcileError::Invariant(format!("{} was planned as an update but does not exist", challenge.slug()))
				})?;
				debug!(challenge = challenge.slug(), id, %fields, "updating");
				self.cache.invalidate(CacheKind::Challenge, id);
				// visibility is not ours to change
				let record = RemoteChallenge::from_local(challenge, existing.state);
				self.remote.update_challenge(&record).await?;
			}
			ChangeSet::Update(_) => {}
		}

		if changes.needs(Field::Tags) {
			self.replace_tags(challenge).await?;
		}
		if changes.needs(Field::Hints) {
			self.replace_hints(challenge).await?;
		}
		if changes.needs(Field::Flags) {
			self.replace_flags(challenge).await?;
		}
		if changes.needs(Field::Files) {
			self.sync_files(challenge).await?;
		}
		Ok(())
	}

	async fn replace_tags(&self, challenge: &LocalChallenge) -> RemoteResult<()> {
		let id = challenge.numeric_id();
		let existing = self.cache.tags(id).await?;
		self.cache.invalidate(CacheKind::Tags, id);
		debug!(challenge = challenge.slug(), delete = existing.len(), create = challenge.tags.len(), "replacing tags");

		all_ok(existing.iter().map(|t| self.remote.delete_tag(t.id))).await?;
		for value in &challenge.tags {
			self.remote.create_tag(id, value).await?;
		}
		Ok(())
	}

	async fn replace_hints(&self, challenge: &LocalChallenge) -> RemoteResult<()> {
		let id = challenge.numeric_id();
		let existing = self.cache.hints(id).await?;
		self.cache.invalidate(CacheKind::Hints, id);
		debug!(challenge = challenge.slug(), delete = existing.len(), create = challenge.hints.len(), "replacing hints");

		all_ok(existing.iter().map(|h| self.remote.delete_hint(h.id))).await?;
		for content in &challenge.hints {
			self.remote.create_hint(id, content).await?;
		}
		Ok(())
	}

	async fn replace_flags(&self, challenge: &LocalChallenge) -> RemoteResult<()> {
		let id = challenge.numeric_id();
		let existing = self.cache.flags(id).await?;
		self.cache.invalidate(CacheKind::Flags, id);
		debug!(challenge = challenge.slug(), delete = existing.len(), create = challenge.flags.len(), "replacing flags");

		all_ok(existing.iter().map(|f| self.remote.delete_flag(f.id))).await?;
		for content in &challenge.flags {
			self.remote.create_flag(id, content).await?;
		}
		Ok(())
	}

	/// Upload missing files and delete stale ones, leaving equal files alone
	async fn sync_files(&self, challenge: &LocalChallenge) -> Result<(), ReconcileError> {
		let id = challenge.numeric_id();
		let units = self.packager.units(challenge)?;
		let existing = self.cache.files(id).await?;
		self.cache.invalidate(CacheKind::Files, id);

		let target: BTreeSet<(&str, &str)> = units.values().map(|u| u.key()).collect();
		let present: BTreeSet<(&str, &str)> = existing.iter().map(RemoteFile::key).collect();
		let stale: Vec<&RemoteFile> = existing.iter().filter(|f| !target.contains(&f.key())).collect();
		debug!(
			challenge = challenge.slug(),
			delete = stale.len(),
			upload = units.values().filter(|u| !present.contains(&u.key())).count(),
			"syncing files"
		);

		all_ok(stale.iter().map(|f| self.remote.delete_file(f.id))).await?;
		for unit in units.values().filter(|u| !present.contains(&u.key())) {
			self.remote.upload_file(id, unit).await?;
		}

		self.packager.evict(challenge.slug());
		Ok(())
	}
}


// vim: ts=4
