//! In-process remote that keeps scoreboard state in memory
//!
//! Behaves like the real service for everything the engine relies on (absent
//! challenges, per-item references, ordered sub-resources) and records each
//! call so the sequence of remote operations can be inspected afterwards.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::*;

/// One recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
	FetchChallenge(u32),
	CreateChallenge(u32),
	UpdateChallenge(u32),
	FetchTags(u32),
	CreateTag(u32, String),
	DeleteTag(RemoteRef),
	FetchHints(u32),
	CreateHint(u32, String),
	DeleteHint(RemoteRef),
	FetchFlags(u32),
	CreateFlag(u32, String),
	DeleteFlag(RemoteRef),
	FetchFiles(u32),
	UploadFile(u32, String),
	DeleteFile(RemoteRef),
}

impl RemoteCall {
	/// Operation name, as used by [`MemoryRemote::fail_on`]
	pub fn op(&self) -> &'static str {
		match self {
			RemoteCall::FetchChallenge(_) => "fetch_challenge",
			RemoteCall::CreateChallenge(_) => "create_challenge",
			RemoteCall::UpdateChallenge(_) => "update_challenge",
			RemoteCall::FetchTags(_) => "fetch_tags",
			RemoteCall::CreateTag(..) => "create_tag",
			RemoteCall::DeleteTag(_) => "delete_tag",
			RemoteCall::FetchHints(_) => "fetch_hints",
			RemoteCall::CreateHint(..) => "create_hint",
			RemoteCall::DeleteHint(_) => "delete_hint",
			RemoteCall::FetchFlags(_) => "fetch_flags",
			RemoteCall::CreateFlag(..) => "create_flag",
			RemoteCall::DeleteFlag(_) => "delete_flag",
			RemoteCall::FetchFiles(_) => "fetch_files",
			RemoteCall::UploadFile(..) => "upload_file",
			RemoteCall::DeleteFile(_) => "delete_file",
		}
	}

	pub fn is_write(&self) -> bool {
		!self.op().starts_with("fetch_")
	}
}

#[derive(Default)]
struct Store {
	challenges: BTreeMap<u32, RemoteChallenge>,
	tags: BTreeMap<u32, Vec<RemoteTag>>,
	hints: BTreeMap<u32, Vec<RemoteHint>>,
	flags: BTreeMap<u32, Vec<RemoteFlag>>,
	files: BTreeMap<u32, Vec<RemoteFile>>,
	next_ref: RemoteRef,
	calls: Vec<RemoteCall>,
	failures: BTreeMap<&'static str, RemoteError>,
}

impl Store {
	fn next_ref(&mut self) -> RemoteRef {
		self.next_ref += 1;
		self.next_ref
	}

	fn require(&self, id: u32) -> RemoteResult<()> {
		if self.challenges.contains_key(&id) {
			Ok(())
		} else {
			Err(not_found(format!("/challenges/{}", id)))
		}
	}
}

fn not_found(url: String) -> RemoteError {
	RemoteError::Status { status: 404, url }
}

/// Scoreboard held in process memory
#[derive(Default)]
pub struct MemoryRemote {
	store: Mutex<Store>,
	latency: Option<Duration>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

impl MemoryRemote {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every call take at least `latency`, so concurrent calls overlap
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);
		self
	}

	fn lock(&self) -> MutexGuard<'_, Store> {
		match self.store.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	/// Record the call, wait out the latency and return the injected failure, if any
	async fn enter(&self, call: RemoteCall) -> RemoteResult<InFlight<'_>> {
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(current, Ordering::SeqCst);
		let guard = InFlight(&self.in_flight);

		let failure = {
			let mut store = self.lock();
			let failure = store.failures.get(call.op()).cloned();
			store.calls.push(call);
			failure
		};

		if let Some(latency) = self.latency {
			tokio::time::sleep(latency).await;
		}

		match failure {
			Some(err) => Err(err),
			None => Ok(guard),
		}
	}

	// === Fixtures and inspection ===

	/// Make every call of operation `op` (e.g. "create_tag") fail with `err`
	pub fn fail_on(&self, op: &'static str, err: RemoteError) {
		self.lock().failures.insert(op, err);
	}

	pub fn clear_failures(&self) {
		self.lock().failures.clear();
	}

	pub fn insert_challenge(&self, challenge: RemoteChallenge) {
		let mut store = self.lock();
		let id = challenge.id;
		store.challenges.insert(id, challenge);
		store.tags.entry(id).or_default();
		store.hints.entry(id).or_default();
		store.flags.entry(id).or_default();
		store.files.entry(id).or_default();
	}

	pub fn insert_tag(&self, id: u32, value: &str) -> RemoteRef {
		let mut store = self.lock();
		let r = store.next_ref();
		store.tags.entry(id).or_default().push(RemoteTag { id: r, value: value.to_string() });
		r
	}

	pub fn insert_hint(&self, id: u32, content: &str) -> RemoteRef {
		let mut store = self.lock();
		let r = store.next_ref();
		store.hints.entry(id).or_default().push(RemoteHint { id: r, content: content.to_string() });
		r
	}

	pub fn insert_flag(&self, id: u32, content: &str) -> RemoteRef {
		let mut store = self.lock();
		let r = store.next_ref();
		store.flags.entry(id).or_default().push(RemoteFlag { id: r, content: content.to_string() });
		r
	}

	pub fn insert_file(&self, id: u32, filename: &str, content_hash: &str) -> RemoteRef {
		let mut store = self.lock();
		let r = store.next_ref();
		store.files.entry(id).or_default().push(RemoteFile {
			id: r,
			filename: filename.to_string(),
			content_hash: content_hash.to_string(),
		});
		r
	}

	pub fn challenge(&self, id: u32) -> Option<RemoteChallenge> {
		self.lock().challenges.get(&id).cloned()
	}

	pub fn tag_values(&self, id: u32) -> Vec<String> {
		self.lock().tags.get(&id).map(|v| v.iter().map(|t| t.value.clone()).collect()).unwrap_or_default()
	}

	pub fn hint_contents(&self, id: u32) -> Vec<String> {
		self.lock().hints.get(&id).map(|v| v.iter().map(|h| h.content.clone()).collect()).unwrap_or_default()
	}

	pub fn flag_contents(&self, id: u32) -> Vec<String> {
		self.lock().flags.get(&id).map(|v| v.iter().map(|f| f.content.clone()).collect()).unwrap_or_default()
	}

	pub fn files(&self, id: u32) -> Vec<RemoteFile> {
		self.lock().files.get(&id).cloned().unwrap_or_default()
	}

	/// Every call so far, in order
	pub fn calls(&self) -> Vec<RemoteCall> {
		self.lock().calls.clone()
	}

	/// Only the mutating calls so far
	pub fn writes(&self) -> Vec<RemoteCall> {
		self.lock().calls.iter().filter(|c| c.is_write()).cloned().collect()
	}

	pub fn clear_calls(&self) {
		self.lock().calls.clear();
	}

	/// Highest number of calls that were in progress at the same time
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	pub fn reset_max_in_flight(&self) {
		self.max_in_flight.store(0, Ordering::SeqCst);
	}
}

#[async_trait]
impl RemoteApi for MemoryRemote {
	async fn fetch_challenge(&self, id: u32) -> RemoteResult<Option<RemoteChallenge>> {
		let _guard = self.enter(RemoteCall::FetchChallenge(id)).await?;
		Ok(self.lock().challenges.get(&id).cloned())
	}

	async fn create_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::CreateChallenge(challenge.id)).await?;
		if self.lock().challenges.contains_key(&challenge.id) {
			return Err(RemoteError::Status { status: 400, url: "/challenges".to_string() });
		}
		self.insert_challenge(challenge.clone());
		Ok(())
	}

	async fn update_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::UpdateChallenge(challenge.id)).await?;
		let mut store = self.lock();
		match store.challenges.get_mut(&challenge.id) {
			Some(existing) => {
				*existing = challenge.clone();
				Ok(())
			}
			None => Err(not_found(format!("/challenges/{}", challenge.id))),
		}
	}

	async fn fetch_tags(&self, id: u32) -> RemoteResult<Vec<RemoteTag>> {
		let _guard = self.enter(RemoteCall::FetchTags(id)).await?;
		let store = self.lock();
		store.require(id)?;
		Ok(store.tags.get(&id).cloned().unwrap_or_default())
	}

	async fn create_tag(&self, id: u32, value: &str) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::CreateTag(id, value.to_string())).await?;
		self.lock().require(id)?;
		self.insert_tag(id, value);
		Ok(())
	}

	async fn delete_tag(&self, tag: RemoteRef) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::DeleteTag(tag)).await?;
		let mut store = self.lock();
		for tags in store.tags.values_mut() {
			if let Some(pos) = tags.iter().position(|t| t.id == tag) {
				tags.remove(pos);
				return Ok(());
			}
		}
		Err(not_found(format!("/tags/{}", tag)))
	}

	async fn fetch_hints(&self, id: u32) -> RemoteResult<Vec<RemoteHint>> {
		let _guard = self.enter(RemoteCall::FetchHints(id)).await?;
		let store = self.lock();
		store.require(id)?;
		Ok(store.hints.get(&id).cloned().unwrap_or_default())
	}

	async fn create_hint(&self, id: u32, content: &str) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::CreateHint(id, content.to_string())).await?;
		self.lock().require(id)?;
		self.insert_hint(id, content);
		Ok(())
	}

	async fn delete_hint(&self, hint: RemoteRef) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::DeleteHint(hint)).await?;
		let mut store = self.lock();
		for hints in store.hints.values_mut() {
			if let Some(pos) = hints.iter().position(|h| h.id == hint) {
				hints.remove(pos);
				return Ok(());
			}
		}
		Err(not_found(format!("/hints/{}", hint)))
	}

	async fn fetch_flags(&self, id: u32) -> RemoteResult<Vec<RemoteFlag>> {
		let _guard = self.enter(RemoteCall::FetchFlags(id)).await?;
		let store = self.lock();
		store.require(id)?;
		Ok(store.flags.get(&id).cloned().unwrap_or_default())
	}

	async fn create_flag(&self, id: u32, content: &str) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::CreateFlag(id, content.to_string())).await?;
		self.lock().require(id)?;
		self.insert_flag(id, content);
		Ok(())
	}

	async fn delete_flag(&self, flag: RemoteRef) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::DeleteFlag(flag)).await?;
		let mut store = self.lock();
		for flags in store.flags.values_mut() {
			if let Some(pos) = flags.iter().position(|f| f.id == flag) {
				flags.remove(pos);
				return Ok(());
			}
		}
		Err(not_found(format!("/flags/{}", flag)))
	}

	async fn fetch_files(&self, id: u32) -> RemoteResult<Vec<RemoteFile>> {
		let _guard = self.enter(RemoteCall::FetchFiles(id)).await?;
		let store = self.lock();
		store.require(id)?;
		Ok(store.files.get(&id).cloned().unwrap_or_default())
	}

	async fn upload_file(&self, id: u32, unit: &StaticArtifactUnit) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::UploadFile(id, unit.filename.clone())).await?;
		self.lock().require(id)?;
		self.insert_file(id, &unit.filename, &unit.content_hash);
		Ok(())
	}

	async fn delete_file(&self, file: RemoteRef) -> RemoteResult<()> {
		let _guard = self.enter(RemoteCall::DeleteFile(file)).await?;
		let mut store = self.lock();
		for files in store.files.values_mut() {
			if let Some(pos) = files.iter().position(|f| f.id == file) {
				files.remove(pos);
				return Ok(());
			}
		}
		Err(not_found(format!("/files/{}", file)))
	}
}


// vim: ts=4
