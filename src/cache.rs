//! Read-through cache of remote scoreboard state
//!
//! One cache lives for one reconciliation run. Each key is read from the
//! remote at most once, even when several workers ask for it at the same
//! time. Writers invalidate the keys they make stale; invalidation swaps the
//! slot out atomically, so a reader either sees the old value in full or
//! triggers a fresh read.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

use crate::logging::*;
use crate::remote::{
	RemoteApi, RemoteChallenge, RemoteFile, RemoteFlag, RemoteHint, RemoteResult, RemoteTag,
};

/// Kind of remote state held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
	Challenge,
	Tags,
	Hints,
	Flags,
	Files,
}

impl CacheKind {
	pub const SUB_RESOURCES: [CacheKind; 4] = [CacheKind::Tags, CacheKind::Hints, CacheKind::Flags, CacheKind::Files];
}

impl fmt::Display for CacheKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			CacheKind::Challenge => "challenge",
			CacheKind::Tags => "tags",
			CacheKind::Hints => "hints",
			CacheKind::Flags => "flags",
			CacheKind::Files => "files",
		};
		f.write_str(s)
	}
}

/// Full remote view of one existing challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
	pub challenge: RemoteChallenge,
	pub tags: Vec<RemoteTag>,
	pub hints: Vec<RemoteHint>,
	pub flags: Vec<RemoteFlag>,
	pub files: Vec<RemoteFile>,
}

/// Per-kind slot map. A slot is created on first access and filled by
/// exactly one successful read.
struct Slots<T> {
	slots: Mutex<HashMap<u32, Arc<OnceCell<T>>>>,
}

impl<T: Clone> Slots<T> {
	fn new() -> Self {
		Self { slots: Mutex::new(HashMap::new()) }
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<OnceCell<T>>>> {
		match self.slots.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	fn slot(&self, id: u32) -> Arc<OnceCell<T>> {
		Arc::clone(self.lock().entry(id).or_insert_with(|| Arc::new(OnceCell::new())))
	}

	async fn get_or_fetch<F, Fut>(&self, id: u32, fetch: F) -> RemoteResult<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = RemoteResult<T>>,
	{
		// the slot is cloned out so the map lock is never held across a read
		let slot = self.slot(id);
		slot.get_or_try_init(fetch).await.cloned()
	}

	fn peek(&self, id: u32) -> Option<T> {
		self.lock().get(&id).and_then(|slot| slot.get().cloned())
	}

	fn set(&self, id: u32, value: T) {
		self.lock().insert(id, Arc::new(OnceCell::new_with(Some(value))));
	}

	fn invalidate(&self, id: u32) -> bool {
		self.lock().remove(&id).is_some()
	}
}

/// Remote state cache for one run
pub struct RemoteStateCache {
	remote: Arc<dyn RemoteApi>,
	challenges: Slots<Option<RemoteChallenge>>,
	tags: Slots<Vec<RemoteTag>>,
	hints: Slots<Vec<RemoteHint>>,
	flags: Slots<Vec<RemoteFlag>>,
	files: Slots<Vec<RemoteFile>>,
}

impl RemoteStateCache {
	pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
		Self {
			remote,
			challenges: Slots::new(),
			tags: Slots::new(),
			hints: Slots::new(),
			flags: Slots::new(),
			files: Slots::new(),
		}
	}

	/// Base challenge, `None` when it does not exist remotely
	pub async fn challenge(&self, id: u32) -> RemoteResult<Option<RemoteChallenge>> {
		let remote = &self.remote;
		self.challenges.get_or_fetch(id, || remote.fetch_challenge(id)).await
	}

	pub async fn tags(&self, id: u32) -> RemoteResult<Vec<RemoteTag>> {
		let remote = &self.remote;
		self.tags.get_or_fetch(id, || remote.fetch_tags(id)).await
	}

	pub async fn hints(&self, id: u32) -> RemoteResult<Vec<RemoteHint>> {
		let remote = &self.remote;
		self.hints.get_or_fetch(id, || remote.fetch_hints(id)).await
	}

	pub async fn flags(&self, id: u32) -> RemoteResult<Vec<RemoteFlag>> {
		let remote = &self.remote;
		self.flags.get_or_fetch(id, || remote.fetch_flags(id)).await
	}

	pub async fn files(&self, id: u32) -> RemoteResult<Vec<RemoteFile>> {
		let remote = &self.remote;
		self.files.get_or_fetch(id, || remote.fetch_files(id)).await
	}

	/// Read everything known about a challenge.
	///
	/// Sub-resources are only fetched once the base record is known to exist;
	/// they are then read concurrently. For an absent challenge the
	/// sub-resources are recorded as empty so that nothing asks for them later.
	pub async fn snapshot(&self, id: u32) -> RemoteResult<Option<RemoteSnapshot>> {
		let challenge = match self.challenge(id).await? {
			Some(challenge) => challenge,
			None => {
				self.set_absent(id);
				return Ok(None);
			}
		};

		let (tags, hints, flags, files) =
			futures::try_join!(self.tags(id), self.hints(id), self.flags(id), self.files(id))?;
		Ok(Some(RemoteSnapshot { challenge, tags, hints, flags, files }))
	}

	/// Record that a challenge and all of its sub-resources do not exist
	pub fn set_absent(&self, id: u32) {
		self.challenges.set(id, None);
		self.tags.set(id, Vec::new());
		self.hints.set(id, Vec::new());
		self.flags.set(id, Vec::new());
		self.files.set(id, Vec::new());
	}

	/// Drop a cached entry; the next read goes to the remote again
	pub fn invalidate(&self, kind: CacheKind, id: u32) {
		let removed = match kind {
			CacheKind::Challenge => self.challenges.invalidate(id),
			CacheKind::Tags => self.tags.invalidate(id),
			CacheKind::Hints => self.hints.invalidate(id),
			CacheKind::Flags => self.flags.invalidate(id),
			CacheKind::Files => self.files.invalidate(id),
		};
		if removed {
			debug!(id, %kind, "invalidated cache entry");
		}
	}

	/// Whether a value for the key is currently cached
	pub fn is_cached(&self, kind: CacheKind, id: u32) -> bool {
		match kind {
			CacheKind::Challenge => self.challenges.peek(id).is_some(),
			CacheKind::Tags => self.tags.peek(id).is_some(),
			CacheKind::Hints => self.hints.peek(id).is_some(),
			CacheKind::Flags => self.flags.peek(id).is_some(),
			CacheKind::Files => self.files.peek(id).is_some(),
		}
	}

	/// Cached base challenge without touching the remote. The outer `None`
	/// means "not cached".
	pub fn peek_challenge(&self, id: u32) -> Option<Option<RemoteChallenge>> {
		self.challenges.peek(id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::Score;
	use crate::remote::{ChallengeState, MemoryRemote, RemoteCall};
	use std::time::Duration;

	fn challenge(id: u32) -> RemoteChallenge {
		RemoteChallenge {
			id,
			name: "c".into(),
			category: "web".into(),
			description: String::new(),
			score: Score::Static { points: 1 },
			state: ChallengeState::Hidden,
		}
	}

	#[tokio::test]
	async fn test_single_read_per_key() {
		let remote = Arc::new(MemoryRemote::new());
		remote.insert_challenge(challenge(7));
		let cache = RemoteStateCache::new(remote.clone());

		assert!(cache.challenge(7).await.unwrap().is_some());
		assert!(cache.challenge(7).await.unwrap().is_some());
		assert_eq!(remote.calls(), vec![RemoteCall::FetchChallenge(7)]);
	}

	#[tokio::test]
	async fn test_concurrent_readers_share_one_read() {
		let remote = Arc::new(MemoryRemote::new().with_latency(Duration::from_millis(20)));
		remote.insert_challenge(challenge(7));
		let cache = RemoteStateCache::new(remote.clone());

		let reads = futures::future::join_all((0..8).map(|_| cache.challenge(7))).await;
		assert!(reads.iter().all(|r| matches!(r, Ok(Some(_)))));
		assert_eq!(remote.calls().len(), 1);
	}

	#[tokio::test]
	async fn test_absence_is_cached() {
		let remote = Arc::new(MemoryRemote::new());
		let cache = RemoteStateCache::new(remote.clone());

		assert_eq!(cache.snapshot(9).await.unwrap(), None);
		assert_eq!(cache.challenge(9).await.unwrap(), None);
		assert!(cache.tags(9).await.unwrap().is_empty());
		assert!(cache.files(9).await.unwrap().is_empty());
		assert_eq!(remote.calls(), vec![RemoteCall::FetchChallenge(9)]);
	}

	#[tokio::test]
	async fn test_invalidate_forces_reread() {
		let remote = Arc::new(MemoryRemote::new());
		remote.insert_challenge(challenge(3));
		let cache = RemoteStateCache::new(remote.clone());

		assert!(cache.tags(3).await.unwrap().is_empty());
		remote.insert_tag(3, "new");
		assert!(cache.tags(3).await.unwrap().is_empty());

		cache.invalidate(CacheKind::Tags, 3);
		assert!(!cache.is_cached(CacheKind::Tags, 3));
		let tags = cache.tags(3).await.unwrap();
		assert_eq!(tags.len(), 1);
		assert_eq!(tags[0].value, "new");
	}

	#[tokio::test]
	async fn test_failed_read_is_not_cached() {
		let remote = Arc::new(MemoryRemote::new());
		remote.insert_challenge(challenge(4));
		remote.fail_on("fetch_hints", crate::remote::RemoteError::Transport { message: "down".into() });
		let cache = RemoteStateCache::new(remote.clone());

		assert!(cache.snapshot(4).await.is_err());
		assert!(!cache.is_cached(CacheKind::Hints, 4));

		remote.clear_failures();
		let snap = cache.snapshot(4).await.unwrap().unwrap();
		assert_eq!(snap.challenge.id, 4);
	}
}

// vim: ts=4
