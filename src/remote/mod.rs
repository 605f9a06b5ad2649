//! Remote scoreboard API
//!
//! The reconciliation engine only ever talks to the scoreboard through the
//! [`RemoteApi`] trait. [`HttpRemote`] speaks the CTFd REST API;
//! [`MemoryRemote`] keeps everything in process and records each call.

mod http;
mod memory;

pub use http::{HttpRemote, HttpRemoteConfig, DEFAULT_TIMEOUT};
pub use memory::{MemoryRemote, RemoteCall};

use async_trait::async_trait;
use std::fmt;

use crate::model::{LocalChallenge, Score};
use crate::packaging::StaticArtifactUnit;

/// Result type for remote operations
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Player visibility of a challenge. Not modeled locally, so updates copy it
/// from the existing remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeState {
	#[default]
	Hidden,
	Visible,
}

impl ChallengeState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ChallengeState::Hidden => "hidden",
			ChallengeState::Visible => "visible",
		}
	}
}

/// Base challenge record as stored remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChallenge {
	pub id: u32,
	pub name: String,
	pub category: String,
	pub description: String,
	pub score: Score,
	pub state: ChallengeState,
}

impl RemoteChallenge {
	/// Record the local definition should produce, with the given visibility
	pub fn from_local(local: &LocalChallenge, state: ChallengeState) -> Self {
		Self {
			id: local.numeric_id(),
			name: local.name.clone(),
			category: local.category.clone(),
			description: local.description.clone().unwrap_or_default(),
			score: local.score,
			state,
		}
	}
}

/// Reference to a remote sub-resource item
pub type RemoteRef = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
	pub id: RemoteRef,
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHint {
	pub id: RemoteRef,
	pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFlag {
	pub id: RemoteRef,
	pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
	pub id: RemoteRef,
	pub filename: String,
	pub content_hash: String,
}

impl RemoteFile {
	pub fn key(&self) -> (&str, &str) {
		(&self.filename, &self.content_hash)
	}
}

/// Errors returned by remote operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
	/// Credentials were rejected; nothing else will work either
	Unauthorized { status: u16 },

	/// Non-success response
	Status { status: u16, url: String },

	/// Response body did not look like we expected
	Decode { url: String, message: String },

	/// Request never completed
	Transport { message: String },

	/// Response reported `success: false`
	Rejected { url: String },
}

impl RemoteError {
	/// Whether this failure makes every further remote call pointless
	pub fn is_global(&self) -> bool {
		matches!(self, RemoteError::Unauthorized { .. })
	}
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteError::Unauthorized { status } => {
				write!(f, "Not authorized (HTTP {}); check the API token", status)
			}
			RemoteError::Status { status, url } => write!(f, "HTTP {} from {}", status, url),
			RemoteError::Decode { url, message } => {
				write!(f, "Unexpected response from {}: {}", url, message)
			}
			RemoteError::Transport { message } => write!(f, "Request failed: {}", message),
			RemoteError::Rejected { url } => write!(f, "Request to {} was not successful", url),
		}
	}
}

impl std::error::Error for RemoteError {}

/// Operations the reconciliation engine needs from the scoreboard
#[async_trait]
pub trait RemoteApi: Send + Sync {
	// === Base challenge ===

	/// Fetch a challenge; `None` if it does not exist
	async fn fetch_challenge(&self, id: u32) -> RemoteResult<Option<RemoteChallenge>>;

	/// Create a challenge that does not exist yet
	async fn create_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()>;

	/// Overwrite an existing challenge
	async fn update_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()>;

	// === Tags ===

	async fn fetch_tags(&self, id: u32) -> RemoteResult<Vec<RemoteTag>>;
	async fn create_tag(&self, id: u32, value: &str) -> RemoteResult<()>;
	async fn delete_tag(&self, tag: RemoteRef) -> RemoteResult<()>;

	// === Hints ===

	async fn fetch_hints(&self, id: u32) -> RemoteResult<Vec<RemoteHint>>;
	async fn create_hint(&self, id: u32, content: &str) -> RemoteResult<()>;
	async fn delete_hint(&self, hint: RemoteRef) -> RemoteResult<()>;

	// === Flags ===

	async fn fetch_flags(&self, id: u32) -> RemoteResult<Vec<RemoteFlag>>;
	async fn create_flag(&self, id: u32, content: &str) -> RemoteResult<()>;
	async fn delete_flag(&self, flag: RemoteRef) -> RemoteResult<()>;

	// === Files ===

	async fn fetch_files(&self, id: u32) -> RemoteResult<Vec<RemoteFile>>;
	async fn upload_file(&self, id: u32, unit: &StaticArtifactUnit) -> RemoteResult<()>;
	async fn delete_file(&self, file: RemoteRef) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::identity::ChallengeId;

	#[test]
	fn test_from_local_fills_description() {
		let local = LocalChallenge::new(ChallengeId::new("web-01").unwrap(), "web", "/tmp/web-01");
		let remote = RemoteChallenge::from_local(&local, ChallengeState::Visible);
		assert_eq!(remote.id, local.numeric_id());
		assert_eq!(remote.description, "");
		assert_eq!(remote.state, ChallengeState::Visible);
	}

	#[test]
	fn test_global_errors() {
		assert!(RemoteError::Unauthorized { status: 403 }.is_global());
		assert!(!RemoteError::Status { status: 500, url: "x".into() }.is_global());
	}
}

// vim: ts=4
