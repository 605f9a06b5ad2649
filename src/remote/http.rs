//! CTFd REST API client
//!
//! Every response is wrapped in `{"success": bool, "data": ...}`. A 404 on the
//! base challenge means "does not exist"; any other non-success status fails
//! the call. 401/403 are reported as [`RemoteError::Unauthorized`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::*;
use crate::logging::*;
use crate::model::Score;
use crate::packaging::{content_hash, StaticArtifactUnit};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
	/// Scoreboard URL: scheme and host, no path
	pub url: String,

	/// API access token
	pub token: String,

	pub timeout: Duration,
}

impl HttpRemoteConfig {
	pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
		Self { url: url.into(), token: token.into(), timeout: DEFAULT_TIMEOUT }
	}
}

#[derive(Deserialize)]
struct Envelope<T> {
	success: bool,
	data: Option<T>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChallengeBody {
	id: u32,
	name: String,
	category: String,
	#[serde(default)]
	description: Option<String>,
	#[serde(rename = "type", default = "standard")]
	kind: String,
	#[serde(default)]
	state: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	value: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	initial: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	minimum: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	decay: Option<u32>,
}

fn standard() -> String {
	"standard".to_string()
}

impl ChallengeBody {
	fn from_remote(c: &RemoteChallenge) -> Self {
		let mut body = ChallengeBody {
			id: c.id,
			name: c.name.clone(),
			category: c.category.clone(),
			description: Some(c.description.clone()),
			kind: standard(),
			state: Some(c.state.as_str().to_string()),
			value: None,
			initial: None,
			minimum: None,
			decay: None,
		};
		match c.score {
			Score::Static { points } => body.value = Some(points),
			Score::Dynamic { initial, minimum, decay } => {
				body.kind = "dynamic".to_string();
				body.value = Some(initial);
				body.initial = Some(initial);
				body.minimum = Some(minimum);
				body.decay = Some(decay);
			}
		}
		body
	}

	fn into_remote(self, url: &str) -> RemoteResult<RemoteChallenge> {
		let score = if self.kind == "dynamic" {
			match (self.initial, self.minimum, self.decay) {
				(Some(initial), Some(minimum), Some(decay)) => Score::Dynamic { initial, minimum, decay },
				_ => {
					return Err(RemoteError::Decode {
						url: url.to_string(),
						message: "dynamic challenge without initial/minimum/decay".to_string(),
					})
				}
			}
		} else {
			Score::Static { points: self.value.unwrap_or(0) }
		};
		let state = match self.state.as_deref() {
			Some("visible") => ChallengeState::Visible,
			_ => ChallengeState::Hidden,
		};
		Ok(RemoteChallenge {
			id: self.id,
			name: self.name,
			category: self.category,
			description: self.description.unwrap_or_default(),
			score,
			state,
		})
	}
}

#[derive(Deserialize)]
struct TagBody {
	id: RemoteRef,
	value: String,
}

#[derive(Deserialize)]
struct ContentBody {
	id: RemoteRef,
	#[serde(default)]
	content: String,
}

#[derive(Deserialize)]
struct FileBody {
	id: RemoteRef,
	location: String,
}

/// Remote scoreboard reached over HTTP
pub struct HttpRemote {
	client: reqwest::Client,
	api: String,
	files: String,
}

impl HttpRemote {
	pub fn new(config: &HttpRemoteConfig) -> RemoteResult<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
		let auth = HeaderValue::from_str(&format!("Token {}", config.token))
			.map_err(|e| RemoteError::Transport { message: format!("invalid API token: {}", e) })?;
		headers.insert(AUTHORIZATION, auth);

		let client = reqwest::Client::builder()
			.timeout(config.timeout)
			.default_headers(headers)
			.user_agent(concat!("chalsync/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(|e| RemoteError::Transport { message: e.to_string() })?;

		let base = config.url.trim_end_matches('/');
		Ok(Self { client, api: format!("{}/api/v1", base), files: format!("{}/files", base) })
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.api, path)
	}

	async fn send(&self, req: RequestBuilder, url: &str) -> RemoteResult<Response> {
		let resp = req.send().await.map_err(|e| RemoteError::Transport { message: e.to_string() })?;
		check_status(resp, url)
	}

	async fn get<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
		let url = self.url(path);
		debug!("GET {}", url);
		let resp = self.send(self.client.get(&url), &url).await?;
		data(resp, &url).await
	}

	async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteResult<()> {
		let url = self.url(path);
		debug!("POST {}", url);
		let resp = self.send(self.client.post(&url).json(body), &url).await?;
		success(resp, &url).await
	}

	async fn delete(&self, path: &str) -> RemoteResult<()> {
		let url = self.url(path);
		debug!("DELETE {}", url);
		let resp = self.send(self.client.delete(&url), &url).await?;
		success(resp, &url).await
	}

	/// Download a file by its location and hash the bytes
	async fn hash_file(&self, location: &str) -> RemoteResult<String> {
		let url = format!("{}/{}", self.files, location.trim_start_matches('/'));
		let resp = self.send(self.client.get(&url), &url).await?;
		let bytes = resp
			.bytes()
			.await
			.map_err(|e| RemoteError::Transport { message: e.to_string() })?;
		Ok(content_hash(&bytes))
	}
}

fn check_status(resp: Response, url: &str) -> RemoteResult<Response> {
	let status = resp.status();
	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		return Err(RemoteError::Unauthorized { status: status.as_u16() });
	}
	if !status.is_success() {
		return Err(RemoteError::Status { status: status.as_u16(), url: url.to_string() });
	}
	Ok(resp)
}

async fn envelope<T: DeserializeOwned>(resp: Response, url: &str) -> RemoteResult<Envelope<T>> {
	let env: Envelope<T> = resp
		.json()
		.await
		.map_err(|e| RemoteError::Decode { url: url.to_string(), message: e.to_string() })?;
	if !env.success {
		return Err(RemoteError::Rejected { url: url.to_string() });
	}
	Ok(env)
}

async fn data<T: DeserializeOwned>(resp: Response, url: &str) -> RemoteResult<T> {
	envelope::<T>(resp, url).await?.data.ok_or_else(|| RemoteError::Decode {
		url: url.to_string(),
		message: "response has no data".to_string(),
	})
}

async fn success(resp: Response, url: &str) -> RemoteResult<()> {
	envelope::<serde_json::Value>(resp, url).await.map(|_| ())
}

#[async_trait]
impl RemoteApi for HttpRemote {
	async fn fetch_challenge(&self, id: u32) -> RemoteResult<Option<RemoteChallenge>> {
		let url = self.url(&format!("/challenges/{}", id));
		debug!("GET {}", url);
		let resp = self
			.client
			.get(&url)
			.send()
			.await
			.map_err(|e| RemoteError::Transport { message: e.to_string() })?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		let resp = check_status(resp, &url)?;
		let body: ChallengeBody = data(resp, &url).await?;
		body.into_remote(&url).map(Some)
	}

	async fn create_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()> {
		self.post_json("/challenges", &ChallengeBody::from_remote(challenge)).await
	}

	async fn update_challenge(&self, challenge: &RemoteChallenge) -> RemoteResult<()> {
		let url = self.url(&format!("/challenges/{}", challenge.id));
		debug!("PATCH {}", url);
		let body = ChallengeBody::from_remote(challenge);
		let resp = self.send(self.client.patch(&url).json(&body), &url).await?;
		success(resp, &url).await
	}

	async fn fetch_tags(&self, id: u32) -> RemoteResult<Vec<RemoteTag>> {
		let tags: Vec<TagBody> = self.get(&format!("/challenges/{}/tags", id)).await?;
		Ok(tags.into_iter().map(|t| RemoteTag { id: t.id, value: t.value }).collect())
	}

	async fn create_tag(&self, id: u32, value: &str) -> RemoteResult<()> {
		self.post_json("/tags", &serde_json::json!({ "challenge_id": id, "value": value })).await
	}

	async fn delete_tag(&self, tag: RemoteRef) -> RemoteResult<()> {
		self.delete(&format!("/tags/{}", tag)).await
	}

	async fn fetch_hints(&self, id: u32) -> RemoteResult<Vec<RemoteHint>> {
		let hints: Vec<ContentBody> = self.get(&format!("/challenges/{}/hints", id)).await?;
		Ok(hints.into_iter().map(|h| RemoteHint { id: h.id, content: h.content }).collect())
	}

	async fn create_hint(&self, id: u32, content: &str) -> RemoteResult<()> {
		self.post_json("/hints", &serde_json::json!({ "challenge_id": id, "content": content })).await
	}

	async fn delete_hint(&self, hint: RemoteRef) -> RemoteResult<()> {
		self.delete(&format!("/hints/{}", hint)).await
	}

	async fn fetch_flags(&self, id: u32) -> RemoteResult<Vec<RemoteFlag>> {
		let flags: Vec<ContentBody> = self.get(&format!("/challenges/{}/flags", id)).await?;
		Ok(flags.into_iter().map(|f| RemoteFlag { id: f.id, content: f.content }).collect())
	}

	async fn create_flag(&self, id: u32, content: &str) -> RemoteResult<()> {
		self.post_json(
			"/flags",
			&serde_json::json!({ "challenge_id": id, "content": content, "type": "static" }),
		)
		.await
	}

	async fn delete_flag(&self, flag: RemoteRef) -> RemoteResult<()> {
		self.delete(&format!("/flags/{}", flag)).await
	}

	async fn fetch_files(&self, id: u32) -> RemoteResult<Vec<RemoteFile>> {
		let listed: Vec<FileBody> = self.get(&format!("/challenges/{}/files", id)).await?;
		let mut files = Vec::with_capacity(listed.len());
		for file in listed {
			let filename = file.location.rsplit('/').next().unwrap_or(&file.location).to_string();
			let content_hash = self.hash_file(&file.location).await?;
			files.push(RemoteFile { id: file.id, filename, content_hash });
		}
		Ok(files)
	}

	async fn upload_file(&self, id: u32, unit: &StaticArtifactUnit) -> RemoteResult<()> {
		let url = self.url("/files");
		debug!("POST {} ({}, {} bytes)", url, unit.filename, unit.payload.len());
		let part = reqwest::multipart::Part::bytes(unit.payload.clone()).file_name(unit.filename.clone());
		let form = reqwest::multipart::Form::new()
			.text("challenge_id", id.to_string())
			.text("type", "challenge")
			.part("file", part);
		let resp = self.send(self.client.post(&url).multipart(form), &url).await?;
		success(resp, &url).await
	}

	async fn delete_file(&self, file: RemoteRef) -> RemoteResult<()> {
		self.delete(&format!("/files/{}", file)).await
	}
}


// vim: ts=4
