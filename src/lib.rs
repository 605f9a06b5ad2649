//! # chalsync - declarative CTF challenge deployment
//!
//! chalsync reads a repository of challenge directories, each described by a
//! `challenge.toml`, and brings a CTFd scoreboard in line with it. The local
//! definition is always authoritative: discovery reads remote state once per
//! challenge, a diff computes the minimal change set, and apply writes only
//! what differs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chalsync::reconcile::{ReconcileOptions, Reconciler};
//! use chalsync::remote::{HttpRemote, HttpRemoteConfig};
//! use chalsync::source::load_sources;
//! use chalsync::validation::ValidationBook;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut book = ValidationBook::new();
//!     let source = load_sources(&mut book, "./challenges".as_ref(), &[], &[])?;
//!     let remote = HttpRemote::new(&HttpRemoteConfig::new("https://ctf.example", "token"))?;
//!     let engine = Reconciler::new(Arc::new(remote), ReconcileOptions::default());
//!     let report = engine.reconcile(&source.challenges).await?;
//!     println!("{} challenges applied", report.applied().count());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod changeset;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod matching;
pub mod model;
pub mod packaging;
pub mod reconcile;
pub mod remote;
pub mod source;
pub mod summary;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use changeset::{ChangePlan, ChangeSet, Field, FieldSet};
pub use error::DeployError;
pub use model::LocalChallenge;
pub use reconcile::{ApplyReport, ReconcileOptions, Reconciler};

// vim: ts=4
