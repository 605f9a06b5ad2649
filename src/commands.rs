//! The validate and deploy pipelines behind the command line

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::changeset::ChangePlan;
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::logging::*;
use crate::reconcile::{ApplyReport, Reconciler, StopFlag};
use crate::remote::RemoteApi;
use crate::source::{load_sources, DeploySource};
use crate::summary;
use crate::validation::ValidationBook;

/// Which challenges a command works on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
	/// Explicit challenge ids; empty means all
	pub ids: Vec<String>,

	/// Challenge ids to leave out
	pub skip: Vec<String>,
}

/// Load and validate local sources, printing the summaries.
///
/// Fails when anything at error level or worse was recorded.
pub fn validate(repo_path: &Path, selection: &Selection) -> Result<DeploySource, DeployError> {
	let mut book = ValidationBook::new();
	let result = load_sources(&mut book, repo_path, &selection.ids, &selection.skip);

	if let Ok(source) = &result {
		if !source.challenges.is_empty() {
			println!("{}", summary::challenge_summary(&source.challenges, &book));
		}
	}
	println!("{}", summary::issue_summary(&book));

	let source = result?;
	if book.has_errors() || !source.failed.is_empty() {
		return Err(DeployError::Validation);
	}
	info!("Validated {} challenges", source.challenges.len());
	Ok(source)
}

/// Discover, plan, confirm and apply.
///
/// `confirm` sees every non-empty plan and decides whether to write; nothing
/// is written without its approval. Returns `None` when
/// there was nothing to do or the user declined.
pub async fn deploy<F>(
	source: &DeploySource,
	remote: Arc<dyn RemoteApi>,
	config: &DeployConfig,
	stop: StopFlag,
	confirm: F,
) -> Result<Option<ApplyReport>, DeployError>
where
	F: FnOnce(&ChangePlan) -> io::Result<bool>,
{
	let engine = Reconciler::new(remote, config.reconcile_options()).with_stop_flag(stop);
	let challenges = &source.challenges;

	engine.discover(challenges).await?;
	let plan = engine.plan(challenges).await?;
	println!("{}", summary::plan_summary(&plan));
	if plan.is_empty() {
		return Ok(None);
	}

	if !confirm(&plan)? {
		info!("Deployment cancelled");
		return Ok(None);
	}

	let report = engine.apply(challenges, &plan).await;
	println!("{}", summary::report_summary(&report));
	if !report.is_success() {
		return Err(DeployError::Incomplete {
			failed: report.failed().count(),
			skipped: report.skipped().count(),
		});
	}
	Ok(Some(report))
}

// vim: ts=4
