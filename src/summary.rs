//! Plain-text summaries shown before and after a deploy

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::changeset::{ChangePlan, ChangeSet};
use crate::model::LocalChallenge;
use crate::reconcile::ApplyReport;
use crate::validation::{Severity, ValidationBook};

#[derive(Tabled)]
struct IssueRow {
	#[tabled(rename = "Challenge ID")]
	challenge: String,
	#[tabled(rename = "Issues")]
	issues: String,
}

#[derive(Tabled)]
struct ChallengeRow {
	#[tabled(rename = "ID")]
	id: String,
	#[tabled(rename = "Difficulty")]
	difficulty: &'static str,
	#[tabled(rename = "Category")]
	category: String,
	#[tabled(rename = "Name")]
	name: String,
	#[tabled(rename = "Tags")]
	tags: String,
	#[tabled(rename = "Status")]
	status: String,
}

#[derive(Tabled)]
struct PlanRow {
	#[tabled(rename = "Challenge ID")]
	challenge: String,
	#[tabled(rename = "Action")]
	action: &'static str,
	#[tabled(rename = "Changes")]
	changes: String,
}

#[derive(Tabled)]
struct ResultRow {
	#[tabled(rename = "Challenge ID")]
	challenge: String,
	#[tabled(rename = "Result")]
	result: String,
}

/// Title line followed by the rendered rows
fn render<R: Tabled>(title: &str, rows: Vec<R>) -> String {
	let mut table = Table::new(rows);
	table.with(Style::sharp());
	format!("{}\n{}\n", title, table)
}

/// Per-challenge issue counts, worst first
pub fn issue_summary(book: &ValidationBook) -> String {
	if book.is_empty() {
		return "No validation issues have occurred.\n".to_string();
	}

	let mut rows = Vec::new();
	let repo_issues = book.issues_for(None).count();
	if repo_issues > 0 {
		rows.push(IssueRow { challenge: "(repository)".to_string(), issues: plural(repo_issues, "issue") });
	}
	for entry in book.challenge_summary() {
		let breakdown: Vec<String> = Severity::ALL
			.iter()
			.filter_map(|s| entry.counts.get(s).map(|n| format!("{} {}", n, s)))
			.collect();
		rows.push(IssueRow {
			challenge: entry.challenge.clone(),
			issues: format!("{} ({})", plural(entry.total(), "issue"), breakdown.join(", ")),
		});
	}
	render("Validation Issues", rows)
}

/// Loaded challenges with the worst severity recorded for each
pub fn challenge_summary(challenges: &[LocalChallenge], book: &ValidationBook) -> String {
	let rows: Vec<ChallengeRow> = challenges
		.iter()
		.map(|c| ChallengeRow {
			id: c.slug().to_string(),
			difficulty: c.difficulty.as_str(),
			category: c.category.clone(),
			name: c.name.clone(),
			tags: c.tags.join(", "),
			status: match book.max_severity(Some(c.slug())) {
				Some(s) if s > Severity::Notice => s.to_string(),
				_ => "ok".to_string(),
			},
		})
		.collect();
	render("Loaded Challenges", rows)
}

/// Pending changes, or a note that there are none
pub fn plan_summary(plan: &ChangePlan) -> String {
	if plan.is_empty() {
		return "No changes are required!\n".to_string();
	}

	let rows: Vec<PlanRow> = plan
		.iter()
		.map(|(slug, changes)| {
			let (action, changes) = match changes {
				ChangeSet::Create => ("create", "everything".to_string()),
				ChangeSet::Update(fields) => ("update", fields.to_string()),
			};
			PlanRow { challenge: slug.clone(), action, changes }
		})
		.collect();
	render("Pending Changes", rows)
}

/// Outcome of each applied challenge
pub fn report_summary(report: &ApplyReport) -> String {
	let row = |slug: &str, result: String| ResultRow { challenge: slug.to_string(), result };
	let mut rows: Vec<ResultRow> = report.applied().map(|slug| row(slug, "applied".to_string())).collect();
	rows.extend(report.failed().map(|(slug, e)| row(slug, format!("failed: {}", e))));
	rows.extend(report.skipped().map(|slug| row(slug, "skipped".to_string())));
	render("Deploy Results", rows)
}

fn plural(n: usize, word: &str) -> String {
	if n == 1 {
		format!("{} {}", n, word)
	} else {
		format!("{} {}s", n, word)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::changeset::{Field, FieldSet};
	use std::path::Path;

	/// Cells of the body line that mentions `needle`
	fn row_with<'a>(out: &'a str, needle: &str) -> Vec<&'a str> {
		let line = out.lines().find(|l| l.contains(needle)).unwrap();
		line.split('│').map(str::trim).filter(|c| !c.is_empty()).collect()
	}

	#[test]
	fn test_table_has_title_and_headers() {
		let rows = vec![ResultRow { challenge: "web-01".into(), result: "applied".into() }];
		let out = render("Deploy Results", rows);
		assert_eq!(out.lines().next(), Some("Deploy Results"));
		assert_eq!(row_with(&out, "Challenge ID"), vec!["Challenge ID", "Result"]);
		assert_eq!(row_with(&out, "web-01"), vec!["web-01", "applied"]);
	}

	#[test]
	fn test_empty_plan() {
		assert_eq!(plan_summary(&ChangePlan::new()), "No changes are required!\n");
	}

	#[test]
	fn test_plan_rows() {
		let mut plan = ChangePlan::new();
		plan.insert("web-01".into(), ChangeSet::Create);
		plan.insert("pwn-02".into(), ChangeSet::Update(FieldSet::new().with(Field::Tags).with(Field::Files)));
		let out = plan_summary(&plan);
		assert_eq!(row_with(&out, "pwn-02"), vec!["pwn-02", "update", "tags, files"]);
		assert_eq!(row_with(&out, "web-01"), vec!["web-01", "create", "everything"]);
		// sorted by challenge id
		assert!(out.find("pwn-02").unwrap() < out.find("web-01").unwrap());
	}

	#[test]
	fn test_issue_breakdown() {
		let mut book = ValidationBook::new();
		let p = Path::new("x");
		let _ = book.issue(Severity::Error, Some("web-01"), p, "e", "");
		let _ = book.issue(Severity::Warning, Some("web-01"), p, "w", "");
		let out = issue_summary(&book);
		assert_eq!(row_with(&out, "web-01"), vec!["web-01", "2 issues (1 error, 1 warning)"]);
	}
}

// vim: ts=4
