/// Repository loading tests - validation issue codes and the deploy pipeline
///
/// Tests verify:
/// 1. A well-formed repository loads without issues
/// 2. Repository and challenge problems are reported under stable codes
/// 3. Selection and skip lists pick the right challenges
/// 4. A validated repository deploys and converges
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use chalsync::commands;
use chalsync::config::DeployConfig;
use chalsync::reconcile::StopFlag;
use chalsync::remote::{MemoryRemote, RemoteCall};
use chalsync::source::load_sources;
use chalsync::validation::{Severity, ValidationBook};

const REPO_TOML: &str = r#"categories = ["web", "pwn", "misc"]
"#;

fn write(root: &Path, name: &str, content: &str) {
	let path = root.join(name);
	fs::create_dir_all(path.parent().unwrap()).unwrap();
	fs::write(path, content).unwrap();
}

/// challenge.toml for a challenge without warnings
fn challenge_toml(slug: &str, category: &str) -> String {
	format!(
		r#"[meta]
id = "{slug}"
name = "Challenge {slug}"
category = "{category}"
difficulty = "easy"
description = "Find the flag"
tags = ["intro"]

[scoring]
flag = "flag{{{slug}}}"
points = 100

[[hints]]
content = "Start somewhere"
"#
	)
}

/// Repository with valid challenges for each `(slug, category)`
fn repo(challenges: &[(&str, &str)]) -> TempDir {
	let tmp = TempDir::new().unwrap();
	write(tmp.path(), "repo.toml", REPO_TOML);
	for (slug, category) in challenges {
		write(tmp.path(), &format!("{}/challenge.toml", slug), &challenge_toml(slug, category));
	}
	tmp
}

fn codes(book: &ValidationBook, challenge: Option<&str>) -> Vec<&'static str> {
	book.issues_for(challenge).map(|i| i.code).collect()
}

fn strings(v: &[&str]) -> Vec<String> {
	v.iter().map(|s| s.to_string()).collect()
}

// ===================================================================
// REPOSITORY
// ===================================================================

#[test]
fn test_clean_repository_loads() {
	let tmp = repo(&[("web-01", "web"), ("pwn-02", "pwn")]);
	fs::create_dir_all(tmp.path().join("notes")).unwrap();

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();

	assert!(book.is_empty(), "unexpected issues: {:?}", book.issues());
	let slugs: Vec<&str> = source.challenges.iter().map(|c| c.slug()).collect();
	assert_eq!(slugs, vec!["pwn-02", "web-01"]);

	let web = &source.challenges[1];
	assert_eq!(web.name, "Challenge web-01");
	assert_eq!(web.tags, vec!["intro"]);
	assert_eq!(web.hints, vec!["Start somewhere"]);
	assert_eq!(web.flags, vec!["flag{web-01}"]);
}

#[test]
fn test_missing_repository() {
	let tmp = TempDir::new().unwrap();
	let mut book = ValidationBook::new();
	assert!(load_sources(&mut book, &tmp.path().join("nope"), &[], &[]).is_err());
	assert_eq!(codes(&book, None), vec!["repo-not-found"]);
	assert_eq!(book.max_severity(None), Some(Severity::Fatal));
}

#[test]
fn test_missing_repository_config() {
	let tmp = TempDir::new().unwrap();
	let mut book = ValidationBook::new();
	assert!(load_sources(&mut book, tmp.path(), &[], &[]).is_err());
	assert_eq!(codes(&book, None), vec!["repo-config-not-found"]);
}

#[test]
fn test_repository_config_errors() {
	let cases = [
		("categories = [", "repo-config-invalid-toml"),
		("categories = [\"web\"]\ncolour = \"blue\"\n", "repo-config-schema-failure"),
		("categories = [\"Web Stuff\"]\n", "repo-config-category-invalid"),
		("categories = [\"web\", \"web\"]\n", "repo-config-category-duplicate"),
	];
	for (content, code) in cases {
		let tmp = TempDir::new().unwrap();
		write(tmp.path(), "repo.toml", content);

		let mut book = ValidationBook::new();
		assert!(load_sources(&mut book, tmp.path(), &[], &[]).is_err(), "{} should fail", code);
		assert_eq!(codes(&book, None), vec![code]);
	}
}

#[test]
fn test_zero_concurrency_only_warns() {
	let tmp = TempDir::new().unwrap();
	write(tmp.path(), "repo.toml", "categories = [\"web\"]\n\n[deploy]\nwrite_concurrency = 0\n");

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert_eq!(codes(&book, None), vec!["repo-config-concurrency-invalid"]);

	let mut config = DeployConfig::default();
	config.apply_repo(source.repo.config());
	assert_eq!(config.write_concurrency, 3);
}

// ===================================================================
// CHALLENGES
// ===================================================================

#[test]
fn test_challenge_errors_are_reported() {
	let tmp = repo(&[("web-01", "web")]);
	write(tmp.path(), "bad-01/challenge.toml", &challenge_toml("bad-01", "crypto"));
	write(
		tmp.path(),
		"bad-02/challenge.toml",
		"[meta]\nid = \"bad-03\"\ncategory = \"web\"\ndifficulty = \"easy\"\n\n[scoring]\npoints = 1\n",
	);

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();

	assert_eq!(source.challenges.len(), 1);
	assert_eq!(source.failed.iter().collect::<Vec<_>>(), vec!["bad-01", "bad-02"]);
	assert_eq!(codes(&book, Some("bad-01")), vec!["challenge-config-category-invalid"]);

	let bad = codes(&book, Some("bad-02"));
	assert!(bad.contains(&"challenge-config-id-mismatch"));
	assert!(bad.contains(&"challenge-config-missing-flag"));
	assert!(bad.contains(&"challenge-config-missing-name"));
	assert!(bad.contains(&"challenge-config-missing-description"));
	assert!(book.has_errors());
}

#[test]
fn test_challenge_config_schema_failure() {
	let tmp = repo(&[]);
	write(tmp.path(), "web-01/challenge.toml", &format!("{}\nauthor = \"me\"\n", challenge_toml("web-01", "web")));

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert!(source.challenges.is_empty());
	assert_eq!(codes(&book, Some("web-01")), vec!["challenge-config-schema-failure"]);
}

#[test]
fn test_selected_challenge_must_exist() {
	let tmp = repo(&[("web-01", "web")]);
	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &strings(&["web-09", "X"]), &[]).unwrap();

	assert!(source.challenges.is_empty());
	assert_eq!(codes(&book, Some("web-09")), vec!["challenge-not-found"]);
	assert_eq!(codes(&book, Some("X")), vec!["challenge-id-invalid"]);
}

/// challenge.toml with containers `app` and `db`
fn container_toml(slug: &str) -> String {
	format!(
		"{}\n[dynamic.app]\nbuild = \"app/Containerfile\"\nports = {{ http = 8080 }}\n\n[dynamic.db]\nbuild = \"db.Containerfile\"\n",
		challenge_toml(slug, "web")
	)
}

#[test]
fn test_container_challenge_loads() {
	let tmp = repo(&[]);
	write(tmp.path(), "web-01/challenge.toml", &container_toml("web-01"));
	write(tmp.path(), "web-01/dynamic/app/Containerfile", "FROM scratch\n");
	write(tmp.path(), "web-01/dynamic/db.Containerfile", "FROM scratch\n");

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert!(book.is_empty(), "unexpected issues: {:?}", book.issues());
	assert_eq!(source.challenges.len(), 1);
	assert_eq!(source.challenges[0].flags, vec!["flag{web-01}"]);
}

#[test]
fn test_container_section_without_directory() {
	let tmp = repo(&[]);
	write(tmp.path(), "web-01/challenge.toml", &container_toml("web-01"));

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert!(source.failed.contains("web-01"));
	assert_eq!(
		codes(&book, Some("web-01")),
		vec![
			"challenge-dynamic-dir-missing",
			"challenge-dynamic-build-file-missing",
			"challenge-dynamic-build-file-missing",
		]
	);
}

#[test]
fn test_container_build_file_missing() {
	let tmp = repo(&[]);
	write(tmp.path(), "web-01/challenge.toml", &container_toml("web-01"));
	write(tmp.path(), "web-01/dynamic/app/Containerfile", "FROM scratch\n");

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert!(source.failed.contains("web-01"));
	assert_eq!(codes(&book, Some("web-01")), vec!["challenge-dynamic-build-file-missing"]);
	let issue = book.issues_for(Some("web-01")).next().unwrap();
	assert!(issue.message.contains("\"db\""), "{}", issue.message);
}

#[test]
fn test_dynamic_directory_without_section_warns() {
	let tmp = repo(&[("web-01", "web")]);
	fs::create_dir_all(tmp.path().join("web-01/dynamic")).unwrap();

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert_eq!(source.challenges.len(), 1);
	assert_eq!(codes(&book, Some("web-01")), vec!["challenge-dynamic-section-missing"]);
}

#[test]
fn test_dynamic_score() {
	let tmp = repo(&[]);
	let toml = challenge_toml("web-01", "web")
		.replace("points = 100", "points = 100\ndynamic = { initial = 100, minimum = 500, decay = 10 }");
	write(tmp.path(), "web-01/challenge.toml", &toml);

	let mut book = ValidationBook::new();
	load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert_eq!(
		codes(&book, Some("web-01")),
		vec!["challenge-config-points-ignored", "challenge-config-score-invalid"]
	);
}

#[test]
fn test_static_section_is_resolved() {
	let tmp = repo(&[]);
	let toml = format!(
		"{}\n[static]\ninclude = [\"static\", \"nothing/*\"]\nexclude = [\"static/solve.py\"]\n",
		challenge_toml("misc-01", "misc")
	);
	write(tmp.path(), "misc-01/challenge.toml", &toml);
	write(tmp.path(), "misc-01/static/chall.bin", "bin");
	write(tmp.path(), "misc-01/static/solve.py", "print()");

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert_eq!(codes(&book, Some("misc-01")), vec!["challenge-static-include-matchless"]);
	let warning = book.issues_for(Some("misc-01")).next().unwrap();
	assert_eq!(warning.message, "Static include pattern did not match anything: \"nothing/*\"");

	let misc = &source.challenges[0];
	assert_eq!(misc.static_files, vec![tmp.path().join("misc-01/static/chall.bin")]);
}

#[test]
fn test_bad_static_pattern() {
	let tmp = repo(&[]);
	let toml = format!("{}\n[static]\ninclude = [\"../secrets\"]\n", challenge_toml("misc-01", "misc"));
	write(tmp.path(), "misc-01/challenge.toml", &toml);

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &[]).unwrap();
	assert!(source.failed.contains("misc-01"));
	assert_eq!(codes(&book, Some("misc-01")), vec!["challenge-static-pattern-parent"]);
}

#[test]
fn test_selection_and_skip() {
	let tmp = repo(&[("web-01", "web"), ("pwn-02", "pwn"), ("misc-03", "misc")]);

	let mut book = ValidationBook::new();
	let source = load_sources(&mut book, tmp.path(), &[], &strings(&["pwn-02"])).unwrap();
	let slugs: Vec<&str> = source.challenges.iter().map(|c| c.slug()).collect();
	assert_eq!(slugs, vec!["misc-03", "web-01"]);

	let mut book = ValidationBook::new();
	let ids = strings(&["web-01", "pwn-02", "web-01"]);
	let source = load_sources(&mut book, tmp.path(), &ids, &strings(&["pwn-02"])).unwrap();
	let slugs: Vec<&str> = source.challenges.iter().map(|c| c.slug()).collect();
	assert_eq!(slugs, vec!["web-01"]);
}

// ===================================================================
// PIPELINE
// ===================================================================

#[test]
fn test_validate_command_fails_on_errors() {
	let tmp = repo(&[("web-01", "web")]);
	assert!(commands::validate(tmp.path(), &commands::Selection::default()).is_ok());

	write(tmp.path(), "bad-01/challenge.toml", &challenge_toml("bad-01", "crypto"));
	assert!(commands::validate(tmp.path(), &commands::Selection::default()).is_err());

	let selection = commands::Selection { ids: vec![], skip: strings(&["bad-01"]) };
	assert!(commands::validate(tmp.path(), &selection).is_ok());
}

#[tokio::test]
async fn test_deploy_converges() {
	let tmp = repo(&[("web-01", "web"), ("pwn-02", "pwn")]);
	write(
		tmp.path(),
		"web-01/challenge.toml",
		&format!("{}\n[static]\ninclude = [\"static/*\"]\n", challenge_toml("web-01", "web")),
	);
	write(tmp.path(), "web-01/static/index.html", "<html></html>");
	let source = commands::validate(tmp.path(), &commands::Selection::default()).unwrap();

	let remote = Arc::new(MemoryRemote::new());
	let config = DeployConfig::default();

	let asked = Cell::new(0);
	let report = commands::deploy(&source, remote.clone(), &config, StopFlag::new(), |plan| {
		asked.set(asked.get() + 1);
		assert_eq!(plan.len(), 2);
		Ok(true)
	})
	.await
	.unwrap()
	.unwrap();
	assert_eq!(asked.get(), 1);
	assert_eq!(report.applied().count(), 2);
	let id = source.challenges[1].numeric_id();
	assert_eq!(remote.files(id).len(), 1);

	remote.clear_calls();
	let second = commands::deploy(&source, remote.clone(), &config, StopFlag::new(), |_| {
		asked.set(asked.get() + 1);
		Ok(true)
	})
	.await
	.unwrap();
	assert!(second.is_none());
	// nothing to confirm when the plan is empty
	assert_eq!(asked.get(), 1);
	assert!(remote.writes().is_empty());
}

#[tokio::test]
async fn test_declined_deploy_writes_nothing() {
	let tmp = repo(&[("web-01", "web")]);
	let source = commands::validate(tmp.path(), &commands::Selection::default()).unwrap();

	let remote = Arc::new(MemoryRemote::new());
	let result = commands::deploy(&source, remote.clone(), &DeployConfig::default(), StopFlag::new(), |plan| {
		assert_eq!(plan.len(), 1);
		Ok(false)
	})
	.await
	.unwrap();

	assert!(result.is_none());
	assert!(remote.writes().is_empty());
	assert!(!remote.calls().iter().any(|c| matches!(c, RemoteCall::CreateChallenge(_))));
}

// vim: ts=4
