use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chalsync::commands::{self, Selection};
use chalsync::config::{DeployConfig, ENV_TOKEN, ENV_URL};
use chalsync::error::DeployError;
use chalsync::logging::*;
use chalsync::reconcile::StopFlag;
use chalsync::remote::HttpRemote;
use chalsync::utils::{self, terminal};

fn cli() -> Command {
	let selection_args = || {
		[
			Arg::new("challenges")
				.value_name("CHALLENGE_ID")
				.action(ArgAction::Append)
				.num_args(0..)
				.help("Challenges to work on (default: all in the repository)"),
			Arg::new("skip")
				.short('s')
				.long("skip")
				.value_name("CHALLENGE_ID")
				.action(ArgAction::Append)
				.help("Challenge to leave out (repeatable)"),
		]
	};

	Command::new("chalsync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Deploy CTF challenges from a repository to a CTFd instance")
		.subcommand_required(true)
		.arg(
			Arg::new("repo")
				.short('R')
				.long("repo")
				.value_name("PATH")
				.default_value(".")
				.global(true)
				.help("Path to the challenge repository"),
		)
		.arg(
			Arg::new("verbose")
				.short('v')
				.long("verbose")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Show debug output"),
		)
		.subcommand(Command::new("validate").about("Validate local challenge sources").args(selection_args()))
		.subcommand(
			Command::new("deploy")
				.about("Deploy challenges to a live CTFd instance")
				.args(selection_args())
				.arg(
					Arg::new("url")
						.short('u')
						.long("url")
						.value_name("URL")
						.help(format!("CTFd URL (overrides ${} and the repo config)", ENV_URL)),
				)
				.arg(
					Arg::new("token")
						.short('t')
						.long("token")
						.value_name("TOKEN")
						.help(format!("CTFd API token (overrides ${})", ENV_TOKEN)),
				),
		)
		.subcommand(Command::new("version").about("Print the version"))
}

fn selection(matches: &ArgMatches) -> Selection {
	let strings = |id: &str| -> Vec<String> {
		matches.get_many::<String>(id).map(|v| v.cloned().collect()).unwrap_or_default()
	};
	Selection { ids: strings("challenges"), skip: strings("skip") }
}

async fn deploy(repo: &Path, matches: &ArgMatches) -> Result<(), DeployError> {
	let source = commands::validate(repo, &selection(matches))?;

	let mut config = DeployConfig::default();
	config.apply_repo(source.repo.config());
	config.apply_env();
	config.apply_cli(
		matches.get_one::<String>("url").cloned(),
		matches.get_one::<String>("token").cloned(),
	);

	if config.url.is_none() {
		config.url = Some(terminal::prompt("Enter the CTFd URL (including the scheme, excluding any path)")?);
	}
	if config.token.is_none() {
		config.token = Some(terminal::prompt_hidden("Enter a CTFd API token to continue")?);
	}
	let remote_config = config.remote_config().ok_or(DeployError::Aborted)?;
	let remote = HttpRemote::new(&remote_config)?;

	let stop = StopFlag::new();
	utils::setup_signal_handlers(stop.clone());

	commands::deploy(&source, Arc::new(remote), &config, stop, |_| {
		terminal::confirm("Do you want to apply these changes?")
	})
	.await?;
	Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
	let matches = cli().get_matches();
	chalsync::logging::init_tracing(matches.get_flag("verbose"));

	let repo = PathBuf::from(matches.get_one::<String>("repo").map(String::as_str).unwrap_or("."));

	let result = match matches.subcommand() {
		Some(("validate", sub)) => commands::validate(&repo, &selection(sub)).map(|_| ()),
		Some(("deploy", sub)) => deploy(&repo, sub).await,
		Some(("version", _)) => {
			println!("chalsync {}", env!("CARGO_PKG_VERSION"));
			Ok(())
		}
		_ => Ok(()),
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::from(e.exit_code() as u8)
		}
	}
}

// vim: ts=4
