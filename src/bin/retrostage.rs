// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use retrostage::{
    config::InstallProfile,
    installer::{InstallOutcome, Installer},
    manifest::ManifestFile,
    path::default_profile_path,
    state::{Decision, DecisionRequest, InstallationState},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use crossterm::{cursor, execute, terminal};
use inquire::{error::InquireResult, Confirm, Select};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::IsTerminal,
    path::PathBuf,
    process::exit,
    sync::mpsc::{self, Receiver},
    thread,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "retrostage [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to install profile instead of the default one.
    #[arg(short, long, global = true, value_name = "path")]
    pub profile: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let profile = load_profile(self.profile)?;
        match self.command {
            Command::Install(opts) => run_install(profile, opts).await,
            Command::Status => run_status(profile),
            Command::Clean(opts) => run_clean(profile, opts),
            Command::Profile => run_profile(profile),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install application, resuming an interrupted installation if asked to.
    #[command(override_usage = "retrostage install [options]")]
    Install(InstallOptions),

    /// Show what is installed.
    #[command(override_usage = "retrostage status [options]")]
    Status,

    /// Remove leftovers of earlier installations.
    #[command(override_usage = "retrostage clean [options]")]
    Clean(CleanOptions),

    /// Print install profile in use.
    #[command(override_usage = "retrostage profile [options]")]
    Profile,
}

#[derive(Args, Clone, Debug)]
struct InstallOptions {
    /// Resume interrupted installation without asking.
    #[arg(long, group = "answer")]
    pub resume: bool,

    /// Remove earlier artifacts and start over without asking.
    #[arg(long, group = "answer")]
    pub restart: bool,

    /// Answer yes: resume interrupted installation, or reinstall.
    #[arg(short, long, group = "answer")]
    pub yes: bool,

    /// Do not start application after installing it.
    #[arg(long)]
    pub no_launch: bool,
}

#[derive(Args, Clone, Debug)]
struct CleanOptions {
    /// Also remove installed application and its autostart entry.
    #[arg(long)]
    pub purge: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn load_profile(path: Option<PathBuf>) -> Result<InstallProfile> {
    let path = match path {
        Some(path) => path,
        None => default_profile_path()?,
    };
    if !path.exists() {
        info!("no profile at {:?}, use built-in profile", path.display());
    }

    Ok(InstallProfile::load(path)?)
}

async fn run_install(mut profile: InstallProfile, opts: InstallOptions) -> Result<()> {
    if opts.no_launch {
        profile.settings.launch = false;
    }
    let timeout = profile.settings.prompt_timeout();
    let installer = Installer::new(profile)?;

    let assessment = installer.assess();
    let decision = match assessment.request {
        Some(request) => {
            let decision = answer_ahead(request, &opts).unwrap_or_else(|| ask(request, timeout));
            if decision == Decision::Abort {
                info!("installation cancelled, nothing changed");
                return Ok(());
            }
            Some(decision)
        }
        None => None,
    };

    match installer.install(decision).await? {
        InstallOutcome::Installed(report) => println!("{report}"),
        InstallOutcome::Declined => info!("nothing changed"),
    }

    Ok(())
}

fn run_status(profile: InstallProfile) -> Result<()> {
    let layout = profile.layout();
    let manifest = ManifestFile::new(layout.manifest_path()).load()?;
    let state = InstallationState::probe(&layout);

    println!("{} at {}", profile.settings.name, layout.root().display());
    println!("phase:               {}", state.phase());
    match manifest.stage {
        Some(stage) => println!("last stage:          {stage}"),
        None => println!("last stage:          none"),
    }
    println!("{state}");

    Ok(())
}

fn run_clean(profile: InstallProfile, opts: CleanOptions) -> Result<()> {
    let installer = Installer::new(profile)?;
    installer.clean(opts.purge)?;

    Ok(())
}

fn run_profile(profile: InstallProfile) -> Result<()> {
    print!("{profile}");
    Ok(())
}

/// Decision given through command line flags, if any.
fn answer_ahead(request: DecisionRequest, opts: &InstallOptions) -> Option<Decision> {
    if opts.restart {
        return Some(Decision::Restart);
    }

    match request {
        DecisionRequest::ResumeOrRestart if opts.resume || opts.yes => Some(Decision::Resume),
        DecisionRequest::Reinstall if opts.yes => Some(Decision::Restart),
        _ => None,
    }
}

/// Ask operator, treating silence as abort.
fn ask(request: DecisionRequest, timeout: Duration) -> Decision {
    if !std::io::stdin().is_terminal() {
        warn!("{request} No terminal to ask on, so leave it alone.");
        return Decision::Abort;
    }

    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(prompt(request));
    });

    wait_for_answer(&receiver, timeout, restore_terminal)
}

/// Wait for prompt thread, running `on_timeout` if it never answers.
fn wait_for_answer(
    receiver: &Receiver<InquireResult<Decision>>,
    timeout: Duration,
    on_timeout: impl FnOnce(),
) -> Decision {
    match receiver.recv_timeout(timeout) {
        Ok(Ok(decision)) => decision,
        Ok(Err(err)) => {
            warn!("no answer: {err}");
            Decision::Abort
        }
        Err(_) => {
            on_timeout();
            warn!("no answer within {}s", timeout.as_secs());
            Decision::Abort
        }
    }
}

/// Undo what an abandoned prompt did to the terminal.
fn restore_terminal() {
    if let Err(err) = terminal::disable_raw_mode() {
        warn!("failed to restore terminal: {err}");
    }
    let mut stderr = std::io::stderr();
    if stderr.is_terminal() {
        let _ = execute!(stderr, cursor::Show);
        eprintln!();
    }
}

fn prompt(request: DecisionRequest) -> InquireResult<Decision> {
    match request {
        DecisionRequest::ResumeOrRestart => {
            let choices = request.choices().iter().copied().map(Choice).collect();
            let message = format!("{request} What should happen?");
            Ok(Select::new(&message, choices).prompt()?.0)
        }
        DecisionRequest::Reinstall => {
            let message = format!("{request} Reinstall it?");
            let reinstall = Confirm::new(&message).with_default(false).prompt()?;
            Ok(if reinstall {
                Decision::Restart
            } else {
                Decision::Abort
            })
        }
    }
}

/// Menu entry of a decision.
struct Choice(Decision);

impl Display for Choice {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let label = match self.0 {
            Decision::Resume => "Resume where it stopped",
            Decision::Restart => "Remove everything and start over",
            Decision::Abort => "Cancel",
        };
        fmt.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn opts(resume: bool, restart: bool, yes: bool) -> InstallOptions {
        InstallOptions {
            resume,
            restart,
            yes,
            no_launch: false,
        }
    }

    #[test_case(DecisionRequest::ResumeOrRestart, opts(true, false, false), Some(Decision::Resume); "resume partial")]
    #[test_case(DecisionRequest::ResumeOrRestart, opts(false, false, true), Some(Decision::Resume); "yes partial")]
    #[test_case(DecisionRequest::ResumeOrRestart, opts(false, true, false), Some(Decision::Restart); "restart partial")]
    #[test_case(DecisionRequest::Reinstall, opts(true, false, false), None; "resume complete")]
    #[test_case(DecisionRequest::Reinstall, opts(false, false, true), Some(Decision::Restart); "yes complete")]
    #[test_case(DecisionRequest::Reinstall, opts(false, false, false), None; "no flags")]
    #[test]
    fn answer_ahead_maps_flags(
        request: DecisionRequest,
        opts: InstallOptions,
        expect: Option<Decision>,
    ) {
        pretty_assertions::assert_eq!(answer_ahead(request, &opts), expect);
    }

    #[test]
    fn silent_prompt_restores_terminal_and_aborts() {
        let (_sender, receiver) = mpsc::channel();
        let mut restored = false;

        let decision = wait_for_answer(&receiver, Duration::from_millis(10), || restored = true);
        assert_eq!(decision, Decision::Abort);
        assert!(restored);
    }

    #[test]
    fn answered_prompt_leaves_terminal_alone() {
        let (sender, receiver) = mpsc::channel();
        sender.send(Ok(Decision::Resume)).unwrap();
        let mut restored = false;

        let decision = wait_for_answer(&receiver, Duration::from_secs(1), || restored = true);
        assert_eq!(decision, Decision::Resume);
        assert!(!restored);
    }

    #[test]
    fn restore_terminal_without_raw_mode_is_harmless() {
        restore_terminal();
    }

    #[test]
    fn cli_rejects_conflicting_answers() {
        let result = Cli::try_parse_from(["retrostage", "install", "--resume", "--restart"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_accepts_global_profile_after_subcommand() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["retrostage", "status", "--profile", "/tmp/blah.toml"])?;
        assert_eq!(cli.profile, Some(PathBuf::from("/tmp/blah.toml")));

        Ok(())
    }
}
