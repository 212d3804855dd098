//! CLI entry point for git-deploy.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use git_deploy_core::{DEFAULT_CONFIG_BRANCH, DEFAULT_PRIMARY_BRANCH};
use git_deploy_hooks::Phase;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod dispatch;
mod handler;
mod hints;
mod provision;

/// Bare repositories whose push hooks are configured from a branch.
#[derive(Parser, Debug)]
#[command(
    name = "git-deploy",
    version,
    about = "git-deploy: bare repositories with push hooks driven by a configuration branch"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a bare repository (if needed) and install the hook configuration branch.
    Init(InitArgs),

    /// Dispatch push events read from stdin; run by the installed receive hooks.
    Hook(HookArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Path for the git repository.
    path: PathBuf,

    /// Remote name used in the printed hints.
    #[arg(short, long, default_value = "dev")]
    origin: String,

    /// Branch holding the hook configuration.
    #[arg(short, long, default_value = DEFAULT_CONFIG_BRANCH)]
    branch: String,

    /// Branch HEAD is kept on between checkouts.
    #[arg(long, default_value = DEFAULT_PRIMARY_BRANCH)]
    primary_branch: String,

    /// Log every step.
    #[arg(short, long)]
    verbose: bool,

    /// Author name of the initial configuration commit.
    #[arg(long, default_value = "GitBot")]
    git_user: String,

    /// Author e-mail of the initial configuration commit.
    #[arg(long, default_value = "gitbot@localhost")]
    git_email: String,

    /// Message of the initial configuration commit.
    #[arg(long, default_value = "Initial config")]
    git_msg: String,

    /// Skip looking up the public address and printing the hints.
    #[arg(long)]
    offline: bool,

    /// Service answering with the caller's public IP address as plain text.
    #[arg(long, default_value = hints::DEFAULT_IP_SERVICE)]
    ip_service: String,
}

#[derive(Args, Debug)]
struct HookArgs {
    /// Name (or path) the hook was invoked under: `pre-receive` or `post-receive`.
    invoked_as: PathBuf,

    /// Git directory of the repository (defaults to `$GIT_DIR`, then the current directory).
    #[arg(long)]
    repo: Option<PathBuf>,

    /// Branch holding the hook configuration.
    #[arg(short, long, default_value = DEFAULT_CONFIG_BRANCH)]
    branch: String,

    /// Branch HEAD is kept on between checkouts.
    #[arg(long, default_value = DEFAULT_PRIMARY_BRANCH)]
    primary_branch: String,
}

impl HookArgs {
    /// Arguments for a process started directly as `pre-receive`/`post-receive`.
    fn invoked_as(invoked_as: PathBuf) -> Self {
        Self {
            invoked_as,
            repo: None,
            branch: DEFAULT_CONFIG_BRANCH.to_owned(),
            primary_branch: DEFAULT_PRIMARY_BRANCH.to_owned(),
        }
    }
}

fn main() -> Result<ExitCode> {
    if let Some(invoked_as) = hook_invocation() {
        install_tracing(Level::WARN);
        return dispatch::run(HookArgs::invoked_as(invoked_as));
    }

    let Cli { cmd } = Cli::parse();
    match cmd {
        Command::Init(args) => {
            install_tracing(if args.verbose { Level::DEBUG } else { Level::INFO });
            provision::run(&args)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Hook(args) => {
            install_tracing(Level::WARN);
            dispatch::run(args)
        }
    }
}

/// The program path, when the binary itself is linked in as a receive hook.
fn hook_invocation() -> Option<PathBuf> {
    let argv0 = PathBuf::from(std::env::args_os().next()?);
    Phase::from_invocation(&argv0).ok().map(|_| argv0)
}

fn install_tracing(default_level: Level) {
    // stdout is relayed to the pushing client, so logs go to stderr.
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}
