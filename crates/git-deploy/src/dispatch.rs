use std::env;
use std::io::{self, Write};
use std::path::{self, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use git_deploy_core::{CONFIG_DIR, CONFIG_FILE};
use git_deploy_hooks::{DispatchSettings, Dispatcher, Phase, read_config};
use git_deploy_store_git::BareRepo;
use tracing::debug;

use crate::HookArgs;

/// Run one receive hook invocation over the events on stdin.
pub fn run(args: HookArgs) -> Result<ExitCode> {
    let HookArgs {
        invoked_as,
        repo,
        branch,
        primary_branch,
    } = args;

    let phase = Phase::from_invocation(&invoked_as)?;
    let git_dir = path::absolute(resolve_git_dir(repo))?;
    let config_dir = git_dir.join(CONFIG_DIR);
    debug!(%phase, git_dir = %git_dir.display(), "Running hook");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let config = read_config(&config_dir.join(CONFIG_FILE), &mut out);
    let repo = BareRepo::open(&git_dir, &primary_branch)
        .with_context(|| format!("failed to open {}", git_dir.display()))?;

    let settings = DispatchSettings {
        config_dir,
        config_branch: branch,
    };
    let dispatcher = Dispatcher::new(phase, config, settings, repo);
    let outcome = dispatcher.dispatch(io::stdin().lock(), &mut out)?;
    out.flush()?;

    Ok(outcome.exit_code())
}

fn resolve_git_dir(repo: Option<PathBuf>) -> PathBuf {
    repo.or_else(|| env::var_os("GIT_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
