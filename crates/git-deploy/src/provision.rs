use std::env;
use std::fs;
use std::path::{self, Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use git_deploy_core::{CONFIG_DIR, CONFIG_FILE, DeployConfig};
use git_deploy_store_git::{BareRepo, Identity};
use tracing::{debug, info, warn};

use crate::InitArgs;
use crate::handler::{self, HandlerScript};
use crate::hints::{self, Hints};

/// Provision a repository: bare repo, configuration branch, hook shim, checked-out config.
pub fn run(args: &InitArgs) -> Result<()> {
    let path = normalize(&path::absolute(&args.path)?);
    debug!(path = %path.display(), "Provisioning");

    let repo = open_or_init(&path, &args.primary_branch)?;
    let hooks_dir = path.join("hooks");
    handler::ensure_hooks_free(&hooks_dir)?;

    let seed = DeployConfig::seed_document().context("failed to render the seed configuration")?;
    let author = Identity {
        name: args.git_user.clone(),
        email: args.git_email.clone(),
    };
    repo.create_branch_with_file(
        &args.branch,
        CONFIG_FILE,
        seed.as_bytes(),
        &author,
        &args.git_msg,
    )
    .with_context(|| format!("failed to create the {} branch", args.branch))?;

    let binary = env::current_exe().context("failed to locate the git-deploy executable")?;
    let script = HandlerScript::new(binary, &args.branch, &args.primary_branch)
        .install(&hooks_dir)?;
    info!(script = %script.display(), "Installed receive hooks");

    let report = repo
        .checkout(Path::new(CONFIG_DIR), &args.branch)
        .with_context(|| format!("failed to check out {}", args.branch))?;
    if !report.success {
        bail!(
            "checking out {} into {CONFIG_DIR} failed:\n{}",
            args.branch,
            report.output.trim_end()
        );
    }
    info!(dir = %path.join(CONFIG_DIR).display(), "Checked out configuration");

    if !args.offline {
        print_hints(args, path);
    }
    Ok(())
}

fn open_or_init(path: &Path, primary_branch: &str) -> Result<BareRepo> {
    if path.exists() {
        debug!(path = %path.display(), "Using existing directory");
        return Ok(BareRepo::open(path, primary_branch)?);
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    BareRepo::init(path, primary_branch)
        .with_context(|| format!("failed to initialize {}", path.display()))
}

fn print_hints(args: &InitArgs, path: PathBuf) {
    let host = match hints::public_ip(&args.ip_service) {
        Ok(host) => host,
        Err(err) => {
            warn!("Could not determine the public address ({err:#}); rerun with --offline to skip");
            return;
        }
    };
    let hints = Hints {
        origin: args.origin.clone(),
        config_branch: args.branch.clone(),
        user: hints::current_user(),
        host,
        path,
    };
    println!("\n{hints}");
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
