//! The receive hook shim written into `hooks/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use git_deploy_hooks::Phase;
use tracing::debug;

/// File name of the shim both receive hooks link to.
pub const HANDLER_FILE: &str = "git-deploy-receive";

/// Shell shim that hands a hook invocation over to the git-deploy binary.
#[derive(Debug, Clone)]
pub struct HandlerScript {
    binary: PathBuf,
    config_branch: String,
    primary_branch: String,
}

impl HandlerScript {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, config_branch: &str, primary_branch: &str) -> Self {
        Self {
            binary: binary.into(),
            config_branch: config_branch.to_owned(),
            primary_branch: primary_branch.to_owned(),
        }
    }

    /// Script text. `$0` carries the hook name git invoked, which selects the phase.
    #[must_use]
    pub fn render(&self) -> String {
        let binary = self.binary.to_string_lossy();
        format!(
            "#!/bin/sh\n\
             # Installed by git-deploy. Pushes to `{branch}` update hooks/custom.\n\
             exec {binary} hook \"$0\" --branch {branch_arg} --primary-branch {primary}\n",
            branch = self.config_branch,
            binary = shell_words::quote(&binary),
            branch_arg = shell_words::quote(&self.config_branch),
            primary = shell_words::quote(&self.primary_branch),
        )
    }

    /// Write the shim into `hooks_dir` and link `pre-receive` and `post-receive` to it.
    ///
    /// Existing receive hooks are never overwritten.
    ///
    /// # Errors
    /// Returns an error if a receive hook is already present or a file cannot be written.
    pub fn install(&self, hooks_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(hooks_dir)
            .with_context(|| format!("failed to create {}", hooks_dir.display()))?;

        let links = ensure_hooks_free(hooks_dir)?;

        let script = hooks_dir.join(HANDLER_FILE);
        fs::write(&script, self.render())
            .with_context(|| format!("failed to write {}", script.display()))?;
        make_executable(&script)?;
        debug!(path = %script.display(), "Wrote hook handler");

        for link in &links {
            link_handler(&script, link)?;
            debug!(link = %link.display(), "Linked hook");
        }
        Ok(script)
    }
}

/// Fail if `hooks_dir` already holds a receive hook; returns the paths to link.
///
/// # Errors
/// Returns an error naming the first receive hook that is already present.
pub fn ensure_hooks_free(hooks_dir: &Path) -> Result<Vec<PathBuf>> {
    let links: Vec<PathBuf> = [Phase::PreReceive, Phase::PostReceive]
        .iter()
        .map(|phase| hooks_dir.join(phase.hook_name()))
        .collect();
    if let Some(existing) = links.iter().find(|link| link.symlink_metadata().is_ok()) {
        bail!("{} already exists", existing.display());
    }
    Ok(links)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn link_handler(_script: &Path, link: &Path) -> Result<()> {
    // Relative target so the repository can be moved.
    std::os::unix::fs::symlink(HANDLER_FILE, link)
        .with_context(|| format!("failed to link {}", link.display()))
}

#[cfg(not(unix))]
fn link_handler(script: &Path, link: &Path) -> Result<()> {
    fs::copy(script, link)
        .map(|_| ())
        .with_context(|| format!("failed to copy {}", link.display()))
}
