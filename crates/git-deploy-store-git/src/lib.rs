//! Bare repository operations for git-deploy.

mod error;

pub use error::{GitStoreError, Result};

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use git_deploy_core::{CheckoutReport, TreeMaterializer};
use git2::{FileMode, Oid, Repository, Signature};
use tracing::{debug, error, info};

/// Author and committer of commits created by git-deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// E-mail address.
    pub email: String,
}

/// A bare repository whose HEAD is kept on a primary branch.
pub struct BareRepo {
    repo: Repository,
    path: PathBuf,
    primary_branch: String,
}

impl BareRepo {
    /// Open an existing git directory at `path`.
    ///
    /// # Errors
    /// Returns an error if `path` does not look like a git directory or cannot be opened.
    pub fn open(path: impl AsRef<Path>, primary_branch: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.join("HEAD").exists() {
            return Err(GitStoreError::NotARepository(path.to_path_buf()));
        }
        let repo = Repository::open(path)?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            primary_branch: primary_branch.to_owned(),
        })
    }

    /// Initialize a new bare repository at `path` with HEAD on `primary_branch`.
    ///
    /// # Errors
    /// Returns an error if the repository cannot be created.
    pub fn init(path: impl AsRef<Path>, primary_branch: &str) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::init_bare(path)?;
        repo.set_head(&branch_ref(primary_branch))?;
        info!(path = %path.display(), primary = primary_branch, "Initialized bare repository");
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            primary_branch: primary_branch.to_owned(),
        })
    }

    /// Location of the git directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Branch HEAD is restored to after every checkout.
    #[must_use]
    pub fn primary_branch(&self) -> &str {
        &self.primary_branch
    }

    /// Whether `refs/heads/<branch>` exists.
    #[must_use]
    pub fn has_branch(&self, branch: &str) -> bool {
        self.repo.find_reference(&branch_ref(branch)).is_ok()
    }

    /// Create `branch` as a root commit holding a single file.
    ///
    /// # Errors
    /// Returns an error if the branch already exists or any object cannot be written.
    pub fn create_branch_with_file(
        &self,
        branch: &str,
        file_name: &str,
        contents: &[u8],
        author: &Identity,
        message: &str,
    ) -> Result<Oid> {
        if self.has_branch(branch) {
            return Err(GitStoreError::BranchExists(branch.to_owned()));
        }
        let refname = branch_ref(branch);

        let blob = self.repo.blob(contents)?;
        let mut builder = self.repo.treebuilder(None)?;
        builder.insert(file_name, blob, i32::from(FileMode::Blob))?;
        let tree = self.repo.find_tree(builder.write()?)?;

        let sig = Signature::now(&author.name, &author.email)?;
        let oid = self
            .repo
            .commit(Some(&refname), &sig, &sig, message, &tree, &[])?;
        info!(%oid, %refname, file = file_name, "Created branch");
        Ok(oid)
    }

    /// Check out `branch` into `target` (relative paths resolve against the git dir).
    ///
    /// Every call uses a throwaway index so nothing cached from an earlier
    /// checkout leaks into this one. HEAD points at `branch` only while git
    /// runs and is put back on the primary branch afterwards, even on failure.
    ///
    /// # Errors
    /// Returns an error if the target cannot be created, HEAD cannot be moved
    /// or git cannot be started. A checkout that runs and fails is reported
    /// through [`CheckoutReport::success`] instead.
    pub fn checkout(&self, target: &Path, branch: &str) -> Result<CheckoutReport> {
        let target = self.path.join(target);
        fs::create_dir_all(&target)?;
        let index_dir = tempfile::Builder::new()
            .prefix("git-deploy-index-")
            .tempdir()?;

        let mut work_tree = OsString::from("--work-tree=");
        work_tree.push(&target);

        let _head = HeadGuard::repoint(&self.repo, branch, &self.primary_branch)?;
        debug!(%branch, target = %target.display(), "Checking out");
        let output = Command::new("git")
            .arg("--git-dir")
            .arg(&self.path)
            .arg(work_tree)
            .args(["checkout", branch, "-f", "--quiet"])
            .env("GIT_INDEX_FILE", index_dir.path().join("index"))
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CheckoutReport {
            success: output.status.success(),
            output: text,
        })
    }
}

impl TreeMaterializer for BareRepo {
    fn materialize(&self, target: &Path, branch: &str) -> CheckoutReport {
        self.checkout(target, branch).unwrap_or_else(|err| {
            error!(%branch, target = %target.display(), "Checkout failed: {err}");
            CheckoutReport::failed(format!("Checkout of {branch} failed: {err}\n"))
        })
    }
}

/// Keeps HEAD on a branch for as long as it lives.
struct HeadGuard<'r> {
    repo: &'r Repository,
    restore: String,
}

impl<'r> HeadGuard<'r> {
    fn repoint(repo: &'r Repository, branch: &str, restore: &str) -> Result<Self> {
        repo.set_head(&branch_ref(branch))?;
        Ok(Self {
            repo,
            restore: branch_ref(restore),
        })
    }
}

impl Drop for HeadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.repo.set_head(&self.restore) {
            error!(head = %self.restore, "Failed to restore HEAD: {err}");
        }
    }
}

fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}
