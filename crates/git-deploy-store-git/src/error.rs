//! Error types for git-deploy repository operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for repository operations.
pub type Result<T> = std::result::Result<T, GitStoreError>;

/// Errors that can occur during `BareRepo` operations.
#[derive(Error, Debug)]
pub enum GitStoreError {
    /// Git repository error.
    #[error("Git repository error: {0}")]
    GitError(#[from] git2::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The branch to create is already present.
    #[error("Branch {0} already exists")]
    BranchExists(String),

    /// The path does not hold a git directory.
    #[error("{} is probably not a git repository", .0.display())]
    NotARepository(PathBuf),
}
