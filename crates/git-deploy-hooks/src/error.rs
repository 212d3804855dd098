//! Error types for hook dispatch

use std::io;

use git_deploy_core::CommandSpecError;

/// Result type for hook operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors that can occur during hook dispatch
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The process was started under a name that is not a receive hook
    #[error("Unknown hook `{0}`: expected `pre-receive` or `post-receive`")]
    UnknownPhase(String),

    /// The follow-up command could not be turned into an argument vector
    #[error(transparent)]
    InvalidCommand(#[from] CommandSpecError),

    /// The follow-up command could not be started
    #[error("Cannot run `{command}`: {source}")]
    Spawn {
        /// Command as configured
        command: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// Waiting on the follow-up command failed
    #[error("Lost track of `{command}`: {source}")]
    Wait {
        /// Command as configured
        command: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
