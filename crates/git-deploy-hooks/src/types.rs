//! Hook phases and dispatch results

use std::{fmt, path::Path, process::ExitCode, str::FromStr};

use crate::HookError;

/// Receive hook the dispatcher is running as.
///
/// # Pre vs post
///
/// **`PreReceive`** runs before any ref is updated. Exiting non-zero aborts
/// the whole push.
///
/// **`PostReceive`** runs after every ref has been updated. Its exit status
/// is ignored by git, so it never stops early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the refs are updated
    PreReceive,
    /// After the refs are updated
    PostReceive,
}

impl Phase {
    /// Name git uses for the hook
    #[must_use]
    pub const fn hook_name(self) -> &'static str {
        match self {
            Self::PreReceive => "pre-receive",
            Self::PostReceive => "post-receive",
        }
    }

    /// Determine the phase from the name (or path) the process was invoked under
    ///
    /// # Errors
    ///
    /// Returns `HookError::UnknownPhase` when the file name is neither hook name.
    pub fn from_invocation(invoked_as: impl AsRef<Path>) -> Result<Self, HookError> {
        let invoked_as = invoked_as.as_ref();
        invoked_as
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| HookError::UnknownPhase(invoked_as.display().to_string()))?
            .parse()
    }
}

impl FromStr for Phase {
    type Err = HookError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "pre-receive" => Ok(Self::PreReceive),
            "post-receive" => Ok(Self::PostReceive),
            other => Err(HookError::UnknownPhase(other.to_owned())),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

/// Result of dispatching one batch of push events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every event was processed
    Accepted,
    /// A disallowed branch stopped the run
    Rejected {
        /// Branch whose settings forbid the push
        branch: String,
    },
}

impl DispatchOutcome {
    /// Returns true if the push may proceed
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Process exit status git should see
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.is_accepted() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}
