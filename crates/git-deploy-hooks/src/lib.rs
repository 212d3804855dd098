//! Push hook dispatch for git-deploy
//!
//! This crate decides, for every ref updated by a push, whether the push is
//! allowed and which follow-up actions run once it has been accepted.

mod dispatcher;
mod error;
mod runner;
mod types;

pub use dispatcher::{DispatchSettings, Dispatcher, read_config};
pub use error::{HookError, Result};
pub use runner::{CommandRunner, RunOutcome};
pub use types::{DispatchOutcome, Phase};
