//! Domain types for git-deploy: the per-branch configuration document,
//! push events read by the hooks, and the checkout seam.

/// Working-tree checkout seam.
pub mod checkout;
/// Configuration document and per-branch settings.
pub mod config;
/// Push events as delivered on hook stdin.
pub mod event;

pub use checkout::{CheckoutReport, TreeMaterializer};
pub use config::{
    BranchSettings, CommandSpecError, ConfigError, ConfigIssue, DeployConfig, ExecSpec, WILDCARD,
};
pub use event::{PushEvent, PushEventError};

/// File name of the configuration document on the configuration branch.
pub const CONFIG_FILE: &str = "config.json";

/// Default name of the reserved configuration branch.
pub const DEFAULT_CONFIG_BRANCH: &str = "hooks";

/// Default branch HEAD is pointed back to after every checkout.
pub const DEFAULT_PRIMARY_BRANCH: &str = "master";

/// Directory (relative to the git dir) holding the checked-out configuration branch.
pub const CONFIG_DIR: &str = "hooks/custom";
