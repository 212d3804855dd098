use std::path::Path;

/// Outcome of materializing a branch into a directory.
///
/// The captured text is meant for display; a failed checkout is reported
/// through `success` and its output rather than as an error value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutReport {
    /// Whether the underlying checkout exited successfully.
    pub success: bool,
    /// Combined stdout/stderr of the checkout.
    pub output: String,
}

impl CheckoutReport {
    /// Report for a checkout that could not even be started.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Something that can produce a working copy of a branch at a path.
///
/// Implementations share a single repository HEAD, so calls must not overlap.
pub trait TreeMaterializer {
    /// Check out `branch` into `target`, returning the captured output.
    fn materialize(&self, target: &Path, branch: &str) -> CheckoutReport;
}

impl<T: TreeMaterializer + ?Sized> TreeMaterializer for &T {
    fn materialize(&self, target: &Path, branch: &str) -> CheckoutReport {
        (**self).materialize(target, branch)
    }
}
