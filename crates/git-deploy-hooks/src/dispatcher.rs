//! Per-push dispatch logic

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use git_deploy_core::{BranchSettings, DeployConfig, ExecSpec, PushEvent, TreeMaterializer};
use tracing::{debug, error, info, warn};

use crate::{CommandRunner, DispatchOutcome, Phase, Result, RunOutcome};

/// Where the dispatcher finds its own configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Checked-out copy of the configuration branch; also the working
    /// directory of follow-up commands
    pub config_dir: PathBuf,
    /// Reserved branch that carries the configuration
    pub config_branch: String,
}

/// Read the configuration document, telling the pushing client what is wrong with it
///
/// A missing or broken document is never fatal: the client sees why and the
/// push proceeds under the defaults. Ignored entries and fields are listed
/// too. Notices are best-effort; a client that cannot be written to does not
/// change the configuration.
pub fn read_config(path: &Path, out: &mut impl Write) -> DeployConfig {
    let (config, notices) = match DeployConfig::try_load(path) {
        Ok(config) => {
            let notices: Vec<String> = config.issues().iter().map(ToString::to_string).collect();
            (config, notices)
        }
        Err(err) => {
            warn!("{err}");
            (DeployConfig::default(), vec![err.to_string()])
        }
    };
    for notice in notices {
        if let Err(err) = writeln!(out, "{notice}") {
            warn!("Could not show config notice: {err}");
            break;
        }
    }
    config
}

/// Applies the configuration to a batch of push events
pub struct Dispatcher<M> {
    phase: Phase,
    config: DeployConfig,
    settings: DispatchSettings,
    materializer: M,
    runner: CommandRunner,
}

impl<M: TreeMaterializer> Dispatcher<M> {
    /// Create a dispatcher for one hook invocation
    pub fn new(
        phase: Phase,
        config: DeployConfig,
        settings: DispatchSettings,
        materializer: M,
    ) -> Self {
        let runner = CommandRunner::new(&settings.config_dir);
        Self {
            phase,
            config,
            settings,
            materializer,
            runner,
        }
    }

    /// Process every `<old> <new> <ref>` line of `input`, writing client-facing text to `out`
    ///
    /// In `pre-receive` the first disallowed branch ends the run and rejects
    /// the whole push. In `post-receive` every event is processed and
    /// failures are reported instead of propagated.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` cannot be read or, before the push is
    /// accepted, if `out` cannot be written.
    pub fn dispatch(&self, mut input: impl Read, out: &mut impl Write) -> Result<DispatchOutcome> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;
        let text = String::from_utf8_lossy(&raw);

        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let event = match line.parse::<PushEvent>() {
                Ok(event) => event,
                Err(err) => {
                    warn!(phase = %self.phase, "{err}");
                    self.emit(out, &format!("Ignoring malformed push line: {err}"))?;
                    continue;
                }
            };
            let branch = event.branch();
            debug!(phase = %self.phase, refname = %event.refname, %branch, "Dispatching");

            if branch == self.settings.config_branch {
                self.refresh_config_tree(out)?;
                continue;
            }

            let settings = self.config.resolve(branch);
            match self.phase {
                Phase::PreReceive => {
                    if !self.pre_receive(&settings, out)? {
                        info!(%branch, "Push rejected");
                        return Ok(DispatchOutcome::Rejected {
                            branch: branch.to_owned(),
                        });
                    }
                }
                Phase::PostReceive => {
                    if let Err(err) = self.post_receive(branch, &settings, out) {
                        error!(%branch, "post-receive failed: {err}");
                        self.emit(out, &format!("post-receive for {branch} failed: {err}"))?;
                    }
                }
            }
        }

        Ok(DispatchOutcome::Accepted)
    }

    /// Check out the configuration branch over the dispatcher's own directory
    ///
    /// Before the refs are updated git refuses to touch HEAD, so the
    /// `pre-receive` pass routinely fails and stays quiet. The `post-receive`
    /// pass picks up the new tree and shows what git said.
    fn refresh_config_tree(&self, out: &mut impl Write) -> Result<()> {
        let branch = &self.settings.config_branch;
        let report = self
            .materializer
            .materialize(&self.settings.config_dir, branch);
        match (self.phase, report.success) {
            (_, true) => info!(%branch, phase = %self.phase, "Refreshed configuration tree"),
            (Phase::PreReceive, false) => debug!(
                %branch,
                output = %report.output.trim_end(),
                "Configuration tree not refreshed before the refs were updated"
            ),
            (Phase::PostReceive, false) => warn!(
                %branch,
                output = %report.output.trim_end(),
                "Configuration tree not refreshed"
            ),
        }
        match self.phase {
            Phase::PreReceive => Ok(()),
            Phase::PostReceive => self.emit(out, &report.output),
        }
    }

    fn pre_receive(&self, settings: &BranchSettings, out: &mut impl Write) -> Result<bool> {
        if let Some(message) = settings.pre_message() {
            self.emit(out, message)?;
        }
        Ok(settings.allows())
    }

    fn post_receive(
        &self,
        branch: &str,
        settings: &BranchSettings,
        out: &mut impl Write,
    ) -> Result<()> {
        if let Some(message) = settings.post_message() {
            self.emit(out, message)?;
        }

        if let Some(work_tree) = settings.work_tree() {
            let report = self.materializer.materialize(work_tree, branch);
            debug!(%branch, work_tree = %work_tree.display(), success = report.success, "Checked out");
            self.emit(out, &report.output)?;
        }

        if let Some(spec) = settings.exec() {
            self.run_follow_up(spec, settings, out)?;
        }
        Ok(())
    }

    fn run_follow_up(
        &self,
        spec: &ExecSpec,
        settings: &BranchSettings,
        out: &mut impl Write,
    ) -> Result<()> {
        match self.runner.run(spec, settings.timeout()) {
            Ok(RunOutcome::Finished { output, .. }) => self.emit(out, &output),
            Ok(RunOutcome::TimedOut { output }) => {
                if let Some(message) = settings.timeout_message() {
                    self.emit(out, message)?;
                }
                self.emit(out, &output)
            }
            Err(err) => {
                warn!(command = %spec, "{err}");
                self.emit(out, &err.to_string())
            }
        }
    }

    /// Show `text` to the client
    ///
    /// Once the refs are updated nothing may stop the remaining actions, so
    /// in `post-receive` a failed write is logged and swallowed.
    fn emit(&self, out: &mut impl Write, text: &str) -> Result<()> {
        match write_block(out, text) {
            Err(err) if self.phase == Phase::PostReceive => {
                warn!(phase = %self.phase, "Client output lost: {err}");
                Ok(())
            }
            written => written,
        }
    }
}

/// Write `text` if non-empty, making sure it ends with a newline.
fn write_block(out: &mut impl Write, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    Ok(())
}
