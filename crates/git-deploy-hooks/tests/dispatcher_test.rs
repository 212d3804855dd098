//! Integration tests for `Dispatcher`.

#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git_deploy_core::{CheckoutReport, DeployConfig, TreeMaterializer};
use git_deploy_hooks::{DispatchOutcome, DispatchSettings, Dispatcher, Phase};
use tempfile::TempDir;

const OLD: &str = "0000000000000000000000000000000000000000";
const NEW: &str = "8d2a1b4c3e5f60718293a4b5c6d7e8f901234567";

/// Records checkouts instead of touching a repository.
struct RecordingMaterializer {
    calls: RefCell<Vec<(PathBuf, String)>>,
    output: String,
    success: bool,
}

impl Default for RecordingMaterializer {
    fn default() -> Self {
        Self::with_output("")
    }
}

impl RecordingMaterializer {
    fn with_output(output: &str) -> Self {
        Self {
            calls: RefCell::default(),
            output: output.to_owned(),
            success: true,
        }
    }

    fn failing(output: &str) -> Self {
        Self {
            success: false,
            ..Self::with_output(output)
        }
    }

    fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.borrow().clone()
    }
}

impl TreeMaterializer for RecordingMaterializer {
    fn materialize(&self, target: &Path, branch: &str) -> CheckoutReport {
        self.calls
            .borrow_mut()
            .push((target.to_path_buf(), branch.to_owned()));
        CheckoutReport {
            success: self.success,
            output: self.output.clone(),
        }
    }
}

struct Fixture {
    dir: TempDir,
    materializer: RecordingMaterializer,
}

impl Fixture {
    fn new() -> Self {
        Self::with_materializer(RecordingMaterializer::default())
    }

    fn with_materializer(materializer: RecordingMaterializer) -> Self {
        Self {
            dir: TempDir::with_prefix("git-deploy-dispatch-").unwrap(),
            materializer,
        }
    }

    fn config_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn dispatcher(&self, phase: Phase, config: &str) -> Dispatcher<&RecordingMaterializer> {
        let config = DeployConfig::parse(config).expect("valid config");
        let settings = DispatchSettings {
            config_dir: self.config_dir(),
            config_branch: "hooks".to_owned(),
        };
        Dispatcher::new(phase, config, settings, &self.materializer)
    }

    fn run(&self, phase: Phase, config: &str, refs: &[&str]) -> (DispatchOutcome, String) {
        let input = events(refs);
        let mut out = Vec::new();
        let outcome = self
            .dispatcher(phase, config)
            .dispatch(input.as_bytes(), &mut out)
            .unwrap();
        (outcome, String::from_utf8(out).unwrap())
    }
}

fn events(refs: &[&str]) -> String {
    refs.iter()
        .map(|refname| format!("{OLD} {NEW} {refname}\n"))
        .collect()
}

/// Client connection that went away.
struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const RELEASE_BLOCKED: &str =
    r#"{"*": {"allow": true}, "release": {"allow": false, "pre-message": "blocked"}}"#;

#[test]
fn disallowed_branch_is_rejected_with_message() {
    let fixture = Fixture::new();

    let (outcome, out) = fixture.run(Phase::PreReceive, RELEASE_BLOCKED, &["refs/heads/release"]);

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected {
            branch: "release".into()
        }
    );
    assert_eq!(out, "blocked\n");
}

#[test]
fn wildcard_branch_is_accepted() {
    let fixture = Fixture::new();

    let (outcome, out) = fixture.run(Phase::PreReceive, RELEASE_BLOCKED, &["refs/heads/main"]);

    assert_eq!(outcome, DispatchOutcome::Accepted);
    assert!(out.is_empty());
}

#[test]
fn rejection_stops_the_batch() {
    let fixture = Fixture::new();
    let config = r#"{
        "release": {"allow": false, "pre-message": "release is frozen"},
        "main": {"pre-message": "main looks fine"}
    }"#;

    let (outcome, out) = fixture.run(
        Phase::PreReceive,
        config,
        &["refs/heads/release", "refs/heads/main"],
    );

    assert!(!outcome.is_accepted());
    assert!(out.contains("release is frozen"));
    assert!(!out.contains("main looks fine"));
}

#[test]
fn pre_receive_runs_no_post_actions() {
    let fixture = Fixture::new();
    let config = r#"{"*": {"post-message": "deployed", "work-tree": "/srv/site", "exec": "false"}}"#;

    let (outcome, out) = fixture.run(Phase::PreReceive, config, &["refs/heads/main"]);

    assert!(outcome.is_accepted());
    assert!(out.is_empty());
    assert!(fixture.materializer.calls().is_empty());
}

#[test]
fn post_receive_ignores_allow() {
    let fixture = Fixture::new();
    let config = r#"{"*": {"allow": false, "pre-message": "nope", "post-message": "accepted anyway"}}"#;

    let (outcome, out) = fixture.run(
        Phase::PostReceive,
        config,
        &["refs/heads/main", "refs/heads/dev"],
    );

    assert!(outcome.is_accepted());
    assert_eq!(out, "accepted anyway\naccepted anyway\n");
}

#[test]
fn config_branch_only_refreshes_configuration() {
    for (phase, shown) in [(Phase::PreReceive, ""), (Phase::PostReceive, "Updated hooks\n")] {
        let fixture = Fixture::with_materializer(RecordingMaterializer::with_output("Updated hooks"));
        let config = r#"{"*": {"allow": false, "pre-message": "pre", "post-message": "post"}}"#;

        let (outcome, out) = fixture.run(phase, config, &["refs/heads/hooks"]);

        assert!(outcome.is_accepted(), "{phase} rejected the config branch");
        assert_eq!(out, shown, "{phase} printed {out:?}");
        assert_eq!(
            fixture.materializer.calls(),
            vec![(fixture.config_dir(), "hooks".to_owned())]
        );
    }
}

#[test]
fn failed_config_refresh_is_shown_after_the_push() {
    let fixture = Fixture::with_materializer(RecordingMaterializer::failing(
        "error: pathspec 'hooks' did not match",
    ));

    let (_, pre) = fixture.run(Phase::PreReceive, "{}", &["refs/heads/hooks"]);
    let (outcome, post) = fixture.run(Phase::PostReceive, "{}", &["refs/heads/hooks"]);

    assert!(pre.is_empty());
    assert!(outcome.is_accepted());
    assert_eq!(post, "error: pathspec 'hooks' did not match\n");
}

#[test]
fn post_receive_deploys_when_client_is_gone() {
    let fixture = Fixture::new();
    let config = r#"{"main": {"post-message": "hi", "work-tree": "/srv/www"}}"#;
    let input = format!("garbage\n{}", events(&["refs/heads/main", "refs/heads/main"]));

    let outcome = fixture
        .dispatcher(Phase::PostReceive, config)
        .dispatch(input.as_bytes(), &mut ClosedPipe)
        .unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(
        fixture.materializer.calls(),
        vec![
            (PathBuf::from("/srv/www"), "main".to_owned()),
            (PathBuf::from("/srv/www"), "main".to_owned()),
        ]
    );
}

#[test]
fn pre_receive_reports_lost_client() {
    let fixture = Fixture::new();

    let result = fixture
        .dispatcher(Phase::PreReceive, RELEASE_BLOCKED)
        .dispatch(events(&["refs/heads/release"]).as_bytes(), &mut ClosedPipe);

    assert!(result.is_err());
}

#[test]
fn unrelated_bad_field_keeps_branch_blocked() {
    let fixture = Fixture::new();
    let config = r#"{"release": {"allow": false}, "main": {"timeout": "30"}}"#;

    let (outcome, _) = fixture.run(Phase::PreReceive, config, &["refs/heads/release"]);

    assert!(!outcome.is_accepted());
}

#[test]
fn null_allow_rejects() {
    let fixture = Fixture::new();

    let (outcome, _) = fixture.run(
        Phase::PreReceive,
        r#"{"release": {"allow": null}}"#,
        &["refs/heads/release"],
    );

    assert_eq!(
        outcome,
        DispatchOutcome::Rejected {
            branch: "release".into()
        }
    );
}

#[test]
fn config_branch_does_not_hide_later_events() {
    let fixture = Fixture::new();

    let (outcome, _) = fixture.run(
        Phase::PreReceive,
        RELEASE_BLOCKED,
        &["refs/heads/hooks", "refs/heads/release"],
    );

    assert!(!outcome.is_accepted());
    assert_eq!(fixture.materializer.calls().len(), 1);
}

#[test]
fn work_tree_is_checked_out_after_message() {
    let fixture = Fixture::with_materializer(RecordingMaterializer::with_output("checked out"));
    let config = r#"{"main": {"post-message": "deploying", "work-tree": "/srv/www"}}"#;

    let (_, out) = fixture.run(Phase::PostReceive, config, &["refs/heads/main"]);

    assert_eq!(out, "deploying\nchecked out\n");
    assert_eq!(
        fixture.materializer.calls(),
        vec![(PathBuf::from("/srv/www"), "main".to_owned())]
    );
}

#[test]
fn malformed_lines_are_reported_and_skipped() {
    let fixture = Fixture::new();
    let config = DeployConfig::parse(r#"{"*": {"post-message": "ok"}}"#).unwrap();
    let settings = DispatchSettings {
        config_dir: fixture.config_dir(),
        config_branch: "hooks".into(),
    };
    let dispatcher = Dispatcher::new(Phase::PostReceive, config, settings, &fixture.materializer);
    let input = format!("garbage\n\n{OLD} {NEW} refs/heads/main\n");

    let mut out = Vec::new();
    let outcome = dispatcher.dispatch(input.as_bytes(), &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();

    assert!(outcome.is_accepted());
    assert!(out.starts_with("Ignoring malformed push line"));
    assert!(out.ends_with("ok\n"));
}

#[cfg(unix)]
#[test]
fn exec_output_is_printed_from_config_dir() {
    let fixture = Fixture::new();
    std::fs::write(fixture.config_dir().join("deploy.sh"), "echo deploying $1").unwrap();
    let config = r#"{"main": {"exec": "sh deploy.sh main"}}"#;

    let (_, out) = fixture.run(Phase::PostReceive, config, &["refs/heads/main"]);

    assert_eq!(out, "deploying main\n");
}

#[cfg(unix)]
#[test]
fn exec_output_gains_trailing_newline() {
    let fixture = Fixture::new();
    let config = r#"{"main": {"exec": ["printf", "no newline"]}}"#;

    let (_, out) = fixture.run(Phase::PostReceive, config, &["refs/heads/main"]);

    assert_eq!(out, "no newline\n");
}

#[cfg(unix)]
#[test]
fn slow_exec_is_killed_after_timeout() {
    let fixture = Fixture::new();
    let config = r#"{"main": {
        "exec": ["sleep", "5"],
        "timeout": 0.2,
        "timeout-message": "deploy took too long"
    }}"#;
    let started = Instant::now();

    let (outcome, out) = fixture.run(Phase::PostReceive, config, &["refs/heads/main"]);

    assert!(outcome.is_accepted());
    assert_eq!(out, "deploy took too long\n");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[cfg(unix)]
#[test]
fn failing_exec_does_not_stop_the_batch() {
    let fixture = Fixture::new();
    let config = r#"{
        "broken": {"exec": "git-deploy-no-such-program --now"},
        "main": {"post-message": "main done"}
    }"#;

    let (outcome, out) = fixture.run(
        Phase::PostReceive,
        config,
        &["refs/heads/broken", "refs/heads/main"],
    );

    assert!(outcome.is_accepted());
    assert!(out.contains("git-deploy-no-such-program"));
    assert!(out.ends_with("main done\n"));
}
