//! Follow-up command execution

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use git_deploy_core::ExecSpec;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::{HookError, Result};

/// How long to keep collecting output once the command is gone.
///
/// Grandchildren can inherit the pipes and keep them open after the command
/// itself exited or was killed.
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// How a follow-up command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The command exited on its own
    Finished {
        /// Exit status of the command
        status: ExitStatus,
        /// Interleaved stdout and stderr
        output: String,
    },
    /// The command ran past its timeout and was killed
    TimedOut {
        /// Output captured before the kill
        output: String,
    },
}

impl RunOutcome {
    /// Captured output, whichever way the command ended
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Finished { output, .. } | Self::TimedOut { output } => output,
        }
    }
}

/// Runs follow-up commands from a fixed working directory
#[derive(Debug, Clone)]
pub struct CommandRunner {
    working_dir: PathBuf,
}

impl CommandRunner {
    /// Create a runner whose commands start in `working_dir`
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Directory commands start in
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run `spec`, killing it once `timeout` elapses
    ///
    /// A command that exits non-zero is still `Finished`; only failures to
    /// start or supervise it are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be parsed, started or waited on.
    pub fn run(&self, spec: &ExecSpec, timeout: Option<Duration>) -> Result<RunOutcome> {
        let argv = spec.to_argv()?;
        let command = spec.to_string();
        let (program, args) = argv
            .split_first()
            .ok_or(git_deploy_core::CommandSpecError::Empty)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| HookError::Spawn {
                command: command.clone(),
                source,
            })?;
        debug!(%command, pid = child.id(), ?timeout, "Started follow-up command");

        // Drain both pipes while waiting; a full pipe would otherwise block the child.
        let capture = OutputCapture::start(&mut child);

        let waited = match timeout {
            Some(limit) => child.wait_timeout(limit),
            None => child.wait().map(Some),
        };

        match waited {
            Ok(Some(status)) => {
                debug!(%command, %status, "Follow-up command finished");
                Ok(RunOutcome::Finished {
                    status,
                    output: capture.finish(),
                })
            }
            Ok(None) => {
                warn!(%command, ?timeout, "Follow-up command timed out");
                kill(&mut child);
                Ok(RunOutcome::TimedOut {
                    output: capture.finish(),
                })
            }
            Err(source) => {
                kill(&mut child);
                Err(HookError::Wait { command, source })
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("kill: {err}");
    }
    let _ = child.wait();
}

/// Collects stdout and stderr of a child into one buffer, in arrival order.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
    readers: usize,
}

impl OutputCapture {
    fn start(child: &mut Child) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let mut readers = 0;

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Arc::clone(&buffer), tx.clone());
            readers += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Arc::clone(&buffer), tx);
            readers += 1;
        }

        Self {
            buffer,
            done,
            readers,
        }
    }

    fn finish(self) -> String {
        let deadline = Instant::now() + OUTPUT_COLLECTION_TIMEOUT;
        for _ in 0..self.readers {
            let left = deadline.saturating_duration_since(Instant::now());
            if self.done.recv_timeout(left).is_err() {
                warn!("Output still open after the command ended; keeping what was read");
                break;
            }
        }

        self.buffer
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

fn spawn_reader<R>(mut stream: R, buffer: Arc<Mutex<Vec<u8>>>, done: Sender<()>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut bytes) = buffer.lock() {
                        bytes.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
}
