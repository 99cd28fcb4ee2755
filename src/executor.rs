//! Privileged command execution.
//!
//! The engine treats every external command as a blocking call that either
//! exits with a status code or dies from a signal. The [`Executor`] trait is
//! the seam tests use to observe or fake command execution; [`SystemExecutor`]
//! is the real thing: spawn, drain both pipes off-thread, and enforce an
//! optional wall-clock timeout. A timed-out command is killed and reported as
//! a signal termination, not as a distinct state.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{CommandOutcome, Result, TrollFoolsError};

/// What a finished command left behind.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub outcome: CommandOutcome,
    pub stdout: String,
    pub stderr: String,
}

impl Receipt {
    /// Require a clean exit, otherwise wrap into a [`TrollFoolsError`]
    /// carrying the tool name and outcome.
    pub fn expect_success(self, tool: &str) -> Result<Receipt> {
        match self.outcome {
            CommandOutcome::Exited(0) => Ok(self),
            outcome => {
                if !self.stderr.trim().is_empty() {
                    debug!(tool, stderr = %self.stderr.trim(), "command failed");
                }
                Err(TrollFoolsError::command_failed(tool, outcome))
            }
        }
    }
}

pub trait Executor: Send + Sync {
    fn execute(
        &self,
        binary: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<Receipt>;
}

/// Spawns commands directly on the host.
#[derive(Debug, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(
        &self,
        binary: &Path,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<Receipt> {
        debug!(binary = %binary.display(), ?args, "spawn");

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain pipes off-thread so a chatty tool can never deadlock against
        // a full pipe buffer while we wait for it.
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    child.wait()?;
                    let _ = stdout_thread.join();
                    let _ = stderr_thread.join();
                    return Ok(Receipt {
                        outcome: CommandOutcome::Signaled(libc::SIGKILL),
                        stdout: String::new(),
                        stderr: String::new(),
                    });
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        let outcome = match status.code() {
            Some(code) => CommandOutcome::Exited(code),
            None => {
                #[cfg(unix)]
                {
                    use std::os::unix::process::ExitStatusExt;
                    CommandOutcome::Signaled(status.signal().unwrap_or(libc::SIGKILL))
                }
                #[cfg(not(unix))]
                {
                    CommandOutcome::Signaled(libc::SIGKILL)
                }
            }
        };

        Ok(Receipt {
            outcome,
            stdout,
            stderr,
        })
    }
}
