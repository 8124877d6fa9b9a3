//! Lifecycle of the external compiler subprocess.
//!
//! A [`CompilerChannel`] owns the child process and the write half of its
//! stdin pipe. The read half of stdout is surrendered exactly once at spawn
//! time to whoever runs the channel's single receive loop; the channel itself
//! never demultiplexes frames.

use std::io;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use tinct_protocol::{FrameReader, FrameWriter};

use crate::config::CompilerConfig;
use crate::dispatch::FrameSink;
use crate::errors::CompilerError;

/// Log target for channel operations.
const CHANNEL_TARGET: &str = "tinct_host::channel";

/// How long `close` waits for a graceful exit before killing.
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// State of the compiler subprocess.
enum ChannelState {
    /// Pipes are being wired up.
    Starting,
    /// Process is running and ready for frames.
    Running {
        /// The child process handle.
        child: Child,
    },
    /// Stdin has been closed and the process is being waited on.
    Closing,
    /// Process has exited.
    Terminated {
        /// Exit status, when it could be observed.
        status: Option<ExitStatus>,
    },
}

/// Owns the compiler subprocess and the framed write half of its stdin.
pub struct CompilerChannel {
    state: Mutex<ChannelState>,
    writer: Mutex<Option<FrameWriter<std::process::ChildStdin>>>,
}

impl CompilerChannel {
    /// Spawns the compiler process with piped stdin/stdout.
    ///
    /// Stderr is inherited so compiler diagnostics pass through to the host's
    /// stderr. Returns the channel and the read half of the process's stdout;
    /// the read half must be consumed by exactly one receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::BinaryNotFound`] when the executable is
    /// missing and [`CompilerError::Spawn`] for any other spawn failure.
    pub fn spawn(
        config: &CompilerConfig,
    ) -> Result<(Self, FrameReader<ChildStdout>), CompilerError> {
        let state = Mutex::new(ChannelState::Starting);

        debug!(
            target: CHANNEL_TARGET,
            command = %config.command.display(),
            args = ?config.args,
            "spawning compiler process"
        );

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CompilerError::BinaryNotFound {
                    command: config.command.display().to_string(),
                    source: Arc::new(e),
                }
            } else {
                CompilerError::Spawn {
                    message: format!("failed to start {}", config.command.display()),
                    source: Arc::new(e),
                }
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| CompilerError::Spawn {
            message: "failed to capture stdin".to_string(),
            source: Arc::new(io::Error::other("no stdin")),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| CompilerError::Spawn {
            message: "failed to capture stdout".to_string(),
            source: Arc::new(io::Error::other("no stdout")),
        })?;

        debug!(
            target: CHANNEL_TARGET,
            pid = child.id(),
            "compiler process spawned"
        );

        *state.lock().unwrap_or_else(PoisonError::into_inner) = ChannelState::Running { child };

        Ok((
            Self {
                state,
                writer: Mutex::new(Some(FrameWriter::new(stdin))),
            },
            FrameReader::new(stdout),
        ))
    }

    /// Frames and writes one payload to the process's stdin.
    ///
    /// The whole frame is written under the writer lock, so frames from
    /// concurrent senders never interleave.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::ChannelClosed`] when the process has already
    /// terminated or its stdin pipe broke.
    pub fn send(&self, payload: &[u8]) -> Result<(), CompilerError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return Err(CompilerError::ChannelClosed {
                message: "compiler stdin is closed".to_string(),
            });
        };
        writer.write_frame(payload).map_err(CompilerError::from_frame)
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut *state {
            ChannelState::Running { child } => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    *state = ChannelState::Terminated {
                        status: Some(status),
                    };
                    false
                }
                Err(_) => false,
            },
            ChannelState::Starting | ChannelState::Closing | ChannelState::Terminated { .. } => {
                false
            }
        }
    }

    /// Exit status of the process, when it has terminated and was observed.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            ChannelState::Terminated { status } => *status,
            _ => None,
        }
    }

    /// Closes stdin, waits briefly for a graceful exit, then kills.
    ///
    /// Idempotent; safe to call from any thread and again after failure.
    pub fn close(&self) {
        // Dropping the writer closes the pipe, which is the shutdown signal
        // the compiler honours.
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *state, ChannelState::Closing);
        match previous {
            ChannelState::Running { mut child } => {
                let status = terminate_child(&mut child);
                *state = ChannelState::Terminated { status };
            }
            ChannelState::Terminated { status } => {
                *state = ChannelState::Terminated { status };
            }
            ChannelState::Starting | ChannelState::Closing => {
                *state = ChannelState::Terminated { status: None };
            }
        }
    }
}

/// Waits for the child to exit, killing it after the grace period.
fn terminate_child(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: CHANNEL_TARGET, ?status, "compiler exited");
            return Some(status);
        }
        Ok(None) => {
            debug!(
                target: CHANNEL_TARGET,
                "compiler still running, waiting before killing"
            );
        }
        Err(e) => {
            warn!(
                target: CHANNEL_TARGET,
                error = %e,
                "failed to check compiler status, waiting before killing"
            );
        }
    }

    thread::sleep(EXIT_GRACE);
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(
                target: CHANNEL_TARGET,
                ?status,
                "compiler exited during grace period"
            );
            Some(status)
        }
        Ok(None) | Err(_) => {
            let _ = child.kill();
            child.wait().ok()
        }
    }
}

impl FrameSink for CompilerChannel {
    fn send(&self, payload: &[u8]) -> Result<(), CompilerError> {
        CompilerChannel::send(self, payload)
    }
}

impl Drop for CompilerChannel {
    fn drop(&mut self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Recover from poisoning so the subprocess is released even after a
        // panic on another thread.
        if let ChannelState::Running { mut child } =
            std::mem::replace(&mut *state, ChannelState::Terminated { status: None })
        {
            if let Err(e) = child.kill() {
                warn!(
                    target: CHANNEL_TARGET,
                    error = %e,
                    "failed to kill compiler process on drop"
                );
            } else {
                let _ = child.wait();
            }
        }
    }
}

impl std::fmt::Debug for CompilerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.lock() {
            Ok(guard) => match &*guard {
                ChannelState::Starting => "starting".to_string(),
                ChannelState::Running { child } => format!("running (pid: {})", child.id()),
                ChannelState::Closing => "closing".to_string(),
                ChannelState::Terminated { status } => format!("terminated ({status:?})"),
            },
            Err(_) => "poisoned".to_string(),
        };

        f.debug_struct("CompilerChannel")
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn missing_binary_is_distinguished_from_other_spawn_failures() {
        let config = CompilerConfig::new("/nonexistent/path/to/tinctc");

        let result = CompilerChannel::spawn(&config);

        assert!(matches!(
            result,
            Err(CompilerError::BinaryNotFound { .. })
        ));
    }
}
