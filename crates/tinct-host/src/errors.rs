//! Error types surfaced by the compiler host.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tinct_protocol::{FrameError, SourceSpan};

/// Errors raised while talking to the external compiler.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// The compiler binary was not found.
    #[error("compiler binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Failed to spawn the compiler process.
    #[error("failed to spawn compiler process: {message}")]
    Spawn {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The compiler process exited or its pipes closed.
    ///
    /// Fatal to the channel: every pending and future request on it fails
    /// with this error.
    #[error("compiler channel closed: {message}")]
    ChannelClosed {
        /// What was observed when the channel failed.
        message: String,
    },

    /// A malformed frame, undecodable envelope, or unmatched response id.
    ///
    /// Treated as a version-mismatch bug; the channel is unrecoverable.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The caller cancelled the request host-side.
    ///
    /// The external process is not told to abandon the work.
    #[error("compile request was cancelled")]
    Cancelled,

    /// The compiler handle was closed before the call.
    #[error("compiler handle is closed")]
    Closed,

    /// The compiler rejected the stylesheet.
    ///
    /// A well-formed failure response, never a channel fault.
    #[error("compilation failed: {0}")]
    Compile(#[from] CompileFailure),

    /// JSON serialisation or deserialisation failed.
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CompilerError {
    /// Maps a framing error onto the channel taxonomy.
    ///
    /// I/O faults mean the process or its pipes went away; anything else is a
    /// protocol violation.
    pub(crate) fn from_frame(error: FrameError) -> Self {
        match error {
            FrameError::Io(source) => Self::ChannelClosed {
                message: source.to_string(),
            },
            FrameError::MalformedPrefix | FrameError::Oversized { .. } => Self::Protocol {
                message: error.to_string(),
            },
        }
    }
}

/// A structured compile failure reported by the external compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileFailure {
    /// Diagnostic message from the compiler.
    pub message: String,
    /// Source location of the problem, when known.
    pub span: Option<SourceSpan>,
    /// Stylesheet stack trace, when available.
    pub stack_trace: Option<String>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn io_frame_errors_map_to_channel_closed() {
        let error = FrameError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"));

        assert!(matches!(
            CompilerError::from_frame(error),
            CompilerError::ChannelClosed { .. }
        ));
    }

    #[rstest]
    fn malformed_frames_map_to_protocol_errors() {
        assert!(matches!(
            CompilerError::from_frame(FrameError::MalformedPrefix),
            CompilerError::Protocol { .. }
        ));
        assert!(matches!(
            CompilerError::from_frame(FrameError::Oversized {
                declared: u64::MAX,
                limit: 1,
            }),
            CompilerError::Protocol { .. }
        ));
    }

    #[rstest]
    fn compile_failure_displays_its_message() {
        let failure = CompileFailure {
            message: "undefined variable".to_owned(),
            span: None,
            stack_trace: None,
        };

        assert_eq!(failure.to_string(), "undefined variable");
    }
}
