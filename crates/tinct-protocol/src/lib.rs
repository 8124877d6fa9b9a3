//! Wire protocol shared by the tinct host and the external compiler.
//!
//! The protocol is a stream of length-prefixed binary frames: an unsigned
//! LEB128 varint carrying the payload length, followed by that many payload
//! bytes. Each payload is a JSON envelope carrying a request identifier, a
//! kind discriminator, and an opaque body. The [`frame`] module implements the
//! framing transform and blocking stream adapters; the [`envelope`] module
//! defines the envelope and payload types for both directions of the
//! conversation.

pub mod envelope;
pub mod frame;

pub use envelope::{
    CallErrorKind, CallResult, CallTarget, CanonicalizeReply, CanonicalizeRequest, CompileOutcome,
    CompilePayload, FunctionCallRequest, ImportSource, InboundEnvelope, LoadReply, LoadRequest,
    LogEvent, LogLevel, OutboundEnvelope, SourceSpan, Syntax,
};
pub use frame::{
    DecodeOutcome, FrameError, FrameReader, FrameWriter, MAX_FRAME_LEN, decode_frame, encode_frame,
};
