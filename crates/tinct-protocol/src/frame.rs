//! Length-prefixed binary framing.
//!
//! A frame is an unsigned LEB128 varint giving the payload length, followed by
//! exactly that many payload bytes. [`encode_frame`] and [`decode_frame`] are
//! pure transforms that never touch I/O; [`FrameReader`] and [`FrameWriter`]
//! adapt them onto blocking byte streams.

use std::io::{self, BufReader, BufWriter, Read, Write};

use thiserror::Error;

/// Upper bound on a single frame's payload size (64 MiB).
///
/// A corrupt length prefix must not be allowed to drive an unbounded
/// allocation; a declared length beyond this cap is a protocol fault.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Maximum number of bytes an unsigned LEB128 prefix may occupy.
const MAX_PREFIX_BYTES: usize = 10;

/// Read granularity for [`FrameReader`].
const READ_CHUNK: usize = 8 * 1024;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The length prefix is not a valid unsigned LEB128 varint.
    #[error("malformed frame length prefix")]
    MalformedPrefix,

    /// The declared payload length exceeds [`MAX_FRAME_LEN`].
    #[error("declared frame length {declared} exceeds the {limit} byte cap")]
    Oversized {
        /// Length declared by the prefix.
        declared: u64,
        /// The enforced cap.
        limit: usize,
    },
}

/// Result of a non-blocking decode attempt against a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete frame was present at the front of the buffer.
    Frame {
        /// The payload bytes.
        payload: Vec<u8>,
        /// Total bytes consumed: prefix plus payload.
        consumed: usize,
    },
    /// The buffer does not yet hold a complete frame.
    NeedMoreData,
}

/// Encodes a payload into a framed byte vector.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + MAX_PREFIX_BYTES);
    encode_varint(payload.len() as u64, &mut frame);
    frame.extend_from_slice(payload);
    frame
}

/// Attempts to decode one frame from the front of `buffer`.
///
/// Returns [`DecodeOutcome::NeedMoreData`] when the buffer holds a truncated
/// prefix or payload; the caller is expected to append more input and retry.
/// Never blocks.
///
/// # Errors
///
/// Returns [`FrameError::MalformedPrefix`] when the prefix does not terminate
/// within ten bytes, and [`FrameError::Oversized`] when the declared length
/// exceeds [`MAX_FRAME_LEN`].
pub fn decode_frame(buffer: &[u8]) -> Result<DecodeOutcome, FrameError> {
    let Some((declared, prefix_len)) = decode_varint(buffer)? else {
        return Ok(DecodeOutcome::NeedMoreData);
    };
    let payload_len = usize::try_from(declared).map_err(|_| FrameError::Oversized {
        declared,
        limit: MAX_FRAME_LEN,
    })?;
    if payload_len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            declared,
            limit: MAX_FRAME_LEN,
        });
    }
    let total = prefix_len + payload_len;
    let Some(payload) = buffer.get(prefix_len..total) else {
        return Ok(DecodeOutcome::NeedMoreData);
    };
    Ok(DecodeOutcome::Frame {
        payload: payload.to_vec(),
        consumed: total,
    })
}

/// Appends `value` to `out` as an unsigned LEB128 varint.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the value is masked to seven bits before narrowing"
)]
fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decodes an unsigned LEB128 varint from the front of `buffer`.
///
/// Returns the value and the number of prefix bytes, or `None` when the
/// buffer ends before the varint terminates.
fn decode_varint(buffer: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;
    for (index, byte) in buffer.iter().take(MAX_PREFIX_BYTES).enumerate() {
        // The tenth byte may only carry the final value bit; anything else
        // overflows u64 or fails to terminate.
        if index == MAX_PREFIX_BYTES - 1 && *byte > 0x01 {
            return Err(FrameError::MalformedPrefix);
        }
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }
    Ok(None)
}

/// Blocking frame reader over a byte stream.
///
/// Exactly one reader exists per channel; demultiplexing frames to waiting
/// callers is layered above this type.
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte stream.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buffer: Vec::new(),
        }
    }

    /// Blocks until one complete frame is available and returns its payload.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] with [`io::ErrorKind::UnexpectedEof`] when
    /// the stream ends inside a frame, and propagates prefix faults from
    /// [`decode_frame`].
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            match decode_frame(&self.buffer)? {
                DecodeOutcome::Frame { payload, consumed } => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(payload));
                }
                DecodeOutcome::NeedMoreData => {
                    let mut chunk = [0u8; READ_CHUNK];
                    let read = self.reader.read(&mut chunk)?;
                    if read == 0 {
                        if self.buffer.is_empty() {
                            return Ok(None);
                        }
                        return Err(FrameError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream ended inside a frame",
                        )));
                    }
                    if let Some(filled) = chunk.get(..read) {
                        self.buffer.extend_from_slice(filled);
                    }
                }
            }
        }
    }
}

/// Blocking frame writer over a byte stream.
///
/// Each call writes one frame as a single buffered write followed by a flush,
/// so frames from concurrent writers never interleave as long as calls are
/// serialised by the owner.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte stream.
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::new(inner),
        }
    }

    /// Frames and writes one payload, flushing the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] when the underlying write or flush fails.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(payload);
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}
