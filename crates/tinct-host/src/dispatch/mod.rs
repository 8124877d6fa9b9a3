//! Request multiplexing over a single compiler channel.
//!
//! Many callers submit compile requests concurrently; one receive loop per
//! channel demultiplexes the process's output stream back to them. The
//! pending table is the single shared mutable resource and everything that
//! touches it — id allocation, slot insertion, resolution, registry teardown,
//! failure transitions — happens under one mutex. Writers serialise only the
//! framed write, never the whole request lifecycle.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use tinct_protocol::{
    CallErrorKind, CallResult, CallTarget, CanonicalizeReply, CanonicalizeRequest, FrameReader,
    FunctionCallRequest, InboundEnvelope, LoadReply, LoadRequest, LogEvent, OutboundEnvelope,
};

use crate::errors::CompilerError;
use crate::registry::RequestRegistries;

/// Log target for dispatch operations.
const DISPATCH_TARGET: &str = "tinct_host::dispatch";

/// How often a suspended caller re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Transmit seam between the dispatcher and the process channel.
///
/// Implementations frame and write one payload atomically; the dispatcher
/// never assumes more than that. [`crate::CompilerChannel`] is the production
/// implementation.
pub trait FrameSink: Send + Sync {
    /// Frames and writes one payload.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::ChannelClosed`] when the process side of the
    /// stream is gone.
    fn send(&self, payload: &[u8]) -> Result<(), CompilerError>;
}

/// Host-local cancellation signal for a submitted request.
///
/// Cancelling releases the waiting caller and retires its pending slot; the
/// external process is not told to abandon the work already dispatched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the token; observed by the suspended caller on its next poll.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been set.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why the channel failed; broadcast to every pending caller.
#[derive(Debug, Clone)]
enum FailureKind {
    ChannelClosed(String),
    Protocol(String),
}

impl FailureKind {
    fn to_error(&self) -> CompilerError {
        match self {
            Self::ChannelClosed(message) => CompilerError::ChannelClosed {
                message: message.clone(),
            },
            Self::Protocol(message) => CompilerError::Protocol {
                message: message.clone(),
            },
        }
    }
}

/// What a pending slot resolves to.
type Resolution = Result<Value, FailureKind>;

struct DispatchState {
    next_id: u32,
    pending: HashMap<u32, SyncSender<Resolution>>,
    registries: HashMap<u32, Arc<RequestRegistries>>,
    /// Ids retired by cancellation whose responses have not arrived yet.
    /// A late response for one of these is discarded, not treated as
    /// unsolicited.
    cancelled: HashSet<u32>,
    failure: Option<FailureKind>,
}

/// Correlates concurrent requests with responses on one channel and services
/// compiler-initiated calls while they are in flight.
pub struct Dispatcher {
    sink: Arc<dyn FrameSink>,
    state: Mutex<DispatchState>,
}

impl Dispatcher {
    /// Starts a dispatcher and its receive loop over the channel's read half.
    ///
    /// Exactly one receive loop runs per channel; it is the sole reader of
    /// the process's output stream and runs until the stream ends or the
    /// channel fails.
    pub fn start<R>(sink: Arc<dyn FrameSink>, reader: FrameReader<R>) -> Arc<Self>
    where
        R: Read + Send + 'static,
    {
        let dispatcher = Arc::new(Self {
            sink,
            state: Mutex::new(DispatchState {
                next_id: 1,
                pending: HashMap::new(),
                registries: HashMap::new(),
                cancelled: HashSet::new(),
                failure: None,
            }),
        });

        let receive = Arc::clone(&dispatcher);
        let spawned = thread::Builder::new()
            .name("tinct-receive".to_string())
            .spawn(move || receive.run(reader));
        if let Err(error) = spawned {
            dispatcher.fail(FailureKind::ChannelClosed(format!(
                "failed to start receive loop: {error}"
            )));
        }

        dispatcher
    }

    /// Submits one compile request and blocks until it resolves.
    ///
    /// The caller is released by exactly one of: the correlated response
    /// arriving, the channel failing, or `cancel` being set.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::ChannelClosed`] or [`CompilerError::Protocol`]
    /// when the channel has failed, and [`CompilerError::Cancelled`] when the
    /// token was set first.
    pub fn submit(
        &self,
        payload: Value,
        registries: RequestRegistries,
        cancel: &CancelToken,
    ) -> Result<Value, CompilerError> {
        let (slot, resolution) = mpsc::sync_channel::<Resolution>(1);
        let id = {
            let mut state = self.lock_state();
            if let Some(failure) = &state.failure {
                return Err(failure.to_error());
            }
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            state.pending.insert(id, slot);
            state.registries.insert(id, Arc::new(registries));
            id
        };

        debug!(target: DISPATCH_TARGET, id, "submitting compile request");

        let envelope = OutboundEnvelope::Compile { id, payload };
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                self.retire(id);
                return Err(CompilerError::Codec(error));
            }
        };
        if let Err(error) = self.sink.send(&bytes) {
            self.retire(id);
            return Err(error);
        }

        self.await_resolution(id, &resolution, cancel)
    }

    /// Number of requests currently awaiting responses.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.lock_state().pending.len()
    }

    fn await_resolution(
        &self,
        id: u32,
        resolution: &Receiver<Resolution>,
        cancel: &CancelToken,
    ) -> Result<Value, CompilerError> {
        loop {
            if cancel.is_cancelled() {
                let mut state = self.lock_state();
                if state.pending.remove(&id).is_some() {
                    state.registries.remove(&id);
                    state.cancelled.insert(id);
                    debug!(target: DISPATCH_TARGET, id, "request cancelled host-side");
                    return Err(CompilerError::Cancelled);
                }
                // A resolution raced the cancellation; collect it below.
            }
            match resolution.recv_timeout(CANCEL_POLL) {
                Ok(Ok(payload)) => return Ok(payload),
                Ok(Err(failure)) => return Err(failure.to_error()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CompilerError::ChannelClosed {
                        message: "receive loop dropped the pending slot".to_string(),
                    });
                }
            }
        }
    }

    /// Receive loop body: demultiplexes frames until the channel dies.
    fn run<R: Read>(&self, mut reader: FrameReader<R>) {
        loop {
            let frame = match reader.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.fail(FailureKind::ChannelClosed(
                        "compiler closed its output stream".to_string(),
                    ));
                    return;
                }
                Err(error) => {
                    self.fail(failure_from_error(CompilerError::from_frame(error)));
                    return;
                }
            };

            let envelope = match InboundEnvelope::from_bytes(&frame) {
                Ok(envelope) => envelope,
                Err(error) => {
                    self.fail(FailureKind::Protocol(format!(
                        "undecodable envelope: {error}"
                    )));
                    return;
                }
            };

            let keep_going = match envelope {
                InboundEnvelope::Response { id, payload } => self.resolve(id, payload),
                InboundEnvelope::Call {
                    id,
                    request,
                    target,
                    payload,
                } => self.handle_call(id, request, target, payload),
            };
            if !keep_going {
                return;
            }
        }
    }

    /// Routes a response to its pending caller.
    ///
    /// An id that matches neither a pending slot nor a cancellation tombstone
    /// means correlation has been violated and nothing further on the channel
    /// can be trusted.
    fn resolve(&self, id: u32, payload: Value) -> bool {
        let mut state = self.lock_state();
        if state.cancelled.remove(&id) {
            debug!(target: DISPATCH_TARGET, id, "discarding response for cancelled request");
            return true;
        }
        let Some(slot) = state.pending.remove(&id) else {
            drop(state);
            self.fail(FailureKind::Protocol(format!(
                "response for unknown request id {id}"
            )));
            return false;
        };
        state.registries.remove(&id);
        drop(state);

        debug!(target: DISPATCH_TARGET, id, "resolving pending request");
        // The slot is buffered, so this never blocks the receive loop.
        let _ = slot.send(Ok(payload));
        true
    }

    /// Services a compiler-initiated call and writes its result frame.
    fn handle_call(&self, id: u32, request: u32, target: CallTarget, payload: Value) -> bool {
        let registries = {
            let state = self.lock_state();
            state.registries.get(&request).map(Arc::clone)
        };

        let result = match registries {
            Some(registries) => invoke_handler(&registries, target, payload),
            None => {
                warn!(
                    target: DISPATCH_TARGET,
                    call = id,
                    request,
                    "inbound call references a request whose registries are gone"
                );
                CallResult::Failure {
                    kind: CallErrorKind::StaleCallback,
                    message: format!("no live request {request} for inbound call {id}"),
                }
            }
        };

        self.send_reply(&OutboundEnvelope::CallResult { id, result })
    }

    fn send_reply(&self, envelope: &OutboundEnvelope) -> bool {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                self.fail(FailureKind::Protocol(format!(
                    "failed to encode call result: {error}"
                )));
                return false;
            }
        };
        match self.sink.send(&bytes) {
            Ok(()) => true,
            Err(error) => {
                self.fail(failure_from_error(error));
                false
            }
        }
    }

    /// Removes a request's slot and registries without resolving it.
    fn retire(&self, id: u32) {
        let mut state = self.lock_state();
        state.pending.remove(&id);
        state.registries.remove(&id);
    }

    /// Transitions to the terminal failed state and releases every pending
    /// caller exactly once. The first failure wins; later ones are ignored.
    fn fail(&self, failure: FailureKind) {
        let mut state = self.lock_state();
        if state.failure.is_some() {
            return;
        }
        warn!(
            target: DISPATCH_TARGET,
            reason = ?failure,
            pending = state.pending.len(),
            "channel failed; releasing pending callers"
        );
        state.failure = Some(failure.clone());
        for (_, slot) in state.pending.drain() {
            let _ = slot.send(Err(failure.clone()));
        }
        state.registries.clear();
        state.cancelled.clear();
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Dispatcher")
            .field("pending", &state.pending.len())
            .field("failed", &state.failure.is_some())
            .finish()
    }
}

fn failure_from_error(error: CompilerError) -> FailureKind {
    match error {
        CompilerError::Protocol { message } => FailureKind::Protocol(message),
        CompilerError::ChannelClosed { message } => FailureKind::ChannelClosed(message),
        other => FailureKind::ChannelClosed(other.to_string()),
    }
}

/// Invokes the registry handler a call addresses and shapes its reply.
///
/// Handler errors are converted into error results here so one misbehaving
/// callback cannot take the shared channel down.
fn invoke_handler(registries: &RequestRegistries, target: CallTarget, payload: Value) -> CallResult {
    match target {
        CallTarget::ImporterCanonicalize => match serde_json::from_value(payload) {
            Ok(args) => canonicalize(registries, &args),
            Err(error) => malformed(target, &error),
        },
        CallTarget::ImporterLoad => match serde_json::from_value(payload) {
            Ok(args) => load(registries, &args),
            Err(error) => malformed(target, &error),
        },
        CallTarget::FunctionCall => match serde_json::from_value(payload) {
            Ok(args) => call_function(registries, &args),
            Err(error) => malformed(target, &error),
        },
        CallTarget::LogEvent => match serde_json::from_value::<LogEvent>(payload) {
            Ok(event) => {
                registries.logger.log(&event);
                CallResult::Success { value: Value::Null }
            }
            Err(error) => malformed(target, &error),
        },
    }
}

fn canonicalize(registries: &RequestRegistries, args: &CanonicalizeRequest) -> CallResult {
    let Some(importer) = registries.importers.resolve(args.importer) else {
        return handler_failure(format!("unknown importer id {}", args.importer));
    };
    match importer.canonicalize(&args.url) {
        Ok(url) => reply_value(&CanonicalizeReply { url }),
        Err(error) => handler_failure(error.to_string()),
    }
}

fn load(registries: &RequestRegistries, args: &LoadRequest) -> CallResult {
    let Some(importer) = registries.importers.resolve(args.importer) else {
        return handler_failure(format!("unknown importer id {}", args.importer));
    };
    match importer.load(&args.url) {
        Ok(source) => reply_value(&LoadReply { source }),
        Err(error) => handler_failure(error.to_string()),
    }
}

fn call_function(registries: &RequestRegistries, args: &FunctionCallRequest) -> CallResult {
    let Some(function) = registries.functions.resolve(&args.function) else {
        return handler_failure(format!("unknown function '{}'", args.function));
    };
    match function.call(&args.arguments) {
        Ok(value) => CallResult::Success { value },
        Err(error) => handler_failure(error.to_string()),
    }
}

fn reply_value<T: serde::Serialize>(reply: &T) -> CallResult {
    match serde_json::to_value(reply) {
        Ok(value) => CallResult::Success { value },
        Err(error) => handler_failure(format!("failed to encode reply: {error}")),
    }
}

fn handler_failure(message: String) -> CallResult {
    CallResult::Failure {
        kind: CallErrorKind::Handler,
        message,
    }
}

fn malformed(target: CallTarget, error: &serde_json::Error) -> CallResult {
    CallResult::Failure {
        kind: CallErrorKind::MalformedPayload,
        message: format!("arguments did not decode for {target:?}: {error}"),
    }
}
