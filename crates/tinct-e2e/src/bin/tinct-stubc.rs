//! Stub compiler speaking the tinct wire protocol.
//!
//! Reads compile requests from stdin, interprets the mini-language described
//! in the `tinct-e2e` crate docs, and answers on stdout. Requests are handled
//! on worker threads so responses interleave the way a real compiler's would;
//! callbacks into the host (importers, functions, log events) block the
//! worker until the host's call result arrives.

use std::collections::HashMap;
use std::io;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use tinct_protocol::{
    CallResult, CallTarget, CanonicalizeReply, CanonicalizeRequest, CompileOutcome,
    CompilePayload, FrameReader, FrameWriter, FunctionCallRequest, InboundEnvelope, LoadReply,
    LoadRequest, LogEvent, LogLevel, OutboundEnvelope, SourceSpan,
};

/// How long a worker waits for the host to answer a callback.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

type PendingCalls = Arc<Mutex<HashMap<u32, SyncSender<CallResult>>>>;
type SharedWriter = Arc<Mutex<FrameWriter<io::Stdout>>>;

fn main() -> Result<()> {
    let writer: SharedWriter = Arc::new(Mutex::new(FrameWriter::new(io::stdout())));
    let pending: PendingCalls = Arc::default();
    let next_call_id = Arc::new(AtomicU32::new(1));
    let mut reader = FrameReader::new(io::stdin());

    loop {
        let frame = match reader.read_frame().context("read frame from host")? {
            Some(frame) => frame,
            // Host closed our stdin: clean shutdown.
            None => return Ok(()),
        };
        match OutboundEnvelope::from_bytes(&frame).context("decode host envelope")? {
            OutboundEnvelope::Compile { id, payload } => {
                let session = Session {
                    request_id: id,
                    writer: Arc::clone(&writer),
                    pending: Arc::clone(&pending),
                    next_call_id: Arc::clone(&next_call_id),
                };
                thread::spawn(move || {
                    if let Err(error) = session.handle(payload) {
                        eprintln!("tinct-stubc: request {id} failed: {error:#}");
                        process::exit(2);
                    }
                });
            }
            OutboundEnvelope::CallResult { id, result } => {
                let slot = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                if let Some(slot) = slot {
                    let _ = slot.send(result);
                }
            }
        }
    }
}

/// One in-flight compile request.
#[derive(Clone)]
struct Session {
    request_id: u32,
    writer: SharedWriter,
    pending: PendingCalls,
    next_call_id: Arc<AtomicU32>,
}

/// Outcome of an `@use` directive.
enum Import {
    Loaded { url: String, contents: String },
    Failed(CompileOutcome),
}

impl Session {
    fn handle(&self, payload: Value) -> Result<()> {
        let request: CompilePayload =
            serde_json::from_value(payload).context("decode compile payload")?;

        let mut css_lines: Vec<String> = Vec::new();
        let mut loaded_urls: Vec<String> = Vec::new();

        for (index, raw) in request.source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let line_number = u32::try_from(index + 1).unwrap_or(u32::MAX);

            if line == "!crash" {
                process::exit(1);
            } else if let Some(rest) = line.strip_prefix("!sleep ") {
                let millis: u64 = rest.trim().parse().context("bad !sleep duration")?;
                thread::sleep(Duration::from_millis(millis));
            } else if let Some(rest) = line.strip_prefix("!fail ") {
                return self.respond(failure(rest, line_number, line));
            } else if let Some(rest) = line.strip_prefix("@debug ") {
                self.log(LogLevel::Debug, rest, line_number)?;
            } else if let Some(rest) = line.strip_prefix("@deprecate ") {
                self.log(LogLevel::DeprecationWarning, rest, line_number)?;
            } else if let Some(rest) = line.strip_prefix("@warn ") {
                self.log(LogLevel::Warning, rest, line_number)?;
            } else if let Some(rest) = line.strip_prefix("@use ") {
                let name = rest.trim().trim_matches('"');
                match self.import(name, &request.importers, line_number)? {
                    Import::Loaded { url, contents } => {
                        loaded_urls.push(url);
                        css_lines.extend(contents.lines().map(str::to_owned));
                    }
                    Import::Failed(outcome) => return self.respond(outcome),
                }
            } else if let Some(rest) = line.strip_prefix("@call ") {
                match self.call_function(rest, line_number)? {
                    Ok(rendered) => css_lines.push(rendered),
                    Err(outcome) => return self.respond(outcome),
                }
            } else {
                css_lines.push(line.to_owned());
            }
        }

        self.respond(CompileOutcome::Success {
            css: css_lines.join("\n"),
            loaded_urls,
        })
    }

    /// Resolves an import through the request's importers in precedence
    /// order.
    fn import(&self, name: &str, importers: &[u32], line: u32) -> Result<Import> {
        for &importer in importers {
            let args = CanonicalizeRequest {
                importer,
                url: name.to_owned(),
            };
            let value = match self.call(CallTarget::ImporterCanonicalize, to_value(&args)?)? {
                CallResult::Success { value } => value,
                CallResult::Failure { message, .. } => {
                    return Ok(Import::Failed(failure(&message, line, name)));
                }
            };
            let reply: CanonicalizeReply =
                serde_json::from_value(value).context("decode canonicalize reply")?;
            let Some(url) = reply.url else {
                continue;
            };

            let args = LoadRequest {
                importer,
                url: url.clone(),
            };
            let value = match self.call(CallTarget::ImporterLoad, to_value(&args)?)? {
                CallResult::Success { value } => value,
                CallResult::Failure { message, .. } => {
                    return Ok(Import::Failed(failure(&message, line, name)));
                }
            };
            let reply: LoadReply = serde_json::from_value(value).context("decode load reply")?;
            if let Some(source) = reply.source {
                return Ok(Import::Loaded {
                    url,
                    contents: source.contents,
                });
            }
        }
        Ok(Import::Failed(failure(
            &format!("Can't find stylesheet to import: {name}"),
            line,
            name,
        )))
    }

    /// Invokes a host function; `rest` is `name` optionally followed by one
    /// JSON argument.
    fn call_function(&self, rest: &str, line: u32) -> Result<Result<String, CompileOutcome>> {
        let mut parts = rest.trim().splitn(2, ' ');
        let Some(name) = parts.next().filter(|name| !name.is_empty()) else {
            bail!("@call without a function name");
        };
        let arguments = match parts.next() {
            Some(text) => vec![serde_json::from_str(text).context("bad @call argument")?],
            None => Vec::new(),
        };
        let args = FunctionCallRequest {
            function: name.to_owned(),
            arguments,
        };
        match self.call(CallTarget::FunctionCall, to_value(&args)?)? {
            CallResult::Success { value } => Ok(Ok(format!("--{name}: {value};"))),
            CallResult::Failure { message, .. } => Ok(Err(failure(&message, line, rest))),
        }
    }

    fn log(&self, level: LogLevel, message: &str, line: u32) -> Result<()> {
        let prefix = match level {
            LogLevel::Debug => "Debug",
            LogLevel::Warning => "Warning",
            LogLevel::DeprecationWarning => "Deprecation Warning",
        };
        let event = LogEvent {
            level,
            message: message.to_owned(),
            formatted: format!("{prefix}: {message}"),
            span: Some(span(line, message)),
            stack_trace: Some("root stylesheet".to_owned()),
        };
        // Log events are acknowledged like any other call; the value is null.
        self.call(CallTarget::LogEvent, to_value(&event)?)?;
        Ok(())
    }

    /// Issues one call to the host and blocks until its result arrives.
    fn call(&self, target: CallTarget, payload: Value) -> Result<CallResult> {
        let id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (slot, result) = mpsc::sync_channel(1);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);

        self.write(&InboundEnvelope::Call {
            id,
            request: self.request_id,
            target,
            payload,
        })?;

        result
            .recv_timeout(CALL_TIMEOUT)
            .context("host did not answer the call in time")
    }

    fn respond(&self, outcome: CompileOutcome) -> Result<()> {
        self.write(&InboundEnvelope::Response {
            id: self.request_id,
            payload: to_value(&outcome)?,
        })
    }

    fn write(&self, envelope: &InboundEnvelope) -> Result<()> {
        let bytes = envelope.to_bytes().context("encode envelope")?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_frame(&bytes).context("write frame to host")
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("encode call payload")
}

fn failure(message: &str, line: u32, context: &str) -> CompileOutcome {
    CompileOutcome::Failure {
        message: message.to_owned(),
        span: Some(span(line, context)),
        stack_trace: Some("root stylesheet".to_owned()),
    }
}

fn span(line: u32, context: &str) -> SourceSpan {
    SourceSpan {
        url: None,
        line,
        column: 1,
        context: Some(context.to_owned()),
    }
}
