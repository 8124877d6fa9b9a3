//! Host-side client for the tinct embedded stylesheet compiler.
//!
//! The crate owns the lifecycle of the external compiler subprocess and the
//! protocol conversation with it: framing requests onto the process's stdin,
//! demultiplexing responses arriving on its stdout back to the callers that
//! issued them, and servicing the calls the compiler makes back into the host
//! (importers, custom functions, log events) while compilations are in
//! flight. Callers interact through [`Compiler`], which may be cloned cheaply;
//! all clones multiplex one shared channel.
//!
//! The stylesheet language itself lives entirely in the external process; this
//! crate treats compile payloads as opaque envelopes defined by
//! [`tinct_protocol`].

mod channel;
mod compiler;
mod config;
mod dispatch;
mod errors;
mod registry;

pub use channel::CompilerChannel;
pub use compiler::{CompileRequest, CompileSuccess, Compiler};
pub use config::CompilerConfig;
pub use dispatch::{CancelToken, Dispatcher, FrameSink};
pub use errors::{CompileFailure, CompilerError};
pub use registry::{
    CallbackError, DebugHandler, DiagnosticSink, FunctionRegistry, HostFunction, Importer,
    ImporterRegistry, LogCallbacks, LoggerRegistry, NoopImporter, RequestRegistries, WarnHandler,
    noop_importer,
};
