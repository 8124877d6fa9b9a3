//! Per-caller facade over the shared channel and dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use tinct_protocol::{CompileOutcome, CompilePayload, Syntax};

use crate::channel::CompilerChannel;
use crate::config::CompilerConfig;
use crate::dispatch::{CancelToken, Dispatcher, FrameSink};
use crate::errors::{CompileFailure, CompilerError};
use crate::registry::{
    FunctionRegistry, HostFunction, Importer, ImporterRegistry, LogCallbacks, LoggerRegistry,
    RequestRegistries,
};

/// Log target for compiler handle operations.
const COMPILER_TARGET: &str = "tinct_host::compiler";

/// Options for one compile call.
///
/// Importers, functions, and log callbacks are scoped to this call: the
/// registries built from them live exactly as long as the request is in
/// flight.
pub struct CompileRequest {
    source: String,
    syntax: Syntax,
    importers: Vec<Arc<dyn Importer>>,
    functions: HashMap<String, Arc<dyn HostFunction>>,
    logger: LogCallbacks,
}

impl CompileRequest {
    /// Builds a request for the given stylesheet source.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            syntax: Syntax::default(),
            importers: Vec::new(),
            functions: HashMap::new(),
            logger: LogCallbacks::default(),
        }
    }

    /// Sets the syntax the source is written in.
    #[must_use]
    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Appends an importer; earlier importers take precedence.
    #[must_use]
    pub fn with_importer(mut self, importer: Arc<dyn Importer>) -> Self {
        self.importers.push(importer);
        self
    }

    /// Registers a custom function under the given name.
    #[must_use]
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: Arc<dyn HostFunction>,
    ) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Supplies log callbacks for this call.
    #[must_use]
    pub fn with_logger(mut self, logger: LogCallbacks) -> Self {
        self.logger = logger;
        self
    }

    /// The stylesheet source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The syntax the source is written in.
    #[must_use]
    pub fn syntax(&self) -> Syntax {
        self.syntax
    }
}

/// A successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSuccess {
    /// The produced css text.
    pub css: String,
    /// Canonical urls loaded during compilation.
    pub loaded_urls: Vec<String>,
}

/// Handle to a running compiler process.
///
/// Cloning is cheap: all clones multiplex one channel and dispatcher, and any
/// number of threads may call [`Compiler::compile`] concurrently.
#[derive(Clone)]
pub struct Compiler {
    inner: Arc<CompilerInner>,
}

struct CompilerInner {
    channel: Arc<CompilerChannel>,
    dispatcher: Arc<Dispatcher>,
    closed: AtomicBool,
}

impl Compiler {
    /// Spawns the compiler process described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::BinaryNotFound`] or [`CompilerError::Spawn`]
    /// when the process cannot be started.
    pub fn spawn(config: &CompilerConfig) -> Result<Self, CompilerError> {
        let (channel, reader) = CompilerChannel::spawn(config)?;
        let channel = Arc::new(channel);
        let sink: Arc<dyn FrameSink> = channel.clone();
        let dispatcher = Dispatcher::start(sink, reader);
        Ok(Self {
            inner: Arc::new(CompilerInner {
                channel,
                dispatcher,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Spawns the compiler resolved from the platform default command.
    ///
    /// # Errors
    ///
    /// As [`Compiler::spawn`].
    pub fn with_default_config() -> Result<Self, CompilerError> {
        Self::spawn(&CompilerConfig::platform_default())
    }

    /// Compiles one stylesheet, blocking until the compiler answers.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Compile`] when the compiler rejects the
    /// stylesheet, [`CompilerError::Closed`] after [`Compiler::close`], and
    /// channel-level errors when the process dies mid-flight.
    pub fn compile(&self, request: CompileRequest) -> Result<CompileSuccess, CompilerError> {
        self.compile_with(request, &CancelToken::new())
    }

    /// Compiles one stylesheet with a host-local cancellation token.
    ///
    /// Cancelling releases this caller only; work already dispatched to the
    /// external process is not recalled.
    ///
    /// # Errors
    ///
    /// As [`Compiler::compile`], plus [`CompilerError::Cancelled`] when the
    /// token is set before the response arrives.
    pub fn compile_with(
        &self,
        request: CompileRequest,
        cancel: &CancelToken,
    ) -> Result<CompileSuccess, CompilerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CompilerError::Closed);
        }

        let importers = ImporterRegistry::new(request.importers);
        let functions = FunctionRegistry::new(request.functions);
        let logger = LoggerRegistry::new(request.logger);
        let payload = CompilePayload {
            source: request.source,
            syntax: request.syntax,
            importers: importers.ids(),
            functions: functions.names(),
        };
        let payload = serde_json::to_value(&payload)?;
        let registries = RequestRegistries::new(importers, functions, logger);

        debug!(
            target: COMPILER_TARGET,
            syntax = ?request.syntax,
            "dispatching compile request"
        );

        let response = self.inner.dispatcher.submit(payload, registries, cancel)?;
        match serde_json::from_value::<CompileOutcome>(response)? {
            CompileOutcome::Success { css, loaded_urls } => Ok(CompileSuccess { css, loaded_urls }),
            CompileOutcome::Failure {
                message,
                span,
                stack_trace,
            } => Err(CompilerError::Compile(CompileFailure {
                message,
                span,
                stack_trace,
            })),
        }
    }

    /// Whether [`Compiler::close`] has been called on any clone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Releases the compiler process.
    ///
    /// Idempotent. Subsequent compiles on any clone fail with
    /// [`CompilerError::Closed`]; requests still in flight fail as the
    /// channel shuts down.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(target: COMPILER_TARGET, "closing compiler handle");
            self.inner.channel.close();
        }
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("closed", &self.is_closed())
            .field("channel", &self.inner.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn request_builder_accumulates_options() {
        let request = CompileRequest::new(".a { width: 1 }")
            .with_syntax(Syntax::Css)
            .with_importer(Arc::new(crate::registry::NoopImporter))
            .with_logger(LogCallbacks::default());

        assert_eq!(request.source(), ".a { width: 1 }");
        assert_eq!(request.syntax(), Syntax::Css);
        assert_eq!(request.importers.len(), 1);
        assert!(request.functions.is_empty());
    }

    #[rstest]
    fn spawn_failure_surfaces_before_any_dispatch() {
        let config = CompilerConfig::new("/nonexistent/tinctc");

        assert!(matches!(
            Compiler::spawn(&config),
            Err(CompilerError::BinaryNotFound { .. })
        ));
    }
}
