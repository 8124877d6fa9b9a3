//! Callback registries adapting host-supplied handlers to the protocol.
//!
//! Handlers are registered per compile request and read-only once built; the
//! receive loop is the only caller, so no locking happens here. Missing
//! handlers degrade to documented defaults: importers answer "not found",
//! log events are echoed to the diagnostic sink.

use std::collections::HashMap;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;

use tinct_protocol::{ImportSource, LogEvent, LogLevel, SourceSpan};

/// Errors reported by caller-supplied callback handlers.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CallbackError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Resolves and loads stylesheets referenced from the source being compiled.
///
/// Both operations default to "not found" so partial implementations degrade
/// the way an absent handler does.
pub trait Importer: Send + Sync {
    /// Resolves a url as written in the stylesheet to its canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when resolution itself fails; returning
    /// `Ok(None)` means the importer does not recognise the url.
    fn canonicalize(&self, url: &str) -> Result<Option<String>, CallbackError> {
        let _ = url;
        Ok(None)
    }

    /// Loads the contents of a previously canonicalised url.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when loading fails; returning `Ok(None)`
    /// means the importer has nothing for the url.
    fn load(&self, canonical_url: &str) -> Result<Option<ImportSource>, CallbackError> {
        let _ = canonical_url;
        Ok(None)
    }
}

/// The universal importer fallback: answers "not found" for every input.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopImporter;

impl Importer for NoopImporter {}

/// Shared immutable no-op importer instance.
static NOOP_IMPORTER: Lazy<Arc<NoopImporter>> = Lazy::new(|| Arc::new(NoopImporter));

/// Returns the shared no-op importer.
///
/// Installed whenever a compile request carries no caller-supplied importer,
/// so the receive loop always has a valid handler to route importer calls to.
#[must_use]
pub fn noop_importer() -> Arc<dyn Importer> {
    let importer: Arc<NoopImporter> = Arc::clone(&NOOP_IMPORTER);
    importer
}

/// A custom function callable from the stylesheet being compiled.
pub trait HostFunction: Send + Sync {
    /// Invokes the function with the compiler-supplied argument values.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError`] when the function rejects its arguments or
    /// fails internally.
    fn call(&self, arguments: &[Value]) -> Result<Value, CallbackError>;
}

impl<F> HostFunction for F
where
    F: Fn(&[Value]) -> Result<Value, CallbackError> + Send + Sync,
{
    fn call(&self, arguments: &[Value]) -> Result<Value, CallbackError> {
        self(arguments)
    }
}

/// Handler for `@debug` events: receives the message and its span.
pub type DebugHandler = Box<dyn Fn(&str, Option<&SourceSpan>) + Send + Sync>;

/// Handler for warnings: receives the message, whether it is a deprecation
/// warning, the span, and the stylesheet stack trace.
pub type WarnHandler = Box<dyn Fn(&str, bool, Option<&SourceSpan>, Option<&str>) + Send + Sync>;

/// Sink that receives pre-formatted diagnostics when no handler is present.
pub type DiagnosticSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Caller-supplied log callbacks; any subset may be provided.
#[derive(Default)]
pub struct LogCallbacks {
    /// Invoked for `@debug` events when present.
    pub on_debug: Option<DebugHandler>,
    /// Invoked for warnings and deprecation warnings when present.
    pub on_warn: Option<WarnHandler>,
}

impl LogCallbacks {
    /// Sets the debug handler.
    #[must_use]
    pub fn with_debug(
        mut self,
        handler: impl Fn(&str, Option<&SourceSpan>) + Send + Sync + 'static,
    ) -> Self {
        self.on_debug = Some(Box::new(handler));
        self
    }

    /// Sets the warning handler.
    #[must_use]
    pub fn with_warn(
        mut self,
        handler: impl Fn(&str, bool, Option<&SourceSpan>, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_warn = Some(Box::new(handler));
        self
    }
}

impl std::fmt::Debug for LogCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCallbacks")
            .field("on_debug", &self.on_debug.is_some())
            .field("on_warn", &self.on_warn.is_some())
            .finish()
    }
}

/// Dispatches log events to the caller's handlers or the diagnostic sink.
///
/// Handler presence is resolved once at construction; `log` never errors. A
/// missing handler never silently drops an event — the event's pre-formatted
/// text is echoed to the sink instead.
pub struct LoggerRegistry {
    debug: Option<DebugHandler>,
    warn: Option<WarnHandler>,
    sink: DiagnosticSink,
}

impl LoggerRegistry {
    /// Builds a registry writing fallback diagnostics to stderr.
    #[must_use]
    pub fn new(callbacks: LogCallbacks) -> Self {
        Self::with_sink(callbacks, default_sink())
    }

    /// Builds a registry with a custom diagnostic sink.
    #[must_use]
    pub fn with_sink(callbacks: LogCallbacks, sink: DiagnosticSink) -> Self {
        Self {
            debug: callbacks.on_debug,
            warn: callbacks.on_warn,
            sink,
        }
    }

    /// Routes one event by its severity tag.
    pub fn log(&self, event: &LogEvent) {
        match event.level {
            LogLevel::Debug => match &self.debug {
                Some(handler) => handler(&event.message, event.span.as_ref()),
                None => (self.sink)(&event.formatted),
            },
            LogLevel::Warning | LogLevel::DeprecationWarning => match &self.warn {
                Some(handler) => handler(
                    &event.message,
                    event.level == LogLevel::DeprecationWarning,
                    event.span.as_ref(),
                    event.stack_trace.as_deref(),
                ),
                None => (self.sink)(&event.formatted),
            },
        }
    }
}

impl std::fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerRegistry")
            .field("debug", &self.debug.is_some())
            .field("warn", &self.warn.is_some())
            .finish()
    }
}

/// The default diagnostic sink: the host's stderr.
fn default_sink() -> DiagnosticSink {
    Arc::new(|text| {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{text}");
    })
}

/// Importers registered for one compile request, keyed by dense index.
pub struct ImporterRegistry {
    importers: Vec<Arc<dyn Importer>>,
}

impl ImporterRegistry {
    /// Builds a registry, installing the no-op importer when none are given.
    #[must_use]
    pub fn new(importers: Vec<Arc<dyn Importer>>) -> Self {
        if importers.is_empty() {
            return Self {
                importers: vec![noop_importer()],
            };
        }
        Self { importers }
    }

    /// Looks up an importer by its wire identifier.
    #[must_use]
    pub fn resolve(&self, id: u32) -> Option<&Arc<dyn Importer>> {
        self.importers.get(id as usize)
    }

    /// Wire identifiers of the registered importers, in precedence order.
    #[must_use]
    pub fn ids(&self) -> Vec<u32> {
        (0..u32::try_from(self.importers.len()).unwrap_or(u32::MAX)).collect()
    }
}

impl std::fmt::Debug for ImporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterRegistry")
            .field("importers", &self.importers.len())
            .finish()
    }
}

/// Custom functions registered for one compile request, keyed by name.
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn HostFunction>>,
}

impl FunctionRegistry {
    /// Builds a registry from named handlers.
    #[must_use]
    pub fn new(functions: HashMap<String, Arc<dyn HostFunction>>) -> Self {
        Self { functions }
    }

    /// Looks up a function by the name it was registered under.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn HostFunction>> {
        self.functions.get(name)
    }

    /// Names of the registered functions.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// The per-request bundle of registries the receive loop routes calls to.
///
/// Built fresh for each compile request and torn down when the request's
/// response is delivered or the request fails.
#[derive(Debug)]
pub struct RequestRegistries {
    /// Importers for this request.
    pub importers: ImporterRegistry,
    /// Custom functions for this request.
    pub functions: FunctionRegistry,
    /// Log dispatch for this request.
    pub logger: LoggerRegistry,
}

impl RequestRegistries {
    /// Bundles the three registries.
    #[must_use]
    pub fn new(
        importers: ImporterRegistry,
        functions: FunctionRegistry,
        logger: LoggerRegistry,
    ) -> Self {
        Self {
            importers,
            functions,
            logger,
        }
    }
}

#[cfg(test)]
mod tests;
