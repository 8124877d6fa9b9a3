use std::sync::Mutex;

use rstest::rstest;
use serde_json::json;

use tinct_protocol::Syntax;

use super::*;

/// Sink that records everything written to it.
fn recording_sink() -> (DiagnosticSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let sink: DiagnosticSink = Arc::new(move |text: &str| {
        captured
            .lock()
            .expect("sink lock poisoned")
            .push(text.to_owned());
    });
    (sink, lines)
}

fn warning_event() -> LogEvent {
    LogEvent {
        level: LogLevel::Warning,
        message: "deprecated function".to_owned(),
        formatted: "Warning: deprecated function".to_owned(),
        span: Some(SourceSpan {
            url: None,
            line: 3,
            column: 1,
            context: None,
        }),
        stack_trace: Some("root stylesheet".to_owned()),
    }
}

#[rstest]
fn noop_importer_answers_not_found_for_any_input() {
    let importer = NoopImporter;

    assert!(matches!(importer.canonicalize("theme"), Ok(None)));
    assert!(matches!(importer.load("pkg:theme"), Ok(None)));
}

#[rstest]
fn empty_importer_registry_falls_back_to_the_noop_importer() {
    let registry = ImporterRegistry::new(Vec::new());

    let importer = registry.resolve(0).expect("fallback importer missing");
    assert!(matches!(importer.canonicalize("anything"), Ok(None)));
    assert!(registry.resolve(1).is_none());
}

#[rstest]
fn importer_registry_resolves_by_dense_index() {
    struct Fixed;
    impl Importer for Fixed {
        fn canonicalize(&self, url: &str) -> Result<Option<String>, CallbackError> {
            Ok(Some(format!("pkg:{url}")))
        }
    }

    let registry = ImporterRegistry::new(vec![Arc::new(Fixed), noop_importer()]);

    assert_eq!(registry.ids(), vec![0, 1]);
    let first = registry.resolve(0).expect("importer 0 missing");
    assert_eq!(
        first.canonicalize("theme").expect("canonicalize failed"),
        Some("pkg:theme".to_owned())
    );
    let second = registry.resolve(1).expect("importer 1 missing");
    assert!(matches!(second.canonicalize("theme"), Ok(None)));
}

#[rstest]
fn function_registry_resolves_by_name() {
    let double = Arc::new(|arguments: &[serde_json::Value]| {
        let first = arguments
            .first()
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| CallbackError::new("expected a number"))?;
        Ok(json!(first * 2))
    });
    let mut functions: HashMap<String, Arc<dyn HostFunction>> = HashMap::new();
    functions.insert("double($n)".to_owned(), double);
    let registry = FunctionRegistry::new(functions);

    let function = registry.resolve("double($n)").expect("function missing");
    assert_eq!(
        function.call(&[json!(21)]).expect("call failed"),
        json!(42)
    );
    assert!(registry.resolve("missing($x)").is_none());
}

#[rstest]
fn debug_events_reach_the_debug_handler() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let callbacks = LogCallbacks::default().with_debug(move |message, span| {
        captured
            .lock()
            .expect("lock poisoned")
            .push((message.to_owned(), span.map(|s| s.line)));
    });
    let (sink, sink_lines) = recording_sink();
    let registry = LoggerRegistry::with_sink(callbacks, sink);

    registry.log(&LogEvent {
        level: LogLevel::Debug,
        message: "value is 7".to_owned(),
        formatted: "main.scss:2 Debug: value is 7".to_owned(),
        span: Some(SourceSpan {
            url: None,
            line: 2,
            column: 5,
            context: None,
        }),
        stack_trace: None,
    });

    assert_eq!(
        seen.lock().expect("lock poisoned").as_slice(),
        &[("value is 7".to_owned(), Some(2))]
    );
    assert!(sink_lines.lock().expect("lock poisoned").is_empty());
}

#[rstest]
fn warnings_reach_the_warn_handler_with_the_deprecation_flag() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let callbacks = LogCallbacks::default().with_warn(move |message, deprecation, _span, stack| {
        captured.lock().expect("lock poisoned").push((
            message.to_owned(),
            deprecation,
            stack.map(str::to_owned),
        ));
    });
    let registry = LoggerRegistry::with_sink(callbacks, recording_sink().0);

    let mut event = warning_event();
    registry.log(&event);
    event.level = LogLevel::DeprecationWarning;
    registry.log(&event);

    let seen = seen.lock().expect("lock poisoned");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen.first().map(|entry| entry.1), Some(false));
    assert_eq!(seen.get(1).map(|entry| entry.1), Some(true));
}

#[rstest]
fn missing_warn_handler_echoes_formatted_text_to_the_sink() {
    let (sink, lines) = recording_sink();
    let registry = LoggerRegistry::with_sink(LogCallbacks::default(), sink);

    registry.log(&warning_event());

    assert_eq!(
        lines.lock().expect("lock poisoned").as_slice(),
        &["Warning: deprecated function".to_owned()]
    );
}

#[rstest]
fn missing_debug_handler_echoes_rather_than_drops() {
    let (sink, lines) = recording_sink();
    let callbacks = LogCallbacks::default().with_warn(|_, _, _, _| {});
    let registry = LoggerRegistry::with_sink(callbacks, sink);

    registry.log(&LogEvent {
        level: LogLevel::Debug,
        message: "probe".to_owned(),
        formatted: "Debug: probe".to_owned(),
        span: None,
        stack_trace: None,
    });

    assert_eq!(
        lines.lock().expect("lock poisoned").as_slice(),
        &["Debug: probe".to_owned()]
    );
}

#[rstest]
fn partial_importer_implementations_degrade_to_not_found() {
    struct CanonicalizeOnly;
    impl Importer for CanonicalizeOnly {
        fn canonicalize(&self, url: &str) -> Result<Option<String>, CallbackError> {
            Ok(Some(url.to_owned()))
        }
    }

    let importer = CanonicalizeOnly;

    assert_eq!(
        importer.canonicalize("theme").expect("canonicalize failed"),
        Some("theme".to_owned())
    );
    // `load` was not overridden, so it answers like the no-op importer.
    assert!(matches!(importer.load("theme"), Ok(None)));
}

#[rstest]
fn import_source_carries_syntax() {
    struct Loader;
    impl Importer for Loader {
        fn load(&self, _url: &str) -> Result<Option<ImportSource>, CallbackError> {
            Ok(Some(ImportSource {
                contents: ".x { width: 1 }".to_owned(),
                syntax: Syntax::Scss,
            }))
        }
    }

    let loaded = Loader.load("pkg:x").expect("load failed");

    assert_eq!(
        loaded,
        Some(ImportSource {
            contents: ".x { width: 1 }".to_owned(),
            syntax: Syntax::Scss,
        })
    );
}
