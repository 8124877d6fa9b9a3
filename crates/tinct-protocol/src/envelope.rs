//! Envelope and payload types exchanged with the external compiler.
//!
//! Every frame payload is one JSON envelope. Envelopes carry a request
//! identifier, a `kind` discriminator, and a body; the body of a compile
//! request or response is opaque to the dispatch layer and is interpreted only
//! at the compiler-handle boundary. Compiler-initiated calls additionally name
//! the pending compile request they belong to, so the host can route them to
//! that request's callback registries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages travelling from the host to the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OutboundEnvelope {
    /// A compile request initiated by a host caller.
    Compile {
        /// Identifier unique among in-flight requests on the channel.
        id: u32,
        /// Encoded compile payload, opaque to the dispatch layer.
        payload: Value,
    },
    /// The host's reply to a compiler-initiated call.
    CallResult {
        /// Identifier of the call being answered, chosen by the compiler.
        id: u32,
        /// Outcome of the invoked callback handler.
        result: CallResult,
    },
}

impl OutboundEnvelope {
    /// Serialises the envelope into frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when serialisation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses an envelope from frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the bytes are not a valid
    /// outbound envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Messages travelling from the compiler to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InboundEnvelope {
    /// Response correlating 1:1 with a prior compile request.
    Response {
        /// Identifier of the request being answered.
        id: u32,
        /// Encoded compile outcome, opaque to the dispatch layer.
        payload: Value,
    },
    /// A compiler-initiated call the host must answer.
    Call {
        /// Identifier chosen by the compiler; the host replies with it.
        id: u32,
        /// Identifier of the still-pending compile request the call belongs
        /// to.
        request: u32,
        /// Which host capability the call addresses.
        target: CallTarget,
        /// Call arguments, decoded per target.
        payload: Value,
    },
}

impl InboundEnvelope {
    /// Serialises the envelope into frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when serialisation fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses an envelope from frame payload bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the bytes are not a valid
    /// inbound envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Host capability addressed by a compiler-initiated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallTarget {
    /// Resolve a stylesheet url to canonical form.
    ImporterCanonicalize,
    /// Load the contents of a canonical url.
    ImporterLoad,
    /// Invoke a host-registered custom function.
    FunctionCall,
    /// Deliver a log or warning event.
    LogEvent,
}

/// Outcome of a host callback, sent back to the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CallResult {
    /// The handler produced a value.
    Success {
        /// Handler result, shaped per call target.
        value: Value,
    },
    /// The handler failed or could not be reached.
    Failure {
        /// Classification of the failure.
        kind: CallErrorKind,
        /// Human-readable description.
        message: String,
    },
}

/// Classification of a failed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallErrorKind {
    /// The handler itself returned an error.
    Handler,
    /// The call referenced a request whose registries were already torn down.
    StaleCallback,
    /// The call arguments did not decode for the declared target.
    MalformedPayload,
}

/// Body of a compile request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilePayload {
    /// Stylesheet source text.
    pub source: String,
    /// Syntax the source is written in.
    pub syntax: Syntax,
    /// Identifiers of the importers registered for this request, in
    /// precedence order.
    pub importers: Vec<u32>,
    /// Names of the custom functions registered for this request.
    pub functions: Vec<String>,
}

/// Stylesheet syntaxes understood by the compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Syntax {
    /// SCSS syntax.
    #[default]
    Scss,
    /// Indented syntax.
    Indented,
    /// Plain CSS.
    Css,
}

/// Body of a compile response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum CompileOutcome {
    /// Compilation produced css.
    Success {
        /// The produced css text.
        css: String,
        /// Canonical urls loaded during compilation.
        loaded_urls: Vec<String>,
    },
    /// The compiler rejected the stylesheet.
    Failure {
        /// Diagnostic message from the compiler.
        message: String,
        /// Source location of the problem, when known.
        span: Option<SourceSpan>,
        /// Stylesheet stack trace, when available.
        stack_trace: Option<String>,
    },
}

/// A location within a stylesheet source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Url of the containing stylesheet, when known.
    pub url: Option<String>,
    /// One-based line number.
    pub line: u32,
    /// One-based column number.
    pub column: u32,
    /// The source text the span covers, when available.
    pub context: Option<String>,
}

/// Arguments of an `importer-canonicalize` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizeRequest {
    /// Identifier of the importer to consult.
    pub importer: u32,
    /// Url as written in the stylesheet.
    pub url: String,
}

/// Reply value of an `importer-canonicalize` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizeReply {
    /// Canonical url, or `None` when the importer does not recognise it.
    pub url: Option<String>,
}

/// Arguments of an `importer-load` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    /// Identifier of the importer to consult.
    pub importer: u32,
    /// Canonical url to load.
    pub url: String,
}

/// Reply value of an `importer-load` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReply {
    /// Loaded source, or `None` when the importer has nothing for the url.
    pub source: Option<ImportSource>,
}

/// Stylesheet text produced by an importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSource {
    /// The stylesheet text.
    pub contents: String,
    /// Syntax of the text.
    pub syntax: Syntax,
}

/// Arguments of a `function-call` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Name the function was registered under.
    pub function: String,
    /// Argument values.
    pub arguments: Vec<Value>,
}

/// Body of a `log-event` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event severity.
    pub level: LogLevel,
    /// The bare message text.
    pub message: String,
    /// Pre-formatted text suitable for a diagnostic sink.
    pub formatted: String,
    /// Source location the event refers to, when known.
    pub span: Option<SourceSpan>,
    /// Stylesheet stack trace, when available.
    pub stack_trace: Option<String>,
}

/// Severity of a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// `@debug` output.
    Debug,
    /// `@warn` output or a compiler warning.
    Warning,
    /// A deprecation warning.
    DeprecationWarning,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn parse_inbound(json: &str) -> InboundEnvelope {
        match InboundEnvelope::from_bytes(json.as_bytes()) {
            Ok(envelope) => envelope,
            Err(error) => panic!("parse failed: {error}"),
        }
    }

    #[rstest]
    fn serialises_compile_request_with_kind_tag() {
        let envelope = OutboundEnvelope::Compile {
            id: 7,
            payload: json!({"source": ".a { width: 1 }"}),
        };

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => panic!("serialisation failed: {error}"),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        assert!(text.contains(r#""kind":"compile""#));
        assert!(text.contains(r#""id":7"#));
    }

    #[rstest]
    fn round_trips_call_result() {
        let envelope = OutboundEnvelope::CallResult {
            id: 3,
            result: CallResult::Failure {
                kind: CallErrorKind::StaleCallback,
                message: "no live request".to_owned(),
            },
        };

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => panic!("serialisation failed: {error}"),
        };
        assert_eq!(OutboundEnvelope::from_bytes(&bytes).ok(), Some(envelope));
    }

    #[rstest]
    fn deserialises_response_envelope() {
        let envelope = parse_inbound(r#"{"kind":"response","id":41,"payload":{"result":"success","css":"","loaded_urls":[]}}"#);

        assert!(matches!(
            envelope,
            InboundEnvelope::Response { id: 41, .. }
        ));
    }

    #[rstest]
    fn deserialises_call_envelope_with_request_linkage() {
        let envelope = parse_inbound(
            r#"{"kind":"call","id":9,"request":2,"target":"importer-canonicalize","payload":{"importer":0,"url":"theme"}}"#,
        );

        match envelope {
            InboundEnvelope::Call {
                id,
                request,
                target,
                payload,
            } => {
                assert_eq!(id, 9);
                assert_eq!(request, 2);
                assert_eq!(target, CallTarget::ImporterCanonicalize);
                let decoded: Result<CanonicalizeRequest, _> = serde_json::from_value(payload);
                assert_eq!(
                    decoded.ok(),
                    Some(CanonicalizeRequest {
                        importer: 0,
                        url: "theme".to_owned(),
                    })
                );
            }
            other => panic!("expected a call envelope, got {other:?}"),
        }
    }

    #[rstest]
    #[case(CallTarget::ImporterCanonicalize, "importer-canonicalize")]
    #[case(CallTarget::ImporterLoad, "importer-load")]
    #[case(CallTarget::FunctionCall, "function-call")]
    #[case(CallTarget::LogEvent, "log-event")]
    fn call_targets_use_kebab_case_names(#[case] target: CallTarget, #[case] expected: &str) {
        assert_eq!(
            serde_json::to_value(target).ok(),
            Some(Value::String(expected.to_owned()))
        );
    }

    #[rstest]
    fn round_trips_compile_outcome_failure() {
        let outcome = CompileOutcome::Failure {
            message: "undefined variable".to_owned(),
            span: Some(SourceSpan {
                url: Some("file:///main.scss".to_owned()),
                line: 4,
                column: 12,
                context: Some("$missing".to_owned()),
            }),
            stack_trace: None,
        };

        let value = match serde_json::to_value(&outcome) {
            Ok(value) => value,
            Err(error) => panic!("serialisation failed: {error}"),
        };
        let back: Result<CompileOutcome, _> = serde_json::from_value(value);

        assert_eq!(back.ok(), Some(outcome));
    }

    #[rstest]
    fn log_event_defaults_are_not_assumed() {
        let event = parse_log_event(
            r#"{"level":"deprecation-warning","message":"m","formatted":"Deprecation: m","span":null,"stack_trace":null}"#,
        );

        assert_eq!(event.level, LogLevel::DeprecationWarning);
        assert_eq!(event.formatted, "Deprecation: m");
        assert!(event.span.is_none());
    }

    fn parse_log_event(json: &str) -> LogEvent {
        match serde_json::from_str(json) {
            Ok(event) => event,
            Err(error) => panic!("parse failed: {error}"),
        }
    }
}
