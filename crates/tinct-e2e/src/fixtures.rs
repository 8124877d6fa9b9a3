//! Canned stylesheet sources for the stub compiler's mini-language.

/// Two plain declarations, echoed into the css verbatim.
pub const SIMPLE_RULE: &str = "width: 4px\nheight: 2px";

/// Fails compilation at line one with a diagnostic message.
pub const FAILING: &str = "!fail undefined variable $accent";

/// Imports `theme` through the request's importers, then one declaration.
pub const USES_THEME: &str = "@use \"theme\"\ncolor: blue";

/// Emits a debug event, then one declaration.
pub const DEBUGS: &str = "@debug probe value\nwidth: 1px";

/// Emits a warning event, then one declaration.
pub const WARNS: &str = "@warn legacy mixin\nwidth: 1px";

/// Emits a deprecation warning event, then one declaration.
pub const DEPRECATES: &str = "@deprecate old-division\nwidth: 1px";

/// Calls the host function registered as `double` with the argument `21`.
pub const CALLS_DOUBLE: &str = "@call double 21";

/// Calls a function the host never registered.
pub const CALLS_UNKNOWN: &str = "@call missing 1";
