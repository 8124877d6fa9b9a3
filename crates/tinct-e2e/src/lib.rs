//! End-to-end test infrastructure for the tinct host.
//!
//! This crate provides integration testing support that exercises the host
//! stack against a real subprocess:
//!
//! - `tinct-stubc`: a stub compiler binary speaking the real wire protocol
//! - [`fixtures`]: canned stylesheet sources for the stub's mini-language
//! - [`stub_config`]: builds a [`CompilerConfig`] for a stub binary path
//!
//! # The stub mini-language
//!
//! The stub interprets its source line by line. Plain lines are echoed into
//! the produced css verbatim. Directive lines drive protocol behaviour:
//!
//! - `@use "name"` — canonicalize/load through the request's importers
//! - `@call name arg` — invoke a host function and emit its result
//! - `@debug msg` / `@warn msg` / `@deprecate msg` — emit log events
//! - `!fail msg` — answer with a compile failure at that line
//! - `!sleep ms` — delay before continuing (for cancellation/crash tests)
//! - `!crash` — exit the process immediately, mid-flight
//!
//! Integration tests resolve the stub binary with
//! `env!("CARGO_BIN_EXE_tinct-stubc")`.

pub mod fixtures;

use std::path::PathBuf;

use tinct_host::CompilerConfig;

/// Builds a configuration pointing at a stub compiler binary.
#[must_use]
pub fn stub_config(binary: impl Into<PathBuf>) -> CompilerConfig {
    CompilerConfig::new(binary)
}
