//! Template resolution and script evaluation
//!
//! Payloads in a scenario are JSON values whose strings may contain
//! `{{ variable }}` markers or `{{ $function(args) }}` calls. They are
//! resolved against a session's bindings right before each step uses them.

pub mod expr;
pub mod functions;
pub mod resolve;
pub mod sandbox;

pub use functions::Functions;
pub use resolve::{resolve, resolve_str, Bindings};
pub use sandbox::Sandbox;

use serde_json::Value;

/// String form of a value when it is spliced into text
///
/// Strings are used raw, containers as compact JSON.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
