//! Error types for the session engine
//!
//! Connection and send failures carry a short machine-readable code
//! (`ECONNREFUSED`, `HTTP_404`, ...) which is what gets emitted on the
//! event bus; the full message stays in the error value.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the session engine
#[derive(Error, Debug)]
pub enum Error {
    // === Template Errors ===
    #[error("Template syntax error at offset {offset}: {message}")]
    TemplateSyntax { offset: usize, message: String },

    #[error("Argument {index} of ${function}() must be a literal value")]
    TemplateArgument { function: String, index: usize },

    #[error("Function ${name}() failed: {message}")]
    Function { name: String, message: String },

    // === Sandbox Errors ===
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    // === Scenario Errors ===
    #[error("Invalid step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Failed to parse scenario '{path}': {message}")]
    ScenarioParse { path: String, message: String },

    // === Session Errors ===
    #[error("Failed to connect to {url}: {message} ({code})")]
    Connect {
        url: String,
        code: String,
        message: String,
    },

    #[error("Send failed: {message} ({code})")]
    Send { code: String, message: String },

    #[error("No connection established. Add a 'connect' step or disable deferred connection")]
    NotConnected,

    #[error("{failed} of {total} sessions failed")]
    SessionsFailed { failed: usize, total: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a template syntax error
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            offset,
            message: message.into(),
        }
    }

    /// Create a function binding failure
    pub fn function(name: &str, message: impl Into<String>) -> Self {
        Self::Function {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid step error
    pub fn invalid_step(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidStep {
            index,
            reason: reason.into(),
        }
    }

    /// Short code describing the failure, used as the `error` event payload
    pub fn code(&self) -> &str {
        match self {
            Error::Connect { code, .. } | Error::Send { code, .. } => code,
            Error::NotConnected => "ENOTCONN",
            Error::SessionsFailed { .. } => "EFAILED",
            Error::TemplateSyntax { .. } | Error::TemplateArgument { .. } => "ETEMPLATE",
            Error::Function { .. } | Error::Evaluation(_) => "EFUNCTION",
            Error::InvalidStep { .. } | Error::ScenarioParse { .. } => "ESCENARIO",
            Error::Config(_) | Error::ConfigParse(_) => "ECONFIG",
            Error::Io(_) | Error::FileRead { .. } => "EIO",
            Error::Json(_) => "EJSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_expose_their_code() {
        let err = Error::Connect {
            url: "ws://localhost:1".to_string(),
            code: "ECONNREFUSED".to_string(),
            message: "Connection refused".to_string(),
        };
        assert_eq!(err.code(), "ECONNREFUSED");
        assert!(err.to_string().contains("ws://localhost:1"));
    }

    #[test]
    fn test_engine_errors_have_stable_codes() {
        assert_eq!(Error::NotConnected.code(), "ENOTCONN");
        assert_eq!(Error::syntax(3, "unexpected token").code(), "ETEMPLATE");
        assert_eq!(Error::invalid_step(0, "negative think").code(), "ESCENARIO");
    }
}
