//! Step specifications and their executors

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};
use crate::template::{resolve, resolve_str};
use crate::transport::Message;

use super::compiler::Shared;
use super::context::SessionContext;
use super::events::EngineEvent;

/// One step of a scenario, as written in the script
///
/// Exactly one of `think`, `connect` or `send` per entry:
/// ```yaml
/// - connect: { url: "/chat" }
/// - send: { json: { msg: "{{greeting}}" } }
/// - think: 0.5
/// - send: "plain text {{name}}"
/// - send: { binary: "bytes of {{name}}" }
/// - send: { binary: [1, 2, 255] }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSpec {
    /// Pause for this many seconds
    Think(f64),
    /// Open a connection
    Connect(ConnectSpec),
    /// Write one message
    Send(SendSpec),
}

impl StepSpec {
    /// Whether this step produces request/response activity
    pub fn is_request(&self) -> bool {
        !matches!(self, StepSpec::Think(_))
    }
}

/// Connection target of a `connect` step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectSpec {
    /// URL template; a leading `/` makes it relative to the configured target
    pub url: String,
}

/// Payload of a `send` step
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SendSpec {
    /// Structured payload, serialized to JSON text after resolution
    Json { json: Value },
    /// Binary frame: a template string sent as its UTF-8 bytes, or an
    /// array of byte values
    Binary { binary: Value },
    /// Anything else; strings are sent as they resolve, other values as JSON
    Raw(Value),
}

/// Compiled, ready-to-run step
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Think(Duration),
    Connect { url: String },
    Send(SendSpec),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Think(duration) => write!(f, "think {:?}", duration),
            Step::Connect { url } => write!(f, "connect {}", url),
            Step::Send(SendSpec::Json { json }) => write!(f, "send json {}", json),
            Step::Send(SendSpec::Binary { binary }) => write!(f, "send binary {}", binary),
            Step::Send(SendSpec::Raw(raw)) => write!(f, "send {}", raw),
        }
    }
}

impl Step {
    pub(crate) fn compile(index: usize, spec: &StepSpec) -> Result<Self> {
        Ok(match spec {
            StepSpec::Think(seconds) => {
                let duration = Duration::try_from_secs_f64(*seconds).map_err(|_| {
                    Error::invalid_step(index, format!("invalid think time {}", seconds))
                })?;
                Step::Think(duration)
            }
            StepSpec::Connect(connect) => Step::Connect {
                url: connect.url.clone(),
            },
            StepSpec::Send(SendSpec::Binary { binary }) => {
                let valid = match binary {
                    Value::String(_) => true,
                    Value::Array(items) => items.iter().all(|item| byte(item).is_some()),
                    _ => false,
                };
                if !valid {
                    return Err(Error::invalid_step(
                        index,
                        "binary payload must be a string or an array of bytes",
                    ));
                }
                Step::Send(SendSpec::Binary {
                    binary: binary.clone(),
                })
            }
            StepSpec::Send(payload) => Step::Send(payload.clone()),
        })
    }

    pub(crate) async fn execute(&self, ctx: &mut SessionContext, shared: &Shared) -> Result<()> {
        match self {
            Step::Think(duration) => {
                tracing::debug!(?duration, "think");
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Step::Connect { url } => connect(url, ctx, shared).await,
            Step::Send(payload) => send(payload, ctx, shared).await,
        }
    }
}

fn byte(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|n| u8::try_from(n).ok())
}

/// Prefix root-relative URLs with the configured target
pub(crate) fn prepend_base(url: &str, target: &str) -> String {
    if url.starts_with('/') {
        format!("{}{}", target, url)
    } else {
        url.to_string()
    }
}

async fn connect(template: &str, ctx: &mut SessionContext, shared: &Shared) -> Result<()> {
    let url = resolve_str(template, &ctx.bindings())?;
    let url = prepend_base(&url, &shared.config.target);

    match shared.connector.connect(&url).await {
        Ok(connection) => {
            if let Some(mut previous) = ctx.set_connection(connection) {
                tracing::debug!("Replacing existing connection");
                if let Err(e) = previous.close().await {
                    tracing::warn!(error = %e, "Failed to close replaced connection");
                }
            }
            tracing::debug!(%url, "Connected");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(%url, error = %e, "Connect step failed");
            shared.emitter.emit(EngineEvent::Error(e.code().to_string()));
            Err(e)
        }
    }
}

async fn send(payload: &SendSpec, ctx: &mut SessionContext, shared: &Shared) -> Result<()> {
    let message = match payload {
        SendSpec::Json { json } => {
            let resolved = resolve(json, &ctx.bindings())?;
            Message::Text(serde_json::to_string(&resolved)?)
        }
        SendSpec::Binary { binary } => match resolve(binary, &ctx.bindings())? {
            Value::String(text) => Message::Binary(text.into_bytes()),
            Value::Array(items) => Message::Binary(items.iter().filter_map(byte).collect()),
            other => Message::Binary(other.to_string().into_bytes()),
        },
        SendSpec::Raw(raw) => match resolve(raw, &ctx.bindings())? {
            Value::String(text) => Message::Text(text),
            other => Message::Text(other.to_string()),
        },
    };

    let connection = ctx.connection_mut().ok_or(Error::NotConnected)?;

    tracing::debug!(bytes = message.len(), "send");
    shared.emitter.emit(EngineEvent::Request);
    let started = Instant::now();

    let result = connection.send(message).await;
    match result {
        Ok(()) => {
            let latency_nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            shared.emitter.emit(EngineEvent::Response {
                latency_nanos,
                status_code: 0,
            });
            ctx.record_success();
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Send step failed");
            shared.emitter.emit(EngineEvent::Error(e.code().to_string()));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Vec<StepSpec> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_step_shapes() {
        let steps = parse(json!([
            { "think": 1 },
            { "connect": { "url": "/chat" } },
            { "send": { "json": { "msg": "{{m}}" } } },
            { "send": "hello {{name}}" },
            { "send": { "text": "raw object" } }
        ]));
        assert_eq!(steps[0], StepSpec::Think(1.0));
        assert_eq!(
            steps[1],
            StepSpec::Connect(ConnectSpec {
                url: "/chat".to_string()
            })
        );
        assert!(matches!(&steps[2], StepSpec::Send(SendSpec::Json { .. })));
        assert_eq!(steps[3], StepSpec::Send(SendSpec::Raw(json!("hello {{name}}"))));
        assert!(matches!(&steps[4], StepSpec::Send(SendSpec::Raw(Value::Object(_)))));
    }

    #[test]
    fn test_unknown_or_ambiguous_steps_are_rejected() {
        assert!(serde_json::from_value::<StepSpec>(json!({ "loop": [] })).is_err());
        assert!(serde_json::from_value::<StepSpec>(
            json!({ "think": 1, "send": "x" })
        )
        .is_err());
    }

    #[test]
    fn test_binary_payloads() {
        let steps = parse(json!([
            { "send": { "binary": "id={{id}}" } },
            { "send": { "binary": [0, 127, 255] } }
        ]));
        assert!(matches!(&steps[0], StepSpec::Send(SendSpec::Binary { .. })));
        assert!(Step::compile(0, &steps[0]).is_ok());
        assert!(Step::compile(1, &steps[1]).is_ok());

        let bad = parse(json!([
            { "send": { "binary": [1, 256] } },
            { "send": { "binary": { "a": 1 } } }
        ]));
        for (index, spec) in bad.iter().enumerate() {
            match Step::compile(index, spec) {
                Err(Error::InvalidStep { index: at, .. }) => assert_eq!(at, index),
                other => panic!("Expected invalid step, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_is_request() {
        let steps = parse(json!([{ "think": 1 }, { "connect": { "url": "/" } }, { "send": "x" }]));
        let flags: Vec<_> = steps.iter().map(StepSpec::is_request).collect();
        assert_eq!(flags, vec![false, true, true]);
    }

    #[test]
    fn test_think_compiles_to_milliseconds() {
        match Step::compile(0, &StepSpec::Think(0.25)).unwrap() {
            Step::Think(d) => assert_eq!(d, Duration::from_millis(250)),
            other => panic!("Expected think, got {}", other),
        }
        assert!(Step::compile(3, &StepSpec::Think(-1.0)).is_err());
        assert!(Step::compile(3, &StepSpec::Think(f64::NAN)).is_err());
    }

    #[test]
    fn test_prepend_base() {
        assert_eq!(prepend_base("/chat", "ws://host:1"), "ws://host:1/chat");
        assert_eq!(prepend_base("ws://other/x", "ws://host:1"), "ws://other/x");
        assert_eq!(prepend_base("/", "ws://host:1"), "ws://host:1/");
    }
}
