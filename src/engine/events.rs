//! Session lifecycle events
//!
//! The engine publishes events and never reads anything back. Aggregating
//! them into statistics is the consumer's job.

use std::fmt;

use tokio::sync::mpsc;

/// Event emitted by a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Session connected (or deferred) and is about to run its steps
    Started,
    /// A message is about to be written
    Request,
    /// A write completed
    Response { latency_nanos: u64, status_code: u16 },
    /// A connection or write failed; carries the failure code
    Error(String),
}

impl EngineEvent {
    /// Event name as used by consumers
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Request => "request",
            Self::Response { .. } => "response",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response {
                latency_nanos,
                status_code,
            } => write!(f, "response({}, {})", latency_nanos, status_code),
            Self::Error(code) => write!(f, "error({})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Publish point shared by all sessions of a run
///
/// Must tolerate concurrent calls from many sessions.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&self, event: EngineEvent) {
        tracing::trace!(%event, "emit");
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl Emitter for NullEmitter {
    fn emit(&self, _event: EngineEvent) {}
}
