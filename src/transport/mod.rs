//! Connection capability used by sessions
//!
//! The engine only needs three things from a transport: open a connection
//! to a URL, write one message, close. Completion of each is an await point.

mod ws;

use async_trait::async_trait;

use crate::common::Result;

pub use ws::{WsConnection, WsConnector};

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opens connections
///
/// Failures should surface as `Error::Connect` with a short code so the
/// session can emit it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// An open, exclusively owned connection
#[async_trait]
pub trait Connection: Send {
    /// Write one message; resolves once the write has completed
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}
