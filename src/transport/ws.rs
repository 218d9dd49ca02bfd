//! WebSocket transport built on tokio-tungstenite

use std::io;

use async_trait::async_trait;
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::common::{Error, Result};

use super::{Connection, Connector, Message};

/// Opens WebSocket connections (`ws://` and `wss://`)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        tracing::debug!(%url, "Opening WebSocket");
        let (stream, response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| Error::Connect {
                    url: url.to_string(),
                    code: error_code(&e),
                    message: e.to_string(),
                })?;
        tracing::debug!(%url, status = %response.status(), "WebSocket open");
        Ok(Box::new(WsConnection { stream }))
    }
}

/// An open WebSocket
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: Message) -> Result<()> {
        let frame = match message {
            Message::Text(text) => WsMessage::Text(text),
            Message::Binary(data) => WsMessage::Binary(data),
        };
        self.stream.send(frame).await.map_err(|e| Error::Send {
            code: error_code(&e),
            message: e.to_string(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::Send {
                code: error_code(&e),
                message: e.to_string(),
            }),
        }
    }
}

/// Short code for a WebSocket failure, in the style of socket errno names
fn error_code(err: &tungstenite::Error) -> String {
    match err {
        tungstenite::Error::Io(e) => io_code(e).to_string(),
        tungstenite::Error::Http(response) => format!("HTTP_{}", response.status().as_u16()),
        tungstenite::Error::Url(_) => "EINVALIDURL".to_string(),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            "ECONNCLOSED".to_string()
        }
        tungstenite::Error::Protocol(_) => "EPROTOCOL".to_string(),
        tungstenite::Error::Capacity(_) | tungstenite::Error::WriteBufferFull(_) => {
            "EMSGSIZE".to_string()
        }
        _ => "EWEBSOCKET".to_string(),
    }
}

fn io_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::NotFound => "ENOTFOUND",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::PermissionDenied => "EACCES",
        _ => "EIO",
    }
}
