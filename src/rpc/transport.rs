//! Transport layer for the RPC engine.
//!
//! The engine only needs three things from a connection: read one message,
//! write one message, close. A connection is split into a [`MessageReader`]
//! owned by the read loop and a [`MessageWriter`] shared by every task that
//! answers a call or pushes an observer event.
//!
//! The WebSocket adapter carries one JSON-RPC message per text frame.

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use super::protocol::{DecodeError, Message};

/// Errors surfaced by a transport.
///
/// `Decode` means the peer sent something that is not a JSON-RPC message; the
/// connection itself is still healthy. Every other variant means the
/// connection is no longer usable.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("unsupported frame kind: {0}")]
    UnsupportedFrame(&'static str),
    #[error("invalid message: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("transport failure: {0}")]
    Io(#[source] axum::Error),
}

/// Read half of a message transport.
#[async_trait]
pub trait MessageReader: Send {
    /// Read the next whole message and its size in bytes.
    async fn read(&mut self) -> Result<(Message, usize), TransportError>;
}

/// Write half of a message transport. Implementations serialize concurrent writers.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Write one whole message and return its size in bytes.
    async fn write(&self, message: &Message) -> Result<usize, TransportError>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Split an upgraded WebSocket into its reader and writer halves.
pub fn websocket(socket: WebSocket) -> (WsReader, WsWriter) {
    let (sink, stream) = socket.split();
    (
        WsReader { stream },
        WsWriter {
            sink: Mutex::new(sink),
        },
    )
}

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

pub struct WsWriter {
    sink: Mutex<SplitSink<WebSocket, ws::Message>>,
}

#[async_trait]
impl MessageReader for WsReader {
    async fn read(&mut self) -> Result<(Message, usize), TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(TransportError::Io(e)),
                None => return Err(TransportError::Closed),
            };

            match frame {
                ws::Message::Text(text) => {
                    let message = Message::decode(text.as_str())?;
                    return Ok((message, text.len()));
                }
                ws::Message::Close(_) => return Err(TransportError::Closed),
                ws::Message::Binary(_) => return Err(TransportError::UnsupportedFrame("binary")),
                // axum answers pings on its own
                ws::Message::Ping(_) | ws::Message::Pong(_) => continue,
            }
        }
    }
}

#[async_trait]
impl MessageWriter for WsWriter {
    async fn write(&self, message: &Message) -> Result<usize, TransportError> {
        let text = message.encode().map_err(TransportError::Encode)?;
        let size = text.len();

        let mut sink = self.sink.lock().await;
        sink.send(ws::Message::Text(text.into()))
            .await
            .map_err(TransportError::Io)?;

        Ok(size)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(TransportError::Io)
    }
}

/// In-memory transport used by unit tests: every written message is recorded.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;

    pub(crate) struct RecordingWriter {
        tx: mpsc::UnboundedSender<Message>,
    }

    impl RecordingWriter {
        pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { tx }, rx)
        }
    }

    #[async_trait]
    impl MessageWriter for RecordingWriter {
        async fn write(&self, message: &Message) -> Result<usize, TransportError> {
            let size = message.encode().map_err(TransportError::Encode)?.len();
            self.tx.send(message.clone()).map_err(|_| TransportError::Closed)?;
            Ok(size)
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    pub(crate) struct ChannelReader {
        pub(crate) rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl MessageReader for ChannelReader {
        async fn read(&mut self) -> Result<(Message, usize), TransportError> {
            let text = self.rx.recv().await.ok_or(TransportError::Closed)?;
            Ok((Message::decode(&text)?, text.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::testing::ChannelReader;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn decode_errors_leave_the_reader_usable() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = ChannelReader { rx };
        tx.send("{".to_string()).unwrap();
        tx.send(r#"{"jsonrpc":"2.0","method":"Ping"}"#.to_string()).unwrap();
        drop(tx);

        assert!(matches!(
            reader.read().await,
            Err(TransportError::Decode(DecodeError::Json(_)))
        ));
        assert!(matches!(
            reader.read().await,
            Ok((Message::Notification(_), _))
        ));
        assert!(matches!(reader.read().await, Err(TransportError::Closed)));
    }
}
