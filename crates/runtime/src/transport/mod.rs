//! Length-prefixed pipe transport.
//!
//! The connection only requires an ordered, reliable, duplex message stream;
//! the actual framing is a collaborator's concern. This module provides the
//! reference framing: each JSON message is preceded by its byte length as a
//! 4-byte little-endian prefix. It runs over any `AsyncWrite`/`AsyncRead`
//! pair: a child process's stdio, a socket, or an in-memory duplex in tests.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};


/// Outbound half of a transport.
pub trait Transport: Send {
    /// Frames and writes one message.
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// Inbound half of a transport: a read loop pushing decoded messages into
/// the channel handed out at construction.
pub trait TransportReceiver: Send {
    /// Runs until clean EOF, a framing error, or the consumer goes away.
    fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Type-erased transport halves plus the inbound message channel, as consumed
/// by [`Connection::new`](crate::connection::Connection::new).
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Length-prefixed transport over a write/read stream pair.
pub struct PipeTransport<W, R> {
    sender: PipeTransportSender<W>,
    receiver: PipeTransportReceiver<R>,
}

impl<W, R> PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates a transport over `writer`/`reader` and returns the channel the
    /// read loop will deliver inbound messages on.
    pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            sender: PipeTransportSender { writer },
            receiver: PipeTransportReceiver {
                reader,
                inbound_tx,
            },
        };
        (transport, inbound_rx)
    }

    /// Runs the read loop on this transport without splitting it.
    pub async fn run(&mut self) -> Result<()> {
        self.receiver.read_loop().await
    }

    /// Splits into independently owned sender and receiver halves.
    pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
        (self.sender, self.receiver)
    }

    /// Boxes both halves for [`Connection::new`](crate::connection::Connection::new).
    pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
        let (sender, receiver) = self.into_parts();
        TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        }
    }
}

/// Writing half: frames messages with the 4-byte little-endian prefix.
pub struct PipeTransportSender<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let payload = serde_json::to_vec(&message)?;
        let prefix = (payload.len() as u32).to_le_bytes();
        self.writer
            .write_all(&prefix)
            .await
            .map_err(|e| Error::Transport(format!("failed to write length prefix: {e}")))?;
        self.writer
            .write_all(&payload)
            .await
            .map_err(|e| Error::Transport(format!("failed to write message body: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush transport: {e}")))?;
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
    fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(PipeTransportSender::send(self, message))
    }
}

/// Reading half: decodes frames and forwards them until EOF or error.
pub struct PipeTransportReceiver<R> {
    reader: R,
    inbound_tx: mpsc::UnboundedSender<Value>,
}

impl<R: AsyncRead + Unpin + Send> PipeTransportReceiver<R> {
    pub async fn run(&mut self) -> Result<()> {
        self.read_loop().await
    }

    async fn read_loop(&mut self) -> Result<()> {
        loop {
            let mut prefix = [0u8; 4];
            let mut filled = 0;
            while filled < prefix.len() {
                let n = self
                    .reader
                    .read(&mut prefix[filled..])
                    .await
                    .map_err(|e| Error::Transport(format!("failed to read length prefix: {e}")))?;
                if n == 0 {
                    if filled == 0 {
                        // Clean EOF at a frame boundary.
                        return Ok(());
                    }
                    return Err(Error::Transport(
                        "failed to read length prefix: unexpected EOF".to_string(),
                    ));
                }
                filled += n;
            }

            let length = u32::from_le_bytes(prefix) as usize;
            let mut payload = vec![0u8; length];
            self.reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| Error::Transport(format!("failed to read message body: {e}")))?;

            let message: Value = serde_json::from_slice(&payload)
                .map_err(|e| Error::Transport(format!("malformed message payload: {e}")))?;

            if self.inbound_tx.send(message).is_err() {
                // Consumer went away; shutting down is not an error.
                return Ok(());
            }
        }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
    fn run(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.read_loop().await })
    }
}
