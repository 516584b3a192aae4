//! Drives the handshake and the session over an upgraded byte stream.

use bytes::{Buf, BytesMut};
use http::Request;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::codec::ProtocolVariant;
use super::handshake::{Negotiation, Negotiator};
use super::session::Session;
use crate::config::SessionConfig;
use crate::error::WebSocketError;
use crate::handler::MessageHandler;

/// Size of the challenge nonce following a legacy request head
const NONCE_LEN: usize = 8;

/// Pushes text messages onto a running connection from outside its handler.
#[derive(Clone, Debug)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<String>,
}

impl MessageSender {
    /// Queue a text message for the connection.
    ///
    /// Fails with `ConnectionClosed` once the connection has ended.
    pub fn send(&self, message: impl Into<String>) -> Result<(), WebSocketError> {
        self.tx
            .send(message.into())
            .map_err(|_| WebSocketError::ConnectionClosed)
    }
}

/// One upgraded connection: negotiates, then frames until either side stops.
pub struct Connection<S> {
    stream: S,
    negotiator: Negotiator,
    config: SessionConfig,
    /// Bytes the HTTP layer read past the request head
    buffered: BytesMut,
    outgoing_tx: mpsc::UnboundedSender<String>,
    outgoing_rx: mpsc::UnboundedReceiver<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap a stream whose upgrade request head has already been parsed.
    pub fn new(stream: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Connection {
            stream,
            negotiator: Negotiator::default(),
            config: SessionConfig::default(),
            buffered: BytesMut::new(),
            outgoing_tx: tx,
            outgoing_rx: rx,
        }
    }

    /// Use a specific negotiator
    pub fn with_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// Use specific session limits
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Hand over bytes already read from the stream past the request head.
    pub fn with_buffered(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.buffered.extend_from_slice(bytes.as_ref());
        self
    }

    /// A handle for pushing messages while the connection runs.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            tx: self.outgoing_tx.clone(),
        }
    }

    /// Answer the upgrade `request`, then exchange messages with `handler`
    /// until the peer goes away.
    ///
    /// Returns the handler once the peer closes the stream or starts the
    /// closing handshake. Rejected handshakes, handler failures, protocol
    /// violations and transport errors shut the stream down and are returned.
    pub async fn serve<T, H>(mut self, request: &Request<T>, handler: H) -> Result<H, WebSocketError>
    where
        H: MessageHandler,
    {
        let variant = match self.handshake(request).await {
            Ok(variant) => variant,
            Err(e) => {
                self.shutdown().await;
                return Err(e);
            }
        };

        let mut session = Session::new(variant, handler, &self.config);
        let result = match self.run(&mut session).await {
            Ok(()) => {
                debug!("connection closed by transport");
                Ok(())
            }
            Err(WebSocketError::ClosedByPeer) => {
                debug!("connection closed by peer");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "closing connection");
                Err(e)
            }
        };
        self.shutdown().await;
        result.map(|()| session.into_handler())
    }

    async fn handshake<T>(&mut self, request: &Request<T>) -> Result<ProtocolVariant, WebSocketError> {
        match self.negotiator.negotiate(request) {
            Negotiation::Accepted { variant, response } => {
                self.stream.write_all(&response).await?;
                self.stream.flush().await?;
                Ok(variant)
            }
            Negotiation::Rejected { reason, response } => {
                self.stream.write_all(&response).await?;
                self.stream.flush().await?;
                Err(reason.into())
            }
            Negotiation::AwaitingNonce(pending) => {
                let nonce = self.read_nonce().await?;
                let response = pending.complete(nonce).inspect_err(|e| {
                    warn!(error = %e, "legacy handshake failed");
                })?;
                self.stream.write_all(&response).await?;
                self.stream.flush().await?;
                Ok(ProtocolVariant::Legacy)
            }
        }
    }

    async fn read_nonce(&mut self) -> Result<[u8; NONCE_LEN], WebSocketError> {
        let mut nonce = [0u8; NONCE_LEN];
        let from_buffer = self.buffered.len().min(NONCE_LEN);
        nonce[..from_buffer].copy_from_slice(&self.buffered[..from_buffer]);
        self.buffered.advance(from_buffer);
        self.stream.read_exact(&mut nonce[from_buffer..]).await?;
        Ok(nonce)
    }

    async fn run<H: MessageHandler>(&mut self, session: &mut Session<H>) -> Result<(), WebSocketError> {
        session.connection_made()?;
        if !self.buffered.is_empty() {
            let early = self.buffered.split();
            session.receive(&early)?;
        }
        self.flush(session).await?;

        let mut read_buf = BytesMut::with_capacity(self.config.read_buffer_size);
        loop {
            tokio::select! {
                read = self.stream.read_buf(&mut read_buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                    session.receive(&read_buf)?;
                    read_buf.clear();
                }
                Some(message) = self.outgoing_rx.recv() => {
                    session.send(&message)?;
                }
            }
            self.flush(session).await?;
        }
    }

    async fn flush<H: MessageHandler>(&mut self, session: &mut Session<H>) -> Result<(), WebSocketError> {
        if session.has_outgoing() {
            let bytes = session.take_outgoing();
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "stream shutdown failed");
        }
    }
}
