//! Per-connection framing state and message dispatch.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::codec::{ProtocolVariant, VariantCodec};
use crate::config::SessionConfig;
use crate::error::WebSocketError;
use crate::handler::{MessageHandler, Outbox};

/// Buffers owned by one connection.
///
/// `pending_bytes` holds received bytes that do not yet form a complete
/// frame; the codec holds the payload of an unfinished fragmented message.
pub struct ConnectionState {
    pending_bytes: BytesMut,
    codec: VariantCodec,
}

impl ConnectionState {
    /// Create empty buffers framing with `variant`
    pub fn new(variant: ProtocolVariant, config: &SessionConfig) -> Self {
        Self {
            pending_bytes: BytesMut::new(),
            codec: VariantCodec::new(variant, config.max_message_size),
        }
    }

    /// The negotiated variant
    pub fn variant(&self) -> ProtocolVariant {
        self.codec.variant()
    }

    /// Bytes carried over to the next delivery
    pub fn pending_len(&self) -> usize {
        self.pending_bytes.len()
    }
}

/// Drives the codec over inbound chunks and dispatches completed messages.
///
/// Decoding never blocks: a chunk that ends mid-frame is kept and picked up
/// again by the next call to [`Session::receive`].
pub struct Session<H> {
    state: ConnectionState,
    handler: H,
    outbox: Outbox,
    outgoing: BytesMut,
}

impl<H: MessageHandler> Session<H> {
    /// Create a session for a connection that negotiated `variant`.
    pub fn new(variant: ProtocolVariant, handler: H, config: &SessionConfig) -> Self {
        Self {
            state: ConnectionState::new(variant, config),
            handler,
            outbox: Outbox::new(),
            outgoing: BytesMut::new(),
        }
    }

    /// The connection's buffers
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The negotiated variant
    pub fn variant(&self) -> ProtocolVariant {
        self.state.variant()
    }

    /// The application handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Give the handler back, dropping the buffers
    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Notify the handler that the connection is established.
    pub fn connection_made(&mut self) -> Result<(), WebSocketError> {
        self.handler
            .connection_made(&mut self.outbox)
            .map_err(|e| WebSocketError::Dispatch(e.to_string()))?;
        self.encode_outbox()
    }

    /// Feed one inbound chunk and dispatch every message it completes.
    ///
    /// Returns the number of messages dispatched. Frames pipelined in a
    /// single chunk are handled in a loop, one dispatch per completed message.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<usize, WebSocketError> {
        self.state.pending_bytes.extend_from_slice(chunk);

        let mut dispatched = 0;
        while let Some(message) = self.state.codec.decode(&mut self.state.pending_bytes)? {
            self.dispatch(message)?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Encode a text message for the transport.
    pub fn send(&mut self, message: &str) -> Result<(), WebSocketError> {
        self.state.codec.encode(message.as_bytes(), &mut self.outgoing)
    }

    /// Whether encoded bytes are waiting for the transport
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Take every encoded byte produced so far, in order.
    pub fn take_outgoing(&mut self) -> Bytes {
        self.outgoing.split().freeze()
    }

    fn dispatch(&mut self, message: Bytes) -> Result<(), WebSocketError> {
        debug!(length = message.len(), "message complete");
        self.handler
            .message_received(message, &mut self.outbox)
            .map_err(|e| WebSocketError::Dispatch(e.to_string()))?;
        self.encode_outbox()
    }

    fn encode_outbox(&mut self) -> Result<(), WebSocketError> {
        for message in self.outbox.drain() {
            self.state
                .codec
                .encode(message.as_bytes(), &mut self.outgoing)?;
        }
        Ok(())
    }
}
