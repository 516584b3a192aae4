//! Handler trait for processing WebSocket messages
//!
//! A `MessageHandler` is the application side of a connection: it is told
//! when the connection is established and receives every completed message.
//! Replies are queued on an `Outbox` and framed by the session with whatever
//! dialect the handshake settled on.
//!
//! # Examples
//!
//! ## Echo handler
//!
//! ```
//! use bytes::Bytes;
//! use websocket_handler::{MessageHandler, Outbox};
//!
//! struct Echo;
//!
//! impl MessageHandler for Echo {
//!     type Error = std::str::Utf8Error;
//!
//!     fn message_received(&mut self, message: Bytes, outbox: &mut Outbox) -> Result<(), Self::Error> {
//!         outbox.send(std::str::from_utf8(&message)?);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Closures
//!
//! Any `FnMut(Bytes, &mut Outbox) -> Result<(), E>` is a handler too:
//!
//! ```
//! use bytes::Bytes;
//! use websocket_handler::{MessageHandler, Outbox};
//!
//! let mut count = 0;
//! let mut handler = |_message: Bytes, _outbox: &mut Outbox| -> Result<(), String> {
//!     count += 1;
//!     Ok(())
//! };
//! let mut outbox = Outbox::new();
//! handler.message_received(Bytes::from("hi"), &mut outbox).unwrap();
//! ```

use std::fmt::Display;

use bytes::Bytes;

/// Text messages a handler wants sent back over its connection.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<String>,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text message
    pub fn send(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.messages.drain(..)
    }
}

/// Trait for the application side of a WebSocket connection
///
/// Calls happen synchronously from the connection's decode step, in message
/// order, one completed message per call. Returning an error closes the
/// connection.
pub trait MessageHandler {
    /// The error type returned by the handler
    type Error: Display;

    /// Called once the handshake has completed
    fn connection_made(&mut self, outbox: &mut Outbox) -> Result<(), Self::Error> {
        let _ = outbox;
        Ok(())
    }

    /// Called with the payload of each completed message
    fn message_received(&mut self, message: Bytes, outbox: &mut Outbox) -> Result<(), Self::Error>;
}

impl<F, E> MessageHandler for F
where
    F: FnMut(Bytes, &mut Outbox) -> Result<(), E>,
    E: Display,
{
    type Error = E;

    fn message_received(&mut self, message: Bytes, outbox: &mut Outbox) -> Result<(), Self::Error> {
        self(message, outbox)
    }
}
