//! Server-side WebSocket protocol engine.
//!
//! Negotiates the upgrade handshake for modern and draft-76 clients, decodes
//! and encodes frames, reassembles fragmented messages, and hands each
//! completed message to a [`MessageHandler`].
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::Request;
//! use tokio::net::TcpStream;
//! use websocket_handler::websocket::Connection;
//! use websocket_handler::{Outbox, WebSocketError};
//!
//! async fn upgrade(stream: TcpStream, request: Request<()>) -> Result<(), WebSocketError> {
//!     let echo = |message: Bytes, outbox: &mut Outbox| -> Result<(), WebSocketError> {
//!         outbox.send(String::from_utf8_lossy(&message));
//!         Ok(())
//!     };
//!     Connection::new(stream).serve(&request, echo).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![warn(missing_docs)]

pub use http;

pub mod config;
pub mod error;
pub mod handler;
pub mod websocket;

pub use config::{HandshakeConfig, SessionConfig};
pub use error::{HandshakeError, WebSocketError};
pub use handler::{MessageHandler, Outbox};
