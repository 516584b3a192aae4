//! WebSocket protocol engine.
//!
//! Speaks two dialects over an upgraded byte stream: the framed protocol of
//! RFC 6455 and its drafts (versions 7, 8 and 13), and the older draft-76
//! dialect that delimits text messages with `0x00 ... 0xFF`.
//!
//! The pieces compose bottom-up: [`FrameHeader`] and [`apply_mask`] parse
//! wire frames, the codecs reassemble messages behind `tokio_util`'s
//! `Decoder`/`Encoder`, [`Negotiator`] answers the upgrade request,
//! [`Session`] dispatches completed messages to a handler, and
//! [`Connection`] drives all of it over an async stream.

mod codec;
mod connection;
mod frame;
mod handshake;
mod legacy;
mod session;

pub use codec::{ModernCodec, ProtocolVariant, VariantCodec};
pub use connection::{Connection, MessageSender};
pub use frame::{FrameHeader, Opcode, apply_mask, encode_text_frame};
pub use handshake::{LegacyHandshake, Negotiation, Negotiator, WS_GUID, compute_accept_key};
pub use legacy::{LegacyCodec, legacy_token, reduce_key};
pub use session::{ConnectionState, Session};
