//! Message codecs for use with tokio_util::codec.
//!
//! Each negotiated variant has its own codec; `VariantCodec` picks one at
//! handshake time so the session above it never branches on the variant.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::frame::{FrameHeader, Opcode, apply_mask, encode_text_frame};
use super::legacy::LegacyCodec;
use crate::error::WebSocketError;

/// The handshake dialect a connection settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// `Sec-WebSocket-Version` 7, 8 or 13: SHA-1 accept key, binary frames
    Modern,
    /// Two obfuscated keys and a nonce: MD5 token, sentinel-delimited frames
    Legacy,
}

/// Codec for the modern framing.
///
/// Handles:
/// - Progressive header decoding with carry-over of partial frames
/// - Unmasking of client payloads
/// - Reassembly of fragmented messages
/// - Encoding of outgoing text messages
pub struct ModernCodec {
    /// Payload bytes of the fragments received so far for the current message
    accumulator: BytesMut,
    /// Opcode of the message being reassembled, if any
    message_opcode: Option<Opcode>,
    max_message_size: usize,
    require_masked: bool,
}

impl ModernCodec {
    /// Create a server-side codec; client frames must be masked.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            accumulator: BytesMut::new(),
            message_opcode: None,
            max_message_size,
            require_masked: true,
        }
    }

    /// Accept unmasked frames, as a client reading server frames would.
    pub fn allow_unmasked(mut self) -> Self {
        self.require_masked = false;
        self
    }

    /// Bytes of an unfinished fragmented message.
    pub fn pending_message_len(&self) -> usize {
        self.accumulator.len()
    }
}

impl Decoder for ModernCodec {
    type Item = Bytes;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Fragments and control frames are consumed without producing a
        // message, so keep going while whole frames are buffered.
        loop {
            let header = match FrameHeader::decode(src) {
                Ok(header) => header,
                Err(WebSocketError::IncompleteFrame) => {
                    debug!(buffered = src.len(), "partial frame header");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            debug!(
                fin = header.fin,
                opcode = header.opcode,
                masked = header.masked,
                payload_length = header.payload_length,
                header_length = header.header_length,
                "decoded frame header"
            );

            let opcode = Opcode::from_u8(header.opcode)?;
            if self.require_masked && !header.masked {
                return Err(WebSocketError::ProtocolViolation(
                    "unmasked client frame".to_string(),
                ));
            }
            if header.payload_length > self.max_message_size as u64 {
                return Err(WebSocketError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }

            let frame_length = header.frame_length()?;
            if src.len() < frame_length {
                debug!(
                    buffered = src.len(),
                    needed = frame_length,
                    "partial frame payload"
                );
                src.reserve(frame_length - src.len());
                return Ok(None);
            }

            let mut payload = src.split_to(frame_length);
            payload.advance(header.header_length);
            if let Some(key) = header.mask_key {
                apply_mask(&mut payload, key);
            }

            match opcode {
                Opcode::Close => return Err(WebSocketError::ClosedByPeer),
                Opcode::Ping | Opcode::Pong => {
                    debug!(?opcode, "skipping control frame");
                    continue;
                }
                Opcode::Continuation => {
                    if self.message_opcode.is_none() {
                        return Err(WebSocketError::ProtocolViolation(
                            "continuation frame outside a fragmented message".to_string(),
                        ));
                    }
                }
                Opcode::Text | Opcode::Binary => {
                    if let Some(open) = self.message_opcode {
                        return Err(WebSocketError::ProtocolViolation(format!(
                            "{:?} frame inside an unfinished {:?} message",
                            opcode, open
                        )));
                    }
                    self.message_opcode = Some(opcode);
                }
            }

            if self.accumulator.len() + payload.len() > self.max_message_size {
                return Err(WebSocketError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }

            if !header.fin {
                self.accumulator.unsplit(payload);
                continue;
            }
            self.message_opcode = None;
            if self.accumulator.is_empty() {
                return Ok(Some(payload.freeze()));
            }
            self.accumulator.unsplit(payload);
            return Ok(Some(self.accumulator.split().freeze()));
        }
    }
}

impl Encoder<&[u8]> for ModernCodec {
    type Error = WebSocketError;

    fn encode(&mut self, message: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_text_frame(message, dst);
        Ok(())
    }
}

/// A codec for either variant, fixed for the lifetime of a connection.
pub enum VariantCodec {
    /// Modern framing
    Modern(ModernCodec),
    /// Legacy sentinel framing
    Legacy(LegacyCodec),
}

impl VariantCodec {
    /// Create the server-side codec for `variant`.
    pub fn new(variant: ProtocolVariant, max_message_size: usize) -> Self {
        match variant {
            ProtocolVariant::Modern => VariantCodec::Modern(ModernCodec::new(max_message_size)),
            ProtocolVariant::Legacy => VariantCodec::Legacy(LegacyCodec::new(max_message_size)),
        }
    }

    /// The variant this codec frames.
    pub fn variant(&self) -> ProtocolVariant {
        match self {
            VariantCodec::Modern(_) => ProtocolVariant::Modern,
            VariantCodec::Legacy(_) => ProtocolVariant::Legacy,
        }
    }
}

impl Decoder for VariantCodec {
    type Item = Bytes;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self {
            VariantCodec::Modern(codec) => codec.decode(src),
            VariantCodec::Legacy(codec) => codec.decode(src),
        }
    }
}

impl Encoder<&[u8]> for VariantCodec {
    type Error = WebSocketError;

    fn encode(&mut self, message: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            VariantCodec::Modern(codec) => codec.encode(message, dst),
            VariantCodec::Legacy(codec) => codec.encode(message, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::frame::test_frames::{client_frame, masked_text};

    const MAX: usize = 1 << 20;

    #[test]
    fn test_decode_hello_scenario() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&[0x81, 0x85, 0x00, 0x00, 0x00, 0x00][..]);
        buffer.extend_from_slice(b"hello");

        let message = codec.decode(&mut buffer).unwrap();
        assert_eq!(message.as_deref(), Some(&b"hello"[..]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_masked_payload() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&masked_text(b"Hello", true)[..]);

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"Hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_header_keeps_bytes() {
        let mut codec = ModernCodec::new(MAX);
        let frame = masked_text(&[b'x'; 300], true);

        // Stop inside the 16-bit extended length
        let mut buffer = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), 3);

        buffer.extend_from_slice(&frame[3..]);
        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(message.len(), 300);
    }

    #[test]
    fn test_partial_payload_keeps_bytes() {
        let mut codec = ModernCodec::new(MAX);
        let frame = masked_text(b"Hello", true);

        let mut buffer = BytesMut::from(&frame[..8]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], &frame[..8]);

        buffer.extend_from_slice(&frame[8..]);
        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"Hello");
    }

    #[test]
    fn test_decode_fragmented_message() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&masked_text(b"Hel", false)[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(codec.pending_message_len(), 3);

        let key = Some([1, 2, 3, 4]);
        buffer.extend_from_slice(&client_frame(false, Opcode::Continuation, b"lo ", key));
        buffer.extend_from_slice(&client_frame(true, Opcode::Continuation, b"world", key));

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"Hello world");
        assert_eq!(codec.pending_message_len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_new_message_inside_fragmented_one_is_violation() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&masked_text(b"first-", false)[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&masked_text(b"second", true));
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_orphan_continuation_is_violation() {
        let mut codec = ModernCodec::new(MAX);
        let frame = client_frame(true, Opcode::Continuation, b"orphan", Some([1, 2, 3, 4]));
        let mut buffer = BytesMut::from(&frame[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_empty_first_fragment_opens_message() {
        let mut codec = ModernCodec::new(MAX);
        let key = Some([4, 3, 2, 1]);
        let mut buffer = BytesMut::from(&masked_text(b"", false)[..]);
        buffer.extend_from_slice(&client_frame(true, Opcode::Continuation, b"tail", key));
        buffer.extend_from_slice(&masked_text(b"next", true));

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"tail");
        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"next");
    }

    #[test]
    fn test_pipelined_frames() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::new();
        for word in ["one", "two", "three"] {
            buffer.extend_from_slice(&masked_text(word.as_bytes(), true));
        }

        let mut messages = Vec::new();
        while let Some(message) = codec.decode(&mut buffer).unwrap() {
            messages.push(message);
        }
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_unmasked_frame_is_violation() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&client_frame(true, Opcode::Text, b"hi", None)[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_encode_then_decode_unmasked() {
        for len in [0usize, 1, 125, 126, 65535, 65536, 70000] {
            let message = vec![b'm'; len];
            let mut encoder = ModernCodec::new(MAX);
            let mut buffer = BytesMut::new();
            encoder.encode(&message[..], &mut buffer).unwrap();

            let mut decoder = ModernCodec::new(MAX).allow_unmasked();
            let decoded = decoder.decode(&mut buffer).unwrap().unwrap();
            assert_eq!(&decoded[..], &message[..]);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_control_frames() {
        let mut codec = ModernCodec::new(MAX);
        let key = Some([9, 8, 7, 6]);
        let mut buffer = BytesMut::from(&client_frame(true, Opcode::Ping, b"p", key)[..]);
        buffer.extend_from_slice(&masked_text(b"after ping", true));

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"after ping");

        buffer.extend_from_slice(&client_frame(true, Opcode::Close, &[0x03, 0xE8], key));
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ClosedByPeer)
        ));
    }

    #[test]
    fn test_unknown_opcode_is_violation() {
        let mut codec = ModernCodec::new(MAX);
        let mut buffer = BytesMut::from(&[0x83, 0x80, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_message_size_limits() {
        let mut codec = ModernCodec::new(4);
        let mut buffer = BytesMut::from(&masked_text(b"too long", true)[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::MessageTooLarge { limit: 4 })
        ));

        // Each fragment fits, the reassembled message does not
        let mut codec = ModernCodec::new(4);
        let mut buffer = BytesMut::from(&masked_text(b"abc", false)[..]);
        buffer.extend_from_slice(&client_frame(true, Opcode::Continuation, b"de", Some([0; 4])));
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::MessageTooLarge { limit: 4 })
        ));
    }

    #[test]
    fn test_variant_codec_dispatch() {
        let mut modern = VariantCodec::new(ProtocolVariant::Modern, MAX);
        assert_eq!(modern.variant(), ProtocolVariant::Modern);
        let mut buffer = BytesMut::new();
        modern.encode(&b"hi"[..], &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0x81, 0x02, b'h', b'i']);

        let mut legacy = VariantCodec::new(ProtocolVariant::Legacy, MAX);
        assert_eq!(legacy.variant(), ProtocolVariant::Legacy);
        let mut buffer = BytesMut::new();
        legacy.encode(&b"hi"[..], &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0x00, b'h', b'i', 0xFF]);

        let message = legacy.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"hi");
    }
}
