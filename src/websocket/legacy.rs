//! The pre-standard dialect: key reduction, MD5 challenge token and
//! sentinel-delimited message framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{HandshakeError, WebSocketError};

/// Opens every legacy message
const FRAME_START: u8 = 0x00;
/// Closes every legacy message; never valid inside UTF-8 text
const FRAME_END: u8 = 0xFF;

/// Reduce an obfuscated key to the number it hides.
///
/// The decimal digits of `key`, read in order as one number, are divided by
/// the count of space characters in `key`.
pub fn reduce_key(key: &str) -> Result<u32, HandshakeError> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;

    if digits.is_empty() {
        return Err(HandshakeError::MalformedKey("key has no digits".to_string()));
    }
    if spaces == 0 {
        return Err(HandshakeError::MalformedKey("key has no spaces".to_string()));
    }

    let number: u64 = digits
        .parse()
        .map_err(|_| HandshakeError::MalformedKey("key number overflows".to_string()))?;
    u32::try_from(number / spaces)
        .map_err(|_| HandshakeError::MalformedKey("reduced key exceeds 32 bits".to_string()))
}

/// Compute the 16-byte challenge response for the two keys and the nonce.
pub fn legacy_token(key1: &str, key2: &str, nonce: [u8; 8]) -> Result<[u8; 16], HandshakeError> {
    let mut challenge = [0u8; 16];
    challenge[..4].copy_from_slice(&reduce_key(key1)?.to_be_bytes());
    challenge[4..8].copy_from_slice(&reduce_key(key2)?.to_be_bytes());
    challenge[8..].copy_from_slice(&nonce);

    let mut token = [0u8; 16];
    token.copy_from_slice(&Md5::digest(challenge));
    Ok(token)
}

/// Codec for `0x00 <text> 0xFF` framed messages.
pub struct LegacyCodec {
    /// Bytes after the start sentinel already searched for the end sentinel
    scanned: usize,
    max_message_size: usize,
}

impl LegacyCodec {
    /// Create a codec bounding each message to `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            scanned: 0,
            max_message_size,
        }
    }
}

impl Decoder for LegacyCodec {
    type Item = Bytes;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };

        match first {
            FRAME_START => {}
            FRAME_END => {
                // 0xFF 0x00 is the closing handshake
                return match src.get(1) {
                    None => Ok(None),
                    Some(&FRAME_START) => {
                        src.advance(2);
                        Err(WebSocketError::ClosedByPeer)
                    }
                    Some(other) => Err(WebSocketError::ProtocolViolation(format!(
                        "unexpected byte {:#x} after closing sentinel",
                        other
                    ))),
                };
            }
            other => {
                return Err(WebSocketError::ProtocolViolation(format!(
                    "legacy frame starts with {:#x}",
                    other
                )));
            }
        }

        let search_from = 1 + self.scanned;
        match src[search_from..].iter().position(|b| *b == FRAME_END) {
            Some(found) => {
                let end = search_from + found;
                if end - 1 > self.max_message_size {
                    return Err(WebSocketError::MessageTooLarge {
                        limit: self.max_message_size,
                    });
                }
                self.scanned = 0;
                let mut frame = src.split_to(end + 1);
                frame.advance(1);
                frame.truncate(end - 1);
                Ok(Some(frame.freeze()))
            }
            None => {
                self.scanned = src.len() - 1;
                if self.scanned > self.max_message_size {
                    return Err(WebSocketError::MessageTooLarge {
                        limit: self.max_message_size,
                    });
                }
                debug!(buffered = src.len(), "partial legacy frame");
                Ok(None)
            }
        }
    }
}

impl Encoder<&[u8]> for LegacyCodec {
    type Error = WebSocketError;

    fn encode(&mut self, message: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if message.contains(&FRAME_END) {
            return Err(WebSocketError::ProtocolViolation(
                "legacy messages cannot carry 0xFF".to_string(),
            ));
        }
        dst.reserve(message.len() + 2);
        dst.put_u8(FRAME_START);
        dst.extend_from_slice(message);
        dst.put_u8(FRAME_END);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_key_scenario() {
        assert_eq!(reduce_key("1  2").unwrap(), 6);
        assert_eq!(reduce_key("3   6").unwrap(), 12);
    }

    #[test]
    fn test_reduce_key_draft_example() {
        // Key pair from the draft-76 handshake example
        assert_eq!(reduce_key("4 @1  46546xW%0l 1 5").unwrap(), 829_309_203);
        assert_eq!(reduce_key("12998 5 Y3 1  .P00").unwrap(), 259_970_620);
    }

    #[test]
    fn test_reduce_key_failures() {
        assert!(matches!(
            reduce_key("12345"),
            Err(HandshakeError::MalformedKey(_))
        ));
        assert!(matches!(
            reduce_key("a b c"),
            Err(HandshakeError::MalformedKey(_))
        ));
        // Quotient does not fit 32 bits
        assert!(matches!(
            reduce_key("99999999999 "),
            Err(HandshakeError::MalformedKey(_))
        ));
        // Digits overflow even 64 bits
        assert!(matches!(
            reduce_key("123456789012345678901234567890 "),
            Err(HandshakeError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_legacy_token_matches_independent_digest() {
        let nonce = *b"Tm[K T2u";
        let token = legacy_token("1  2", "3   6", nonce).unwrap();

        let mut packed = Vec::new();
        packed.extend_from_slice(&6u32.to_be_bytes());
        packed.extend_from_slice(&12u32.to_be_bytes());
        packed.extend_from_slice(&nonce);
        let mut hasher = Md5::new();
        hasher.update(&packed);
        let expected = hasher.finalize();

        assert_eq!(&token[..], &expected[..]);
    }

    #[test]
    fn test_legacy_token_draft_example() {
        let token = legacy_token("4 @1  46546xW%0l 1 5", "12998 5 Y3 1  .P00", *b"^n:ds[4U").unwrap();
        assert_eq!(&token, b"8jKS'y:G*Co,Wxa-");
    }

    #[test]
    fn test_legacy_token_malformed() {
        assert!(matches!(
            legacy_token("1  2", "36", [0; 8]),
            Err(HandshakeError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_decode_messages() {
        let mut codec = LegacyCodec::new(1024);
        let mut buffer = BytesMut::from(&b"\x00hello\xff\x00\xff\x00wor"[..]);

        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), "hello");
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), "");
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], b"\x00wor");

        buffer.extend_from_slice(b"ld\xff");
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), "world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_closing_handshake() {
        let mut codec = LegacyCodec::new(1024);
        let mut buffer = BytesMut::from(&b"\xff"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.put_u8(0x00);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ClosedByPeer)
        ));
    }

    #[test]
    fn test_decode_bad_start() {
        let mut codec = LegacyCodec::new(1024);
        let mut buffer = BytesMut::from(&b"hello\xff"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_decode_oversized() {
        let mut codec = LegacyCodec::new(4);
        let mut buffer = BytesMut::from(&b"\x00abcdef"[..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::MessageTooLarge { limit: 4 })
        ));
    }

    #[test]
    fn test_decode_oversized_complete_message() {
        let mut codec = LegacyCodec::new(4);
        let mut buffer = BytesMut::from(&b"\x00abcd\xff\x00abcdefghij\xff"[..]);

        let message = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&message[..], b"abcd");
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(WebSocketError::MessageTooLarge { limit: 4 })
        ));
    }

    #[test]
    fn test_encode() {
        let mut codec = LegacyCodec::new(1024);
        let mut buffer = BytesMut::new();
        codec.encode(&b"hi"[..], &mut buffer).unwrap();
        assert_eq!(&buffer[..], b"\x00hi\xff");

        assert!(codec.encode(&[0x61, 0xFF][..], &mut buffer).is_err());
    }
}
