//! Frame header decoding, payload masking and text frame encoding.

use bytes::{BufMut, BytesMut};

use crate::error::WebSocketError;

/// Largest payload that fits the 7-bit length field
const MAX_SHORT_PAYLOAD: usize = 125;
/// Base length value announcing a 16-bit extended length
const LENGTH_16: u8 = 126;
/// Base length value announcing a 64-bit extended length
const LENGTH_64: u8 = 127;

/// Frame opcodes as they appear in the low nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (0x0)
    Continuation = 0x0,
    /// Text data frame (0x1)
    Text = 0x1,
    /// Binary data frame (0x2)
    Binary = 0x2,
    /// Connection close frame (0x8)
    Close = 0x8,
    /// Ping frame (0x9)
    Ping = 0x9,
    /// Pong frame (0xA)
    Pong = 0xA,
}

impl Opcode {
    /// Parse opcode from its 4-bit value.
    pub fn from_u8(value: u8) -> Result<Self, WebSocketError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(WebSocketError::ProtocolViolation(format!(
                "unknown opcode {:#x}",
                value
            ))),
        }
    }

    /// Check if this is a control frame opcode.
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// The decoded header of one frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
/// |     Extended payload length continued, if payload len == 127  |
/// + - - - - - - - - - - - - - - - +-------------------------------+
/// |                               |Masking-key, if MASK set to 1  |
/// +-------------------------------+-------------------------------+
/// | Masking-key (continued)       |          Payload Data         |
/// +-------------------------------- - - - - - - - - - - - - - - - +
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message
    pub fin: bool,
    /// RSV1..RSV3 as a 3-bit value
    pub reserved: u8,
    /// Raw 4-bit opcode
    pub opcode: u8,
    /// MASK bit
    pub masked: bool,
    /// Payload length after extended-length decoding
    pub payload_length: u64,
    /// Bytes consumed by the header, mask key included
    pub header_length: usize,
    /// Masking key, present when `masked`
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Decode the header at the start of `data`.
    ///
    /// Decoding is progressive: the extended length is only read once byte 1
    /// says it exists, and the mask key only once the extended length has been
    /// read. Every read is preceded by a bounds check, so a short buffer yields
    /// `Err(WebSocketError::IncompleteFrame)` instead of a partial header.
    pub fn decode(data: &[u8]) -> Result<Self, WebSocketError> {
        if data.len() < 2 {
            return Err(WebSocketError::IncompleteFrame);
        }

        let byte1 = data[0];
        let fin = (byte1 & 0b1000_0000) != 0;
        let reserved = (byte1 & 0b0111_0000) >> 4;
        let opcode = byte1 & 0b0000_1111;

        let byte2 = data[1];
        let masked = (byte2 & 0b1000_0000) != 0;
        let base_length = byte2 & 0b0111_1111;

        let mut offset = 2;
        let payload_length = match base_length {
            LENGTH_16 => {
                let bytes = read_array::<2>(data, offset)?;
                offset += 2;
                u16::from_be_bytes(bytes) as u64
            }
            LENGTH_64 => {
                let bytes = read_array::<8>(data, offset)?;
                offset += 8;
                u64::from_be_bytes(bytes)
            }
            short => short as u64,
        };

        let mask_key = if masked {
            let key = read_array::<4>(data, offset)?;
            offset += 4;
            Some(key)
        } else {
            None
        };

        Ok(FrameHeader {
            fin,
            reserved,
            opcode,
            masked,
            payload_length,
            header_length: offset,
            mask_key,
        })
    }

    /// Header plus payload length, or `FrameTooLarge` if it cannot be addressed.
    pub fn frame_length(&self) -> Result<usize, WebSocketError> {
        usize::try_from(self.payload_length)
            .ok()
            .and_then(|len| len.checked_add(self.header_length))
            .ok_or(WebSocketError::FrameTooLarge)
    }
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], WebSocketError> {
    data.get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(WebSocketError::IncompleteFrame)
}

/// XOR `payload` in place with the repeating 4-byte `mask`.
///
/// Masking is an involution: applying the same key twice restores the input.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Append one unfragmented, unmasked text frame carrying `payload` to `dst`.
pub fn encode_text_frame(payload: &[u8], dst: &mut BytesMut) {
    let len = payload.len();
    let extended = if len <= MAX_SHORT_PAYLOAD {
        0
    } else if len <= u16::MAX as usize {
        2
    } else {
        8
    };
    dst.reserve(2 + extended + len);

    dst.put_u8(0b1000_0000 | Opcode::Text as u8);
    match extended {
        0 => dst.put_u8(len as u8),
        2 => {
            dst.put_u8(LENGTH_16);
            dst.put_u16(len as u16);
        }
        _ => {
            dst.put_u8(LENGTH_64);
            dst.put_u64(len as u64);
        }
    }
    dst.extend_from_slice(payload);
}
