//! Error types for the handshake and the framing session.

use http::StatusCode;
use thiserror::Error;

/// Reasons an upgrade request cannot become a WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The `Sec-WebSocket-Version` header names a version this server does not speak
    #[error("unsupported WebSocket protocol version: {0}")]
    UnsupportedVersion(String),
    /// `Upgrade: websocket` / `Connection: Upgrade` are absent
    #[error("expected WebSocket upgrade headers")]
    MissingUpgradeHeaders,
    /// A header the selected variant depends on is absent
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    /// A header value is not visible ASCII
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    /// A legacy key has no spaces, no digits, or reduces past 32 bits
    #[error("malformed legacy handshake key: {0}")]
    MalformedKey(String),
}

impl HandshakeError {
    /// Status line used when this failure is answered with a rejection response.
    ///
    /// Returns `None` for failures that close the connection without a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HandshakeError::UnsupportedVersion(_) => Some(StatusCode::UPGRADE_REQUIRED),
            HandshakeError::MissingUpgradeHeaders => Some(StatusCode::FORBIDDEN),
            HandshakeError::MissingHeader(_) | HandshakeError::InvalidHeader(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            HandshakeError::MalformedKey(_) => None,
        }
    }

    /// Plain-text body of the rejection response.
    pub fn rejection_message(&self) -> String {
        match self {
            HandshakeError::UnsupportedVersion(_) => {
                "Unsupported WebSocket Protocol Version".to_string()
            }
            HandshakeError::MissingUpgradeHeaders => "Expected WebSocket Headers".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors raised while framing or driving an established connection.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// Not enough bytes buffered to decode a frame; consumed by the session
    #[error("incomplete WebSocket frame")]
    IncompleteFrame,
    /// The peer broke the framing rules of the negotiated variant
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A frame declares a payload length that cannot be addressed
    #[error("frame too large")]
    FrameTooLarge,
    /// A frame or reassembled message exceeds the configured limit
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge {
        /// The configured `max_message_size`
        limit: usize,
    },
    /// The peer started the closing handshake
    #[error("connection closed by peer")]
    ClosedByPeer,
    /// The connection is gone; nothing more can be sent on it
    #[error("connection closed")]
    ConnectionClosed,
    /// The application handler failed on a completed message
    #[error("message handler failed: {0}")]
    Dispatch(String),
    /// The handshake did not produce a connection
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// Reading from or writing to the transport failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status_mapping() {
        assert_eq!(
            HandshakeError::UnsupportedVersion("6".into()).status(),
            Some(StatusCode::UPGRADE_REQUIRED)
        );
        assert_eq!(
            HandshakeError::MissingUpgradeHeaders.status(),
            Some(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            HandshakeError::MissingHeader("Sec-WebSocket-Key").status(),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(HandshakeError::MalformedKey("no spaces".into()).status(), None);
    }

    #[test]
    fn test_rejection_message() {
        assert_eq!(
            HandshakeError::UnsupportedVersion("6".into()).rejection_message(),
            "Unsupported WebSocket Protocol Version"
        );
        assert_eq!(
            HandshakeError::MissingHeader("Sec-WebSocket-Key").rejection_message(),
            "missing Sec-WebSocket-Key header"
        );
    }

    #[test]
    fn test_handshake_error_converts() {
        let err: WebSocketError = HandshakeError::MissingUpgradeHeaders.into();
        assert!(matches!(
            err,
            WebSocketError::Handshake(HandshakeError::MissingUpgradeHeaders)
        ));
    }
}
