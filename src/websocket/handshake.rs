//! Upgrade negotiation for the modern and legacy dialects.
//!
//! # Modern exchange
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Web Socket Protocol Handshake
//! Upgrade: WebSocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! # Legacy exchange
//!
//! The request carries `Sec-WebSocket-Key1`/`Sec-WebSocket-Key2` and no
//! version. Eight nonce bytes follow the request head on the wire, and the
//! response ends with a 16-byte MD5 token instead of an accept header.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderName};
use http::{HeaderMap, Request, StatusCode};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use super::codec::ProtocolVariant;
use super::legacy::legacy_token;
use crate::config::HandshakeConfig;
use crate::error::HandshakeError;

/// GUID appended to the client key before hashing
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reason phrase of every protocol-switch response
const SWITCH_REASON: &str = "Web Socket Protocol Handshake";

const SEC_WEBSOCKET_ORIGIN: HeaderName = HeaderName::from_static("sec-websocket-origin");
const SEC_WEBSOCKET_KEY1: HeaderName = HeaderName::from_static("sec-websocket-key1");
const SEC_WEBSOCKET_KEY2: HeaderName = HeaderName::from_static("sec-websocket-key2");

/// Compute the `Sec-WebSocket-Accept` value for a client key.
///
/// ```
/// use websocket_handler::websocket::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Outcome of inspecting one upgrade request.
#[derive(Debug)]
pub enum Negotiation {
    /// Write `response`, then frame with `variant`
    Accepted {
        /// The negotiated dialect
        variant: ProtocolVariant,
        /// The protocol-switch response
        response: Bytes,
    },
    /// Legacy dialect; the response needs the nonce that follows the request
    AwaitingNonce(LegacyHandshake),
    /// Write `response`, then close the connection
    Rejected {
        /// Why the request was refused
        reason: HandshakeError,
        /// The rejection response
        response: Bytes,
    },
}

/// A legacy handshake waiting for its 8-byte nonce.
#[derive(Debug, Clone)]
pub struct LegacyHandshake {
    key1: String,
    key2: String,
    origin: Option<String>,
    location: String,
    server: String,
}

impl LegacyHandshake {
    /// Build the protocol-switch response whose body is the challenge token.
    ///
    /// Fails with `MalformedKey` when either key cannot be reduced; the
    /// connection must then be closed without a response.
    pub fn complete(&self, nonce: [u8; 8]) -> Result<Bytes, HandshakeError> {
        let token = legacy_token(&self.key1, &self.key2, nonce)?;

        let mut head = ResponseHead::new(StatusCode::SWITCHING_PROTOCOLS, SWITCH_REASON)
            .header("Upgrade", "WebSocket")
            .header("Connection", "Upgrade")
            .header("Server", &self.server);
        if let Some(origin) = &self.origin {
            head = head.header("Sec-WebSocket-Origin", origin);
        }
        Ok(head
            .header("Sec-WebSocket-Location", &self.location)
            .finish(&token))
    }
}

/// Selects a dialect for upgrade requests and builds the matching response.
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    config: HandshakeConfig,
}

impl Negotiator {
    /// Create a negotiator with the given settings
    pub fn new(config: HandshakeConfig) -> Self {
        Self { config }
    }

    /// The settings this negotiator applies
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Inspect the upgrade request head and decide how to answer it.
    pub fn negotiate<T>(&self, request: &Request<T>) -> Negotiation {
        match self.select(request) {
            Ok(negotiation) => negotiation,
            Err(reason) => {
                warn!(%reason, path = request.uri().path(), "rejecting upgrade");
                let response = self.rejection(&reason);
                Negotiation::Rejected { reason, response }
            }
        }
    }

    fn select<T>(&self, request: &Request<T>) -> Result<Negotiation, HandshakeError> {
        let headers = request.headers();
        let version = headers
            .get(header::SEC_WEBSOCKET_VERSION)
            .map(|version| String::from_utf8_lossy(version.as_bytes()).into_owned());
        if let Some(version) = &version {
            if !self.config.supports(version) {
                return Err(HandshakeError::UnsupportedVersion(version.clone()));
            }
        }

        if self.config.require_upgrade_headers && !has_upgrade_headers(headers) {
            return Err(HandshakeError::MissingUpgradeHeaders);
        }

        let location = self.location(request)?;

        if let Some(version) = version {
            info!(%version, "using modern WebSocket protocol");

            // Version 8 clients send Sec-WebSocket-Origin, later ones Origin
            let origin = match header_str(headers, &header::ORIGIN, "Origin")? {
                Some(origin) => Some(origin),
                None => header_str(headers, &SEC_WEBSOCKET_ORIGIN, "Sec-WebSocket-Origin")?,
            };
            let key = header_str(headers, &header::SEC_WEBSOCKET_KEY, "Sec-WebSocket-Key")?
                .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;

            let mut head = ResponseHead::new(StatusCode::SWITCHING_PROTOCOLS, SWITCH_REASON)
                .header("Upgrade", "WebSocket")
                .header("Connection", "Upgrade")
                .header("Sec-WebSocket-Accept", &compute_accept_key(key))
                .header("Server", &self.config.server);
            if let Some(origin) = origin {
                head = head.header("WebSocket-Origin", origin);
            }
            let response = head.header("WebSocket-Location", &location).finish(&[]);

            return Ok(Negotiation::Accepted {
                variant: ProtocolVariant::Modern,
                response,
            });
        }

        info!("using legacy WebSocket protocol");
        let key1 = header_str(headers, &SEC_WEBSOCKET_KEY1, "Sec-WebSocket-Key1")?
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key1"))?;
        let key2 = header_str(headers, &SEC_WEBSOCKET_KEY2, "Sec-WebSocket-Key2")?
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key2"))?;
        let origin = header_str(headers, &header::ORIGIN, "Origin")?;

        Ok(Negotiation::AwaitingNonce(LegacyHandshake {
            key1: key1.to_string(),
            key2: key2.to_string(),
            origin: origin.map(str::to_string),
            location,
            server: self.config.server.clone(),
        }))
    }

    fn location<T>(&self, request: &Request<T>) -> Result<String, HandshakeError> {
        let host = match header_str(request.headers(), &header::HOST, "Host")? {
            Some(host) => host,
            None => request
                .uri()
                .authority()
                .map(|authority| authority.as_str())
                .ok_or(HandshakeError::MissingHeader("Host"))?,
        };
        Ok(format!(
            "{}://{}{}",
            self.config.location_scheme(),
            host,
            request.uri().path()
        ))
    }

    fn rejection(&self, reason: &HandshakeError) -> Bytes {
        let status = reason.status().unwrap_or(StatusCode::BAD_REQUEST);
        let body = reason.rejection_message();

        let mut head = ResponseHead::new(status, status.canonical_reason().unwrap_or(""));
        if let HandshakeError::UnsupportedVersion(_) = reason {
            if let Some(minimum) = self.config.minimum_version() {
                head = head.header("Sec-WebSocket-Version", minimum);
            }
        }
        head.header("Content-Length", &body.len().to_string())
            .finish(body.as_bytes())
    }
}

fn has_upgrade_headers(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"));
    let connection = headers.get_all(header::CONNECTION).iter().any(|value| {
        value
            .as_bytes()
            .split(|b| *b == b',')
            .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"upgrade"))
    });
    upgrade && connection
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &HeaderName,
    display: &'static str,
) -> Result<Option<&'a str>, HandshakeError> {
    headers
        .get(name)
        .map(|value| value.to_str().map_err(|_| HandshakeError::InvalidHeader(display)))
        .transpose()
}

/// Serializes an HTTP/1.1 response head with the header casing old clients expect.
struct ResponseHead {
    buf: BytesMut,
}

impl ResponseHead {
    fn new(status: StatusCode, reason: &str) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(b"HTTP/1.1 ");
        buf.put_slice(status.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(reason.as_bytes());
        buf.put_slice(b"\r\n");
        Self { buf }
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.buf.put_slice(name.as_bytes());
        self.buf.put_slice(b": ");
        self.buf.put_slice(value.as_bytes());
        self.buf.put_slice(b"\r\n");
        self
    }

    fn finish(mut self, body: &[u8]) -> Bytes {
        self.buf.put_slice(b"\r\n");
        self.buf.put_slice(body);
        self.buf.freeze()
    }
}
