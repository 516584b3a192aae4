//! Handshake and session settings.

/// Default bound on a single frame payload and on a reassembled message (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default size of each transport read performed by the connection driver
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Settings consulted while negotiating the upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Value of the `Server` header in the protocol-switch response
    pub server: String,
    /// Accepted `Sec-WebSocket-Version` tokens, modern variant only
    pub supported_versions: Vec<String>,
    /// Reject requests lacking `Upgrade: websocket` and `Connection: Upgrade`
    pub require_upgrade_headers: bool,
    /// Advertise a `wss://` location instead of `ws://`
    pub secure: bool,
}

impl HandshakeConfig {
    /// Create a config with the default server name and version set
    pub fn new() -> Self {
        Self {
            server: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            supported_versions: vec!["7".to_string(), "8".to_string(), "13".to_string()],
            require_upgrade_headers: true,
            secure: false,
        }
    }

    /// Replace the `Server` identity
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Replace the accepted version tokens
    pub fn with_supported_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Toggle validation of the upgrade headers
    pub fn with_require_upgrade_headers(mut self, require: bool) -> Self {
        self.require_upgrade_headers = require;
        self
    }

    /// Toggle the `wss://` location scheme
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Whether `version` is one of the accepted tokens.
    pub fn supports(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }

    /// The lowest accepted version, advertised when rejecting a request.
    ///
    /// Numeric tokens compare numerically; anything else sorts after them.
    pub fn minimum_version(&self) -> Option<&str> {
        self.supported_versions
            .iter()
            .min_by_key(|v| v.parse::<u32>().unwrap_or(u32::MAX))
            .map(String::as_str)
    }

    pub(crate) fn location_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for an established connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on a frame payload and on a reassembled message
    pub max_message_size: usize,
    /// Bytes requested from the transport per read
    pub read_buffer_size: usize,
}

impl SessionConfig {
    /// Create a config with default limits
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Replace the message size limit
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Replace the transport read size
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
