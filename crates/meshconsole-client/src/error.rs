//! Error types for the Headscale client.

/// All errors that can occur when talking to the Headscale management API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The API key was rejected (401/403).
    #[error("headscale rejected the API key: {message}")]
    Unauthorized {
        /// Error message from the API.
        message: String,
    },

    /// API returned a non-success status other than 401/403.
    #[error("headscale API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Request timed out.
    #[error("headscale request timed out")]
    Timeout,

    /// The server could not be reached (DNS, refused connection, TLS).
    #[error("headscale is unreachable: {reason}")]
    Unreachable {
        /// Underlying connection error.
        reason: String,
    },

    /// Other HTTP client error.
    #[error("headscale network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("headscale json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether this error means the key is not (or no longer) valid.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Whether the upstream server could not be reached at all.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unreachable { .. } | Self::Network(_))
    }

    /// The HTTP status to report to a console caller.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::Api { status, .. } => *status,
            Self::Timeout => 504,
            Self::Unreachable { .. } | Self::Network(_) | Self::Json(_) => 502,
        }
    }
}
