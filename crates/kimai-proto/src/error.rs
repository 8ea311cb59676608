use thiserror::Error;

/// Every way a reconciliation step against the Kimai server can fail.
///
/// All variants are handled the same way at the plugin boundary: the key
/// shows an alert and keeps its current title and image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Endpoint URL or API key is blank; no request was made.
    #[error("endpoint URL and API key must both be configured")]
    MissingConfiguration,

    /// Network error, timeout, or a non-200 HTTP status.
    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    /// HTTP 200, but the body matched neither a known success nor a known error.
    #[error("unexpected response shape: {reason}")]
    UnexpectedResponseShape { reason: String },
}

impl TrackerError {
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::TransportFailure {
            reason: reason.to_string(),
        }
    }

    pub fn unexpected(reason: impl std::fmt::Display) -> Self {
        Self::UnexpectedResponseShape {
            reason: reason.to_string(),
        }
    }
}
