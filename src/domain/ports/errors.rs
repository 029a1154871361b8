use thiserror::Error;

/// Errors reported by the remote job executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote executor unavailable: {0}")]
    Unavailable(String),

    #[error("Remote executor rejected the request: {0}")]
    Rejected(String),

    #[error("Remote job not found: {0}")]
    NotFound(String),
}

/// Errors from extraction and generation providers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth another try
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Provider failure: {0}")]
    Permanent(String),

    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_) | Self::Malformed(_))
    }
}
