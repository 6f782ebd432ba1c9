//! Unified error types for the node gateway.
//!
//! Every variant carries a stable code prefix so the web layer can surface a
//! status field plus a human-readable message without matching on text.

/// Unified error types for fetch, cache and search operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Destination identifier could not be parsed.
    #[error("INVALID_DESTINATION: {0}")]
    InvalidDestination(String),

    /// Invalid input parameters (e.g., a negative search limit).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Route discovery budget exceeded.
    #[error("NO_PATH: {0}")]
    NoPath(String),

    /// Destination identity could not be recalled.
    #[error("NO_IDENTITY: {0}")]
    NoIdentity(String),

    /// Link establishment or response not received in time.
    #[error("TIMEOUT: {0}")]
    Timeout(String),

    /// Remote side explicitly signalled a failed request.
    #[error("REQUEST_FAILED: {0}")]
    RequestFailed(String),

    /// No usable link could be created or found.
    #[error("LINK_FAILED: {0}")]
    LinkFailed(String),

    /// Filesystem operation on the cache tree failed.
    #[error("CACHE_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be read or written.
    #[error("SETTINGS_ERROR: {0}")]
    Settings(#[from] serde_json::Error),

    /// Cache export archive could not be built.
    #[error("ARCHIVE_ERROR: {0}")]
    Archive(String),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::Archive(err.to_string())
    }
}

impl Error {
    /// Stable short code for the error, used as the status field by callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidDestination(_) => "INVALID_DESTINATION",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::NoPath(_) => "NO_PATH",
            Error::NoIdentity(_) => "NO_IDENTITY",
            Error::Timeout(_) => "TIMEOUT",
            Error::RequestFailed(_) => "REQUEST_FAILED",
            Error::LinkFailed(_) => "LINK_FAILED",
            Error::Io(_) => "CACHE_ERROR",
            Error::Settings(_) => "SETTINGS_ERROR",
            Error::Archive(_) => "ARCHIVE_ERROR",
        }
    }

    /// Whether a later retry of the same remote operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NoPath(_) | Error::Timeout(_) | Error::RequestFailed(_) | Error::LinkFailed(_))
    }
}
