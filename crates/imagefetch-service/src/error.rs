use std::fmt;

use thiserror::Error;

/// The reason a download did not produce an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorCode {
    /// The server refused access to the resource.
    Unauthorized,
    /// The server rejected the request as malformed.
    BadRequest,
    /// The request did not complete in time.
    RequestTimeout,
    /// A response arrived, but it does not contain a usable image.
    ///
    /// This is also used when a downloaded payload could not be written to the cache.
    InvalidResponseContent,
    /// The server reported a conflict.
    Conflict,
    /// The resource does not exist. This is treated as permanent and never retried.
    ResourceNotFound,
    /// The server failed to process the request.
    InternalServerError,
    /// The device is offline. Retrying does not count against the retry budget.
    NetworkUnavailable,
    /// Only a metered connection is available, but downloads require wifi.
    WifiRequired,
    /// A connection to the server could not be established.
    ConnectionFailure,
    /// The connection broke down while transferring data.
    CommunicationFailure,
    /// Anything else.
    Unknown,
}

impl ServiceErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad-request",
            Self::RequestTimeout => "request-timeout",
            Self::InvalidResponseContent => "invalid-response-content",
            Self::Conflict => "conflict",
            Self::ResourceNotFound => "resource-not-found",
            Self::InternalServerError => "internal-server-error",
            Self::NetworkUnavailable => "network-unavailable",
            Self::WifiRequired => "wifi-required",
            Self::ConnectionFailure => "connection-failure",
            Self::CommunicationFailure => "communication-failure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed download, consisting of a [`ServiceErrorCode`] and some human readable details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {details}")]
pub struct ServiceError {
    code: ServiceErrorCode,
    details: String,
}

impl ServiceError {
    pub fn new(code: ServiceErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
        }
    }

    pub fn code(&self) -> ServiceErrorCode {
        self.code
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// Creates an error from the innermost source of `error`, which usually carries the most
    /// useful message.
    pub fn from_std_error(code: ServiceErrorCode, mut error: &dyn std::error::Error) -> Self {
        while let Some(source) = error.source() {
            error = source;
        }
        Self::new(code, error.to_string())
    }
}

/// The outcome of a download or an image request.
///
/// Downloads carry the payload, whereas image requests only signal success, as their payload is
/// written to the cache.
pub type ServiceResult<T = ()> = Result<T, ServiceError>;

/// Invalid arguments or configuration passed to the
/// [`RequestLedger`](crate::ledger::RequestLedger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Images can only be requested for a non-empty url.
    #[error("image url must not be empty")]
    EmptyUrl,
    /// The ledger needs to be able to run at least one download.
    #[error("max_concurrent_downloads must be at least 1")]
    NoDownloadCapacity,
}
