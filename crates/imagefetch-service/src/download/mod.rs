//! Downloading images from remote locations.
//!
//! The [`RequestLedger`](crate::ledger::RequestLedger) only knows about the [`ImageDownloader`]
//! trait. [`HttpImageDownloader`] is the implementation used in production; tests substitute
//! their own.

use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::StatusCode;

use crate::error::{ServiceError, ServiceErrorCode, ServiceResult};
use crate::types::ImageOptions;

mod connectivity;
mod http;

pub use connectivity::{AlwaysOnline, Connectivity, NetworkStatus, SwitchableConnectivity};
pub use http::HttpImageDownloader;

/// Fetches the payload of a remote image.
pub trait ImageDownloader: fmt::Debug + Send + Sync + 'static {
    /// Downloads the image at `url`, asking the remote end to render it according to `options`.
    ///
    /// All failures are reported as a [`ServiceError`], downloaders never panic on bad input.
    fn download_image<'a>(
        &'a self,
        url: &'a str,
        options: &'a ImageOptions,
    ) -> BoxFuture<'a, ServiceResult<Bytes>>;
}

impl From<reqwest::Error> for ServiceError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            ServiceErrorCode::RequestTimeout
        } else if error.is_connect() {
            ServiceErrorCode::ConnectionFailure
        } else if error.is_body() || error.is_decode() {
            ServiceErrorCode::CommunicationFailure
        } else if let Some(status) = error.status() {
            return error_for_status(status);
        } else {
            ServiceErrorCode::Unknown
        };

        Self::from_std_error(code, &error)
    }
}

/// Maps an unsuccessful HTTP status to the matching [`ServiceError`].
pub(crate) fn error_for_status(status: StatusCode) -> ServiceError {
    debug_assert!(!status.is_success());

    let code = match status {
        StatusCode::BAD_REQUEST => ServiceErrorCode::BadRequest,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceErrorCode::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => ServiceErrorCode::ResourceNotFound,
        StatusCode::REQUEST_TIMEOUT => ServiceErrorCode::RequestTimeout,
        StatusCode::CONFLICT => ServiceErrorCode::Conflict,
        s if s.is_client_error() => ServiceErrorCode::BadRequest,
        s if s.is_server_error() => ServiceErrorCode::InternalServerError,
        _ => ServiceErrorCode::Unknown,
    };

    ServiceError::new(code, status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let cases = [
            (400, ServiceErrorCode::BadRequest),
            (401, ServiceErrorCode::Unauthorized),
            (403, ServiceErrorCode::Unauthorized),
            (404, ServiceErrorCode::ResourceNotFound),
            (410, ServiceErrorCode::ResourceNotFound),
            (408, ServiceErrorCode::RequestTimeout),
            (409, ServiceErrorCode::Conflict),
            (418, ServiceErrorCode::BadRequest),
            (429, ServiceErrorCode::BadRequest),
            (500, ServiceErrorCode::InternalServerError),
            (503, ServiceErrorCode::InternalServerError),
            (304, ServiceErrorCode::Unknown),
        ];

        for (status, code) in cases {
            let status = StatusCode::from_u16(status).unwrap();
            let error = error_for_status(status);
            assert_eq!(error.code(), code, "{status}");
            assert_eq!(error.details(), status.to_string());
        }
    }
}
