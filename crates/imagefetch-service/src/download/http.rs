//! Support to download images from HTTP servers.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Client, header};
use url::Url;

use crate::config::Config;
use crate::error::{ServiceError, ServiceErrorCode, ServiceResult};
use crate::types::ImageOptions;
use crate::utils::http::{DownloadTimeouts, create_client};

use super::{AlwaysOnline, Connectivity, ImageDownloader, NetworkStatus, error_for_status};

/// Downloader implementation for images served over HTTP.
///
/// Width, height and resize mode are forwarded as `w`, `h` and `mode` query parameters, and the
/// server is expected to respond with an `image/*` payload.
#[derive(Debug, Clone)]
pub struct HttpImageDownloader {
    client: Client,
    timeouts: DownloadTimeouts,
    max_image_size: u64,
    require_wifi: bool,
    connectivity: Arc<dyn Connectivity>,
}

impl HttpImageDownloader {
    pub fn new(client: Client, timeouts: DownloadTimeouts, max_image_size: u64) -> Self {
        Self {
            client,
            timeouts,
            max_image_size,
            require_wifi: false,
            connectivity: Arc::new(AlwaysOnline),
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let timeouts = DownloadTimeouts::from_config(config);
        let client = create_client(&timeouts, &config.user_agent)?;
        Ok(Self::new(client, timeouts, config.max_image_size)
            .with_require_wifi(config.require_wifi))
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Refuse downloads while only a metered connection is available.
    pub fn with_require_wifi(mut self, require_wifi: bool) -> Self {
        self.require_wifi = require_wifi;
        self
    }

    fn check_connectivity(&self) -> ServiceResult {
        match self.connectivity.status() {
            NetworkStatus::Online => Ok(()),
            NetworkStatus::Metered if !self.require_wifi => Ok(()),
            NetworkStatus::Metered => Err(ServiceError::new(
                ServiceErrorCode::WifiRequired,
                "downloads are restricted to unmetered networks",
            )),
            NetworkStatus::Offline => Err(ServiceError::new(
                ServiceErrorCode::NetworkUnavailable,
                "no network connection",
            )),
        }
    }

    fn too_large(&self, size: u64) -> ServiceError {
        ServiceError::new(
            ServiceErrorCode::InvalidResponseContent,
            format!(
                "image of {size} bytes exceeds the limit of {} bytes",
                self.max_image_size
            ),
        )
    }

    async fn download(&self, url: &str, options: &ImageOptions) -> ServiceResult<Bytes> {
        self.check_connectivity()?;
        let url = image_url(url, options)?;

        tracing::debug!(%url, "Fetching image");
        let start = Instant::now();

        let request = self.client.get(url.clone()).send();
        let mut response = tokio::time::timeout(self.timeouts.head, request)
            .await
            .map_err(|_| {
                ServiceError::new(
                    ServiceErrorCode::RequestTimeout,
                    format!("no response within {:?}", self.timeouts.head),
                )
            })??;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%url, %status, "Unexpected status code");
            return Err(error_for_status(status));
        }

        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default();
            if !is_image_content_type(content_type) {
                return Err(ServiceError::new(
                    ServiceErrorCode::InvalidResponseContent,
                    format!("unexpected content type `{content_type}`"),
                ));
            }
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_image_size {
                return Err(self.too_large(content_length));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_image_size {
                return Err(self.too_large(body.len() as u64));
            }
        }

        if body.is_empty() {
            return Err(ServiceError::new(
                ServiceErrorCode::InvalidResponseContent,
                "empty response body",
            ));
        }

        metric!(timer("download.duration") = start.elapsed());
        metric!(time_raw("download.size") = body.len() as u64);

        Ok(body.freeze())
    }
}

impl ImageDownloader for HttpImageDownloader {
    fn download_image<'a>(
        &'a self,
        url: &'a str,
        options: &'a ImageOptions,
    ) -> BoxFuture<'a, ServiceResult<Bytes>> {
        self.download(url, options).boxed()
    }
}

/// Appends the image options to `url` as query parameters.
fn image_url(url: &str, options: &ImageOptions) -> ServiceResult<Url> {
    let mut url = Url::parse(url).map_err(|e| {
        ServiceError::new(
            ServiceErrorCode::BadRequest,
            format!("invalid image url: {e}"),
        )
    })?;

    let pairs = options.query_pairs();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}

fn is_image_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}
