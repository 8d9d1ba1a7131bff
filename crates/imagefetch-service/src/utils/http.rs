use std::time::Duration;

use reqwest::{header, redirect};

use crate::config::Config;

/// Various timeouts for image downloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DownloadTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// The timeout for receiving the response headers.
    pub head: Duration,
    /// Global timeout for one download, including the body.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            head: config.head_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(1),
            head: Duration::from_secs(5),
            max_download: Duration::from_secs(30),
        }
    }
}

/// Creates a [`reqwest::Client`] with the provided timeouts and user agent.
///
/// Redirects are followed, but at most five times, as image CDNs never need more than that.
pub fn create_client(
    timeouts: &DownloadTimeouts,
    user_agent: &str,
) -> reqwest::Result<reqwest::Client> {
    let mut default_headers = header::HeaderMap::new();
    default_headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("image/*"),
    );

    reqwest::ClientBuilder::new()
        .gzip(true)
        .hickory_dns(true)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::limited(5))
        .user_agent(user_agent)
        .default_headers(default_headers)
        .build()
}
