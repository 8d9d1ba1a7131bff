use std::sync::Arc;
use std::time::Duration;

use imagefetch_service::config::Config;
use imagefetch_service::download::{
    HttpImageDownloader, ImageDownloader, NetworkStatus, SwitchableConnectivity,
};
use imagefetch_service::error::ServiceErrorCode;
use imagefetch_service::types::{ImageOptions, ResizeMode};
use imagefetch_test::{self as test, ImageServer, JPEG};

fn downloader(update_config: impl FnOnce(&mut Config)) -> HttpImageDownloader {
    test::setup();

    let mut config = Config {
        head_timeout: Duration::from_secs(2),
        max_download_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    update_config(&mut config);
    HttpImageDownloader::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_download_image() {
    let server = ImageServer::new();
    let downloader = downloader(|_| {});

    let url = server.url("image/a.jpg");
    let data = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap();
    assert_eq!(data, JPEG);
    assert_eq!(server.all_hits(), [("/image/a.jpg".to_owned(), 1)]);
}

#[tokio::test]
async fn test_options_as_query() {
    let server = ImageServer::new();
    let downloader = downloader(|_| {});

    let options = ImageOptions::EMPTY
        .with_width(100)
        .with_height(50)
        .with_resize_mode(ResizeMode::Pad);
    let url = server.url("image/a.jpg");
    downloader
        .download_image(url.as_str(), &options)
        .await
        .unwrap();

    assert_eq!(
        server.all_hits(),
        [("/image/a.jpg?w=100&h=50&mode=pad".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_status_codes() {
    let server = ImageServer::new();
    let downloader = downloader(|_| {});

    let cases = [
        (400, ServiceErrorCode::BadRequest),
        (401, ServiceErrorCode::Unauthorized),
        (403, ServiceErrorCode::Unauthorized),
        (404, ServiceErrorCode::ResourceNotFound),
        (408, ServiceErrorCode::RequestTimeout),
        (409, ServiceErrorCode::Conflict),
        (410, ServiceErrorCode::ResourceNotFound),
        (429, ServiceErrorCode::BadRequest),
        (500, ServiceErrorCode::InternalServerError),
        (502, ServiceErrorCode::InternalServerError),
    ];

    for (status, code) in cases {
        let url = server.url(&format!("status/{status}/a.jpg"));
        let error = downloader
            .download_image(url.as_str(), &ImageOptions::EMPTY)
            .await
            .unwrap_err();
        assert_eq!(error.code(), code, "{status}");
    }
}

#[tokio::test]
async fn test_invalid_content() {
    let server = ImageServer::new();
    let downloader = downloader(|config| config.max_image_size = 1024);

    for path in ["text/a.jpg", "empty/a.jpg", "large/4096/a.jpg"] {
        let url = server.url(path);
        let error = downloader
            .download_image(url.as_str(), &ImageOptions::EMPTY)
            .await
            .unwrap_err();
        assert_eq!(error.code(), ServiceErrorCode::InvalidResponseContent, "{path}");
    }

    // just below the limit is fine
    let url = server.url("large/1024/a.jpg");
    let data = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap();
    assert_eq!(data.len(), 1024);
}

#[tokio::test]
async fn test_redirect() {
    let server = ImageServer::new();
    let downloader = downloader(|_| {});

    let url = server.url("delay/0s/image/a.jpg");
    let data = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap();
    assert_eq!(data, JPEG);
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_head_timeout() {
    let server = ImageServer::new();
    let downloader = downloader(|config| config.head_timeout = Duration::from_millis(100));

    let url = server.url("delay/2s/image/a.jpg");
    let error = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ServiceErrorCode::RequestTimeout);
}

#[tokio::test]
async fn test_invalid_url() {
    let downloader = downloader(|_| {});

    let error = downloader
        .download_image("not a url", &ImageOptions::EMPTY)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ServiceErrorCode::BadRequest);
}

#[tokio::test]
async fn test_connectivity() {
    let server = ImageServer::new();
    let connectivity = Arc::new(SwitchableConnectivity::new(NetworkStatus::Offline));
    let downloader = downloader(|config| config.require_wifi = true)
        .with_connectivity(connectivity.clone());
    let url = server.url("image/a.jpg");

    let error = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ServiceErrorCode::NetworkUnavailable);

    connectivity.set(NetworkStatus::Metered);
    let error = downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ServiceErrorCode::WifiRequired);

    // no request made it to the server
    assert_eq!(server.accesses(), 0);

    let downloader = downloader.with_require_wifi(false);
    downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap();

    connectivity.set(NetworkStatus::Online);
    let downloader = downloader.with_require_wifi(true);
    downloader
        .download_image(url.as_str(), &ImageOptions::EMPTY)
        .await
        .unwrap();
    assert_eq!(server.accesses(), 2);
}
