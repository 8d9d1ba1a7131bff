use std::sync::Arc;

use futures::future;
use imagefetch_service::config::LedgerConfig;
use imagefetch_service::error::ServiceErrorCode;
use imagefetch_service::services::ImageService;
use imagefetch_service::types::ImageOptions;
use imagefetch_test::{ImageServer, JPEG};

use crate::utils::setup_service;

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_requests_download_once() {
    let server = ImageServer::new();
    let (service, cache_dir) = setup_service(|_| {});
    let ledger = &service.ledger;

    // the delay keeps the request in flight while everyone joins
    let url = server.url("delay/200ms/image/a.jpg");
    let requests: Vec<_> = (0..20)
        .map(|_| {
            ledger
                .start_or_join_request(url.as_str(), &ImageOptions::EMPTY)
                .unwrap()
        })
        .collect();

    for request in &requests[1..] {
        assert!(Arc::ptr_eq(&requests[0], request));
    }

    let results = future::join_all(requests.iter().map(|request| request.completion())).await;
    assert!(results.iter().all(Result::is_ok));

    // the redirect target is requested once as well
    assert_eq!(server.accesses(), 2);
    assert_eq!(
        ledger.try_get_cached_image(url.as_str(), &ImageOptions::EMPTY),
        Some(JPEG.into())
    );

    // a fresh service finds the image on disk
    let config = service.config.clone();
    drop(service);
    let service = ImageService::new(config, tokio::runtime::Handle::current()).unwrap();
    assert!(service.ledger.is_cached(url.as_str(), &ImageOptions::EMPTY));
    assert_eq!(server.accesses(), 0);

    drop(cache_dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_not_found_is_not_retried() {
    let server = ImageServer::new();
    let (service, _cache_dir) = setup_service(|_| {});
    let ledger = &service.ledger;

    let url = server.url("status/404/a.jpg");
    for _ in 0..3 {
        let request = ledger
            .start_or_join_request(url.as_str(), &ImageOptions::EMPTY)
            .unwrap();
        let error = request.completion().await.unwrap_err();
        assert_eq!(error.code(), ServiceErrorCode::ResourceNotFound);
    }

    assert_eq!(server.accesses(), 1);
    assert!(!ledger.is_cached(url.as_str(), &ImageOptions::EMPTY));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_errors_are_retried() {
    let server = ImageServer::new();
    let (service, _cache_dir) = setup_service(|config| {
        config.ledger = LedgerConfig {
            max_concurrent_downloads: 1,
            max_retry_attempts: 2,
        };
    });
    let ledger = &service.ledger;

    let url = server.url("status/500/a.jpg");
    for _ in 0..4 {
        let request = ledger
            .start_or_join_request(url.as_str(), &ImageOptions::EMPTY)
            .unwrap();
        let error = request.completion().await.unwrap_err();
        assert_eq!(error.code(), ServiceErrorCode::InternalServerError);
    }

    // two failures use up the budget, later requests get the stale failure
    assert_eq!(server.accesses(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_in_flight_completion() {
    let server = ImageServer::new();
    let (service, _cache_dir) = setup_service(|config| {
        config.ledger.max_concurrent_downloads = 2;
    });
    let ledger = &service.ledger;

    let urls: Vec<_> = (0..6)
        .map(|i| server.url(&format!("delay/50ms/image/{i}.jpg")))
        .collect();
    for url in &urls {
        ledger
            .start_or_join_request(url.as_str(), &ImageOptions::EMPTY)
            .unwrap();
    }
    assert!(ledger.active_downloads() <= 2);

    ledger.in_flight_completion().await;

    for url in &urls {
        assert!(ledger.is_cached(url.as_str(), &ImageOptions::EMPTY));
    }
    assert_eq!(server.accesses(), 12);
}
