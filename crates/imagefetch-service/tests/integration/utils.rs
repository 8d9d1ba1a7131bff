use std::time::Duration;

use imagefetch_service::config::Config;
use imagefetch_service::services::ImageService;
use imagefetch_test::{self as test, TempDir};

/// Creates an [`ImageService`] caching into a fresh temp directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped, so hold on to it.
pub fn setup_service(update_config: impl FnOnce(&mut Config)) -> (ImageService, TempDir) {
    test::setup();

    let cache_dir = test::tempdir();
    let mut config = Config {
        cache_dir: Some(cache_dir.path().to_owned()),
        connect_timeout: Duration::from_secs(1),
        head_timeout: Duration::from_secs(2),
        max_download_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    update_config(&mut config);

    let service = ImageService::new(config, tokio::runtime::Handle::current()).unwrap();
    (service, cache_dir)
}
