use std::fs;

use bytes::Bytes;

use crate::test;
use crate::types::{ImageOptions, ResizeMode};

use super::*;

fn key(url: &str) -> RequestKey {
    RequestKey::new(url, &ImageOptions::EMPTY)
}

fn jpeg() -> Bytes {
    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

#[test]
fn test_memory_roundtrip() {
    test::setup();

    let cache = MemoryImageCache::new(1024);
    let key = key("http://x/img.jpg");

    assert!(!cache.exists(&key));
    assert_eq!(cache.try_get(&key), None);

    cache.put(&key, jpeg()).unwrap();
    assert!(cache.exists(&key));
    assert_eq!(cache.try_get(&key), Some(jpeg()));

    cache.put(&key, Bytes::from_static(b"\x89PNG")).unwrap();
    assert_eq!(cache.try_get(&key).as_deref(), Some(&b"\x89PNG"[..]));

    cache.remove(&key).unwrap();
    assert!(!cache.exists(&key));
    // removing twice is fine
    cache.remove(&key).unwrap();
}

#[test]
fn test_memory_rejects_oversized() {
    test::setup();

    let cache = MemoryImageCache::new(16);
    let key = key("http://x/img.jpg");

    let err = cache.put(&key, Bytes::from(vec![0; 64])).unwrap_err();
    assert!(matches!(err, CacheError::TooLarge { capacity: 16, .. }));
    assert!(!cache.exists(&key));
}

#[test]
fn test_memory_clear() {
    test::setup();

    let cache = MemoryImageCache::new(1024);
    let a = key("http://x/a.jpg");
    let b = key("http://x/b.jpg");
    cache.put(&a, jpeg()).unwrap();
    cache.put(&b, jpeg()).unwrap();

    cache.clear().unwrap();
    assert!(!cache.exists(&a));
    assert!(!cache.exists(&b));
}

#[test]
fn test_fs_roundtrip() {
    test::setup();

    let basedir = test::tempdir();
    let cache = FsImageCache::new(basedir.path().join("images")).unwrap();
    assert!(basedir.path().join("images").is_dir());

    let key = RequestKey::new(
        "http://x/img.jpg",
        &ImageOptions::EMPTY
            .with_width(10)
            .with_resize_mode(ResizeMode::Crop),
    );

    assert!(!cache.exists(&key));
    assert_eq!(cache.try_get(&key), None);

    cache.put(&key, jpeg()).unwrap();
    assert!(cache.exists(&key));
    assert_eq!(cache.try_get(&key), Some(jpeg()));

    let path = cache.cache_path(&key);
    assert!(path.starts_with(basedir.path()));
    assert_eq!(fs::read(&path).unwrap(), jpeg());

    cache.remove(&key).unwrap();
    assert!(!path.exists());
    cache.remove(&key).unwrap();
}

#[test]
fn test_fs_leaves_no_tempfiles() {
    test::setup();

    let basedir = test::tempdir();
    let cache = FsImageCache::new(basedir.path()).unwrap();

    for i in 0..5 {
        cache.put(&key(&format!("http://x/{i}.jpg")), jpeg()).unwrap();
    }

    let leftovers: Vec<_> = fs::read_dir(basedir.path())
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn test_fs_clear() {
    test::setup();

    let basedir = test::tempdir();
    let cache = FsImageCache::new(basedir.path().join("images")).unwrap();
    let a = key("http://x/a.jpg");
    cache.put(&a, jpeg()).unwrap();

    cache.clear().unwrap();
    assert!(!cache.exists(&a));
    assert!(cache.cache_dir().is_dir());

    // the cache is still usable afterwards
    cache.put(&a, jpeg()).unwrap();
    assert!(cache.exists(&a));
}

#[test]
fn test_layered_promotes_fs_hits() {
    test::setup();

    let basedir = test::tempdir();
    let fs_cache = FsImageCache::new(basedir.path()).unwrap();
    let key = key("http://x/img.jpg");
    fs_cache.put(&key, jpeg()).unwrap();

    let cache = LayeredImageCache::new(MemoryImageCache::new(1024), Some(fs_cache));
    assert!(!cache.memory().exists(&key));
    assert!(cache.exists(&key));

    assert_eq!(cache.try_get(&key), Some(jpeg()));
    assert!(cache.memory().exists(&key));
}

#[test]
fn test_layered_writes_both_layers() {
    test::setup();

    let basedir = test::tempdir();
    let cache = LayeredImageCache::new(
        MemoryImageCache::new(1024),
        Some(FsImageCache::new(basedir.path()).unwrap()),
    );
    let key = key("http://x/img.jpg");

    cache.put(&key, jpeg()).unwrap();
    assert!(cache.memory().exists(&key));
    assert!(cache.fs().unwrap().exists(&key));

    cache.remove(&key).unwrap();
    assert!(!cache.memory().exists(&key));
    assert!(!cache.fs().unwrap().exists(&key));
}

#[test]
fn test_layered_oversized_goes_to_fs_only() {
    test::setup();

    let basedir = test::tempdir();
    let cache = LayeredImageCache::new(
        MemoryImageCache::new(32),
        Some(FsImageCache::new(basedir.path()).unwrap()),
    );
    let key = key("http://x/img.jpg");
    let large = Bytes::from(vec![0xAB; 256]);

    cache.put(&key, large.clone()).unwrap();
    assert!(!cache.memory().exists(&key));
    assert_eq!(cache.try_get(&key), Some(large));
}

#[test]
fn test_layered_without_fs() {
    test::setup();

    let cache = LayeredImageCache::new(MemoryImageCache::new(32), None);
    let key = key("http://x/img.jpg");

    cache.put(&key, jpeg()).unwrap();
    assert_eq!(cache.try_get(&key), Some(jpeg()));

    assert!(cache.put(&key, Bytes::from(vec![0; 256])).is_err());

    cache.clear().unwrap();
    assert!(!cache.exists(&key));
}
