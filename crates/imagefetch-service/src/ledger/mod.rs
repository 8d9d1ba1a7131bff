//! # Request Ledger
//!
//! The [`RequestLedger`] coordinates image downloads on behalf of any number of callers:
//!
//! - Requests are identified by their [`RequestKey`]. Concurrent requests for the same key join
//!   the same [`ImageRequest`], so the image is downloaded once.
//! - At most [`max_concurrent_downloads`](LedgerConfig::max_concurrent_downloads) requests are
//!   downloading at any time. Further requests stay pending and are started in the order they
//!   were created once a download slot frees up.
//! - Successful downloads are written to the [`ImageCache`] and the request is forgotten, so a
//!   later request for the same key downloads the image again.
//! - Failed requests stay around. Requesting them again either hands out the failed request or
//!   replaces it with a new attempt, according to [`next_retry_count`]. There is no timer
//!   involved, retries only ever happen on demand.
//!
//! Cache lookups go straight to the [`ImageCache`] and never wait for or start a download.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::runtime::Handle;

use crate::caching::{CacheError, ImageCache, RequestKey};
use crate::config::LedgerConfig;
use crate::download::ImageDownloader;
use crate::error::LedgerError;
use crate::types::ImageOptions;
use crate::utils::defer::defer;
use crate::utils::futures::measure;

mod request;
mod retry;

pub use request::{Completion, ImageRequest, RequestState};
pub use retry::next_retry_count;

#[derive(Debug, Clone)]
struct LedgerEntry {
    /// Orders entries by creation, pending requests are started in this order.
    sequence: u64,
    request: Arc<ImageRequest>,
}

struct LedgerInner {
    config: LedgerConfig,
    cache: Arc<dyn ImageCache>,
    downloader: Arc<dyn ImageDownloader>,
    runtime: Handle,

    entries: Mutex<HashMap<RequestKey, LedgerEntry>>,
    next_sequence: AtomicU64,

    /// The number of requests that are downloading.
    active_downloads: AtomicUsize,
    sweep_running: AtomicBool,
    sweep_requested: AtomicBool,
}

/// Deduplicates, limits and retries image downloads.
///
/// The ledger is cheap to clone, all clones share the same state. See the [module
/// docs](self) for details.
#[derive(Clone)]
pub struct RequestLedger {
    inner: Arc<LedgerInner>,
}

impl RequestLedger {
    /// Creates a new ledger spawning downloads onto `runtime`.
    pub fn new(
        config: LedgerConfig,
        cache: Arc<dyn ImageCache>,
        downloader: Arc<dyn ImageDownloader>,
        runtime: Handle,
    ) -> Result<Self, LedgerError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(LedgerInner {
                config,
                cache,
                downloader,
                runtime,
                entries: Mutex::new(HashMap::new()),
                next_sequence: AtomicU64::new(0),
                active_downloads: AtomicUsize::new(0),
                sweep_running: AtomicBool::new(false),
                sweep_requested: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<dyn ImageCache> {
        &self.inner.cache
    }

    /// Loads an image from the cache.
    pub fn try_get_cached_image(&self, url: &str, options: &ImageOptions) -> Option<Bytes> {
        self.inner.cache.try_get(&RequestKey::new(url, options))
    }

    /// Writes an image to the cache, replacing any previously cached one.
    pub fn put_cached_image(
        &self,
        url: &str,
        options: &ImageOptions,
        data: Bytes,
    ) -> Result<(), CacheError> {
        self.inner.cache.put(&RequestKey::new(url, options), data)
    }

    pub fn remove_cached_image(&self, url: &str, options: &ImageOptions) -> Result<(), CacheError> {
        self.inner.cache.remove(&RequestKey::new(url, options))
    }

    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.inner.cache.clear()
    }

    pub fn is_cached(&self, url: &str, options: &ImageOptions) -> bool {
        self.inner.cache.exists(&RequestKey::new(url, options))
    }

    /// Returns the request for the image at `url`, creating it if necessary.
    ///
    /// - A request that has not completed yet is joined.
    /// - A request that completed successfully, but has not been forgotten yet, is returned as is.
    ///   It does not trigger a new download.
    /// - A failed request is either returned as is, or replaced with a new attempt, see
    ///   [`next_retry_count`].
    ///
    /// Newly created requests start downloading right away if there is capacity left, otherwise
    /// they wait for a running download to finish. Either way this never blocks.
    pub fn start_or_join_request(
        &self,
        url: &str,
        options: &ImageOptions,
    ) -> Result<Arc<ImageRequest>, LedgerError> {
        if url.is_empty() {
            return Err(LedgerError::EmptyUrl);
        }

        let key = RequestKey::new(url, options);
        tracing::trace!(%key, "Derived request key");

        let request = {
            let mut entries = self.inner.entries.lock().unwrap();

            let retry_count = match entries.get(&key) {
                None => 0,
                Some(LedgerEntry { request, .. }) => match request.outcome() {
                    None => {
                        metric!(counter("ledger.request.joined") += 1);
                        return Ok(request.clone());
                    }
                    Some(Ok(())) => return Ok(request.clone()),
                    Some(Err(error)) => {
                        let max_retry_attempts = self.inner.config.max_retry_attempts;
                        let retry_count = request.retry_count();
                        match next_retry_count(error.code(), retry_count, max_retry_attempts) {
                            Some(retry_count) => {
                                tracing::debug!(
                                    %key,
                                    retry_count,
                                    error = error as &dyn std::error::Error,
                                    "Retrying failed image request",
                                );
                                retry_count
                            }
                            None => {
                                metric!(
                                    counter("ledger.request.stale_failure") += 1,
                                    "reason" => error.code().as_str(),
                                );
                                return Ok(request.clone());
                            }
                        }
                    }
                },
            };

            let entry = self.create_entry(key.clone(), url, options, retry_count);
            let request = entry.request.clone();
            // replaces the failed request, if any
            entries.insert(key, entry);

            metric!(
                counter("ledger.request.created") += 1,
                "retry" => if retry_count > 0 { "true" } else { "false" },
            );
            request
        };

        self.inner.admit_pending();
        Ok(request)
    }

    /// Returns a future that resolves once all requests that are not completed right now have
    /// completed.
    ///
    /// Requests created after this call are not waited for.
    pub fn in_flight_completion(&self) -> BoxFuture<'static, ()> {
        let completions: Vec<_> = self
            .inner
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| !entry.request.is_completed())
            .map(|entry| entry.request.completion())
            .collect();

        future::join_all(completions).map(|_| ()).boxed()
    }

    /// Returns the request registered for the image at `url`, if any.
    pub fn get_request(&self, url: &str, options: &ImageOptions) -> Option<Arc<ImageRequest>> {
        let key = RequestKey::new(url, options);
        let entries = self.inner.entries.lock().unwrap();
        entries.get(&key).map(|entry| entry.request.clone())
    }

    /// The number of requests that are downloading right now.
    pub fn active_downloads(&self) -> usize {
        self.inner.active_downloads.load(Ordering::SeqCst)
    }

    /// The number of registered requests, pending, downloading or failed.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn create_entry(
        &self,
        key: RequestKey,
        url: &str,
        options: &ImageOptions,
        retry_count: u32,
    ) -> LedgerEntry {
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed);

        let download = {
            let downloader = self.inner.downloader.clone();
            let url = url.to_owned();
            let options = *options;
            move || {
                async move {
                    let download = downloader.download_image(&url, &options);
                    measure("image_download", download).await
                }
                .boxed()
            }
        };

        let persist = {
            let cache = self.inner.cache.clone();
            let key = key.clone();
            move |data: Bytes| cache.put(&key, data)
        };

        let on_complete = {
            let ledger = Arc::downgrade(&self.inner);
            move |request: &ImageRequest| {
                LedgerInner::download_completed(&ledger, request, sequence)
            }
        };

        let request = ImageRequest::new(
            key,
            retry_count,
            self.inner.runtime.clone(),
            download,
            persist,
            on_complete,
        );

        LedgerEntry { sequence, request }
    }
}

impl fmt::Debug for RequestLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLedger")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .field("downloader", &self.inner.downloader)
            .field("entries", &self.len())
            .field("active_downloads", &self.active_downloads())
            .finish()
    }
}

impl LedgerInner {
    fn download_completed(ledger: &Weak<Self>, request: &ImageRequest, sequence: u64) {
        let Some(inner) = ledger.upgrade() else {
            return;
        };

        let status = match request.outcome() {
            Some(Ok(())) => {
                let mut entries = inner.entries.lock().unwrap();
                // a retry may have replaced this request in the meantime
                if entries
                    .get(request.key())
                    .is_some_and(|entry| entry.sequence == sequence)
                {
                    entries.remove(request.key());
                }
                "ok"
            }
            Some(Err(error)) => error.code().as_str(),
            None => "unknown",
        };
        metric!(counter("ledger.request.completed") += 1, "status" => status);

        let previous = inner.active_downloads.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "more downloads completed than started");
        metric!(gauge("ledger.downloads.active") = previous.saturating_sub(1) as u64);

        inner.admit_pending();
    }

    /// Starts pending requests while there is download capacity left.
    ///
    /// Only one thread sweeps at a time. Calls made while a sweep is running make that sweep go
    /// around once more instead of sweeping themselves, so no admission is lost.
    fn admit_pending(&self) {
        self.sweep_requested.store(true, Ordering::SeqCst);

        while self.sweep_requested.load(Ordering::SeqCst) {
            if self
                .sweep_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            let _running = defer(|| self.sweep_running.store(false, Ordering::SeqCst));

            while self.sweep_requested.swap(false, Ordering::SeqCst) {
                self.sweep();
            }
        }
    }

    fn sweep(&self) {
        let max = self.config.max_concurrent_downloads;
        if self.active_downloads.load(Ordering::SeqCst) >= max {
            return;
        }

        let mut pending: Vec<_> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.request.is_pending())
            .map(|entry| (entry.sequence, entry.request.clone()))
            .collect();
        pending.sort_unstable_by_key(|(sequence, _)| *sequence);

        // Requests are started without holding the lock, as starting may complete them inline.
        for (_, request) in pending {
            if self.active_downloads.load(Ordering::SeqCst) >= max {
                break;
            }

            let started = request.try_start_then(|| {
                let active = self.active_downloads.fetch_add(1, Ordering::SeqCst) + 1;
                metric!(gauge("ledger.downloads.active") = active as u64);
            });
            if started {
                tracing::trace!(key = %request.key(), "Admitted image request");
            }
        }
    }
}

impl Drop for LedgerInner {
    fn drop(&mut self) {
        // Nobody is going to start these anymore, resolve them so that waiters do not hang.
        let entries = match self.entries.get_mut() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        for entry in entries.values() {
            entry.request.abandon();
        }
    }
}
