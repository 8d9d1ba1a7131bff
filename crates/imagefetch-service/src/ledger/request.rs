use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use tokio::runtime::Handle;

use crate::caching::{CacheError, RequestKey};
use crate::error::{ServiceError, ServiceErrorCode, ServiceResult};

const PENDING: u8 = 0;
const DOWNLOADING: u8 = 1;
const COMPLETED: u8 = 2;

/// A future resolving once an [`ImageRequest`] has completed.
///
/// It can be cloned and awaited any number of times, all clones resolve to the same result.
pub type Completion = Shared<BoxFuture<'static, ServiceResult>>;

type DownloadFn = Box<dyn FnOnce() -> BoxFuture<'static, ServiceResult<Bytes>> + Send>;
type PersistFn = Box<dyn FnOnce(Bytes) -> Result<(), CacheError> + Send>;
type CompleteFn = Box<dyn FnOnce(&ImageRequest) + Send>;

/// The lifecycle stage of an [`ImageRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for a download slot.
    Pending,
    /// The download is running.
    Downloading,
    /// The download finished, see [`ImageRequest::outcome`].
    Completed,
}

/// Everything needed to run the download, taken out exactly once when it starts.
struct Handlers {
    download: DownloadFn,
    persist: PersistFn,
    on_complete: CompleteFn,
    sender: oneshot::Sender<ServiceResult>,
}

/// One attempt to download an image and write it to the cache.
///
/// A request starts out [`Pending`](RequestState::Pending). Starting it moves it to
/// [`Downloading`](RequestState::Downloading), which happens at most once no matter how many
/// threads race for it. Once the download and the cache write are done, the request is
/// [`Completed`](RequestState::Completed) and its [`completion`](Self::completion) resolves.
pub struct ImageRequest {
    key: RequestKey,
    retry_count: u32,
    state: AtomicU8,
    handlers: Mutex<Option<Handlers>>,
    outcome: OnceLock<ServiceResult>,
    completion: Completion,
    runtime: Handle,
}

impl ImageRequest {
    /// Creates a pending request.
    ///
    /// - `download` produces the payload, and is called exactly once when the request starts.
    /// - `persist` stores a successfully downloaded payload. An error or a panic fails the
    ///   request with [`InvalidResponseContent`](ServiceErrorCode::InvalidResponseContent).
    /// - `on_complete` is invoked exactly once after the completion has resolved.
    pub fn new<D, P, C>(
        key: RequestKey,
        retry_count: u32,
        runtime: Handle,
        download: D,
        persist: P,
        on_complete: C,
    ) -> Arc<Self>
    where
        D: FnOnce() -> BoxFuture<'static, ServiceResult<Bytes>> + Send + 'static,
        P: FnOnce(Bytes) -> Result<(), CacheError> + Send + 'static,
        C: FnOnce(&ImageRequest) + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let completion = receiver
            .map(|result| {
                result.unwrap_or_else(|_| {
                    Err(ServiceError::new(
                        ServiceErrorCode::Unknown,
                        "request was dropped before completing",
                    ))
                })
            })
            .boxed()
            .shared();

        Arc::new(Self {
            key,
            retry_count,
            state: AtomicU8::new(PENDING),
            handlers: Mutex::new(Some(Handlers {
                download: Box::new(download),
                persist: Box::new(persist),
                on_complete: Box::new(on_complete),
                sender,
            })),
            outcome: OnceLock::new(),
            completion,
            runtime,
        })
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// How many failed attempts preceded this one, not counting those where the network was
    /// unavailable.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn state(&self) -> RequestState {
        match self.state.load(Ordering::SeqCst) {
            PENDING => RequestState::Pending,
            DOWNLOADING => RequestState::Downloading,
            _ => RequestState::Completed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == RequestState::Pending
    }

    pub fn is_downloading(&self) -> bool {
        self.state() == RequestState::Downloading
    }

    pub fn is_completed(&self) -> bool {
        self.state() == RequestState::Completed
    }

    /// The result of the request, once it has completed.
    pub fn outcome(&self) -> Option<&ServiceResult> {
        self.outcome.get()
    }

    /// Returns a future resolving to the result of this request.
    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    /// Starts the download unless it has been started before.
    ///
    /// Returns `true` for exactly one caller. The download is spawned onto the runtime, so this
    /// never blocks.
    #[cfg(test)]
    pub(crate) fn try_start(self: &Arc<Self>) -> bool {
        self.try_start_then(|| ())
    }

    /// Starts the download unless it has been started before, invoking `on_acquired` after
    /// winning the start and before the download is spawned.
    ///
    /// Returns `true` for exactly one caller.
    pub(crate) fn try_start_then(self: &Arc<Self>, on_acquired: impl FnOnce()) -> bool {
        if self
            .state
            .compare_exchange(PENDING, DOWNLOADING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let handlers = self.handlers.lock().unwrap().take();
        let Handlers {
            download,
            persist,
            on_complete,
            sender,
        } = handlers.expect("handlers are only taken by the winner of the state transition");

        on_acquired();
        tracing::debug!(key = %self.key, retry_count = self.retry_count, "Starting image download");

        // Completes the request even if the task panics or the runtime drops it.
        let guard = CompletionGuard {
            request: Arc::clone(self),
            sender: Some(sender),
            on_complete: Some(on_complete),
        };

        self.runtime.spawn(async move {
            let result = match download().await {
                Ok(data) => run_persist(&guard.request.key, persist, data),
                Err(error) => Err(error),
            };
            guard.complete(result);
        });

        true
    }

    /// Completes a request that never started with an [`Unknown`](ServiceErrorCode::Unknown)
    /// failure. Does nothing if the request has started already.
    pub(crate) fn abandon(&self) {
        if self
            .state
            .compare_exchange(PENDING, COMPLETED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let result = Err(ServiceError::new(
            ServiceErrorCode::Unknown,
            "request was abandoned before it started",
        ));
        let _ = self.outcome.set(result.clone());
        // `on_complete` is dropped without being called, the request never downloaded
        if let Some(handlers) = self.handlers.lock().unwrap().take() {
            let _ = handlers.sender.send(result);
        }
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("key", &self.key)
            .field("retry_count", &self.retry_count)
            .field("state", &self.state())
            .field("outcome", &self.outcome.get())
            .finish()
    }
}

/// Writes `data` to the cache, turning errors and panics into failed results.
fn run_persist(key: &RequestKey, persist: PersistFn, data: Bytes) -> ServiceResult {
    match panic::catch_unwind(AssertUnwindSafe(|| persist(data))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => {
            tracing::error!(
                %key,
                error = &error as &dyn std::error::Error,
                "Failed to write image to cache",
            );
            Err(ServiceError::from_std_error(ServiceErrorCode::InvalidResponseContent, &error))
        }
        Err(payload) => {
            let details = panic_message(payload.as_ref());
            tracing::error!(%key, details = %details, "Writing image to cache panicked");
            Err(ServiceError::new(ServiceErrorCode::InvalidResponseContent, details))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "cache write panicked".to_owned()
    }
}

struct CompletionGuard {
    request: Arc<ImageRequest>,
    sender: Option<oneshot::Sender<ServiceResult>>,
    on_complete: Option<CompleteFn>,
}

impl CompletionGuard {
    fn complete(mut self, result: ServiceResult) {
        self.finish(result);
    }

    fn finish(&mut self, result: ServiceResult) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        match &result {
            Ok(()) => tracing::debug!(key = %self.request.key, "Image request succeeded"),
            Err(error) => tracing::debug!(
                key = %self.request.key,
                error = error as &dyn std::error::Error,
                "Image request failed",
            ),
        }

        let _ = self.request.outcome.set(result.clone());
        self.request.state.store(COMPLETED, Ordering::SeqCst);
        // observers may have gone away, which is fine
        let _ = sender.send(result);

        if let Some(on_complete) = self.on_complete.take() {
            on_complete(&self.request);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.finish(Err(ServiceError::new(
            ServiceErrorCode::Unknown,
            "download task ended without a result",
        )));
    }
}
