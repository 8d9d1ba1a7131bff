//! Helpers for testing the image services.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, the file-system cache silently
//!    recreates the directory and leaks it.
//!
//!  - When using [`ImageServer`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, the ports remain open and all
//!    connections to it will time out.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{self, Request};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::routing::get;
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// The start of a JPEG file, served by the `/image/` route of the [`ImageServer`].
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00];

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `imagefetch` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("imagefetch_service=trace,imagefetch=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A server with a couple of canned routes that counts how often each uri was requested.
///
/// - `/image/*path` responds with [`JPEG`].
/// - `/large/:size/*path` responds with an `image/jpeg` payload of `size` bytes.
/// - `/empty/*path` responds with an empty `image/jpeg` payload.
/// - `/text/*path` responds with a `text/plain` payload.
/// - `/status/:code/*path` responds with the given status code.
/// - `/delay/:time/*path` waits for the given duration, then redirects to `/path`.
///
/// Hits are recorded by their full uri, including the query string.
pub struct ImageServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ImageServer {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/image/*path",
                get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], JPEG) }),
            )
            .route(
                "/large/:size/*path",
                get(
                    |extract::Path((size, _)): extract::Path<(usize, String)>| async move {
                        ([(header::CONTENT_TYPE, "image/jpeg")], vec![0xFF; size])
                    },
                ),
            )
            .route(
                "/empty/*path",
                get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], "") }),
            )
            .route(
                "/text/*path",
                get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "not an image") }),
            )
            .route(
                "/status/:code/*path",
                get(
                    |extract::Path((code, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, path)): extract::Path<(String, String)>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        (StatusCode::FOUND, [(header::LOCATION, format!("/{path}"))])
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns the total number of requests since the last call, and resets the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the number of requests per uri since the last call, and resets the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for ImageServer {
    fn default() -> Self {
        Self::new()
    }
}
