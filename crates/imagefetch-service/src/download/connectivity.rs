use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The kind of network the device is currently connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected via an unmetered network.
    Online,
    /// Connected, but traffic may be billed.
    Metered,
    /// Not connected at all.
    Offline,
}

/// Reports the current [`NetworkStatus`].
///
/// The [`HttpImageDownloader`](super::HttpImageDownloader) consults this before each download,
/// failing fast instead of waiting for a connection timeout.
pub trait Connectivity: fmt::Debug + Send + Sync {
    fn status(&self) -> NetworkStatus;
}

/// A [`Connectivity`] that is always [`Online`](NetworkStatus::Online).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn status(&self) -> NetworkStatus {
        NetworkStatus::Online
    }
}

/// A [`Connectivity`] whose status is set from the outside, for instance by a platform
/// notification.
#[derive(Debug)]
pub struct SwitchableConnectivity(AtomicU8);

impl SwitchableConnectivity {
    pub fn new(status: NetworkStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn set(&self, status: NetworkStatus) {
        self.0.store(status as u8, Ordering::Relaxed);
    }
}

impl Connectivity for SwitchableConnectivity {
    fn status(&self) -> NetworkStatus {
        match self.0.load(Ordering::Relaxed) {
            0 => NetworkStatus::Online,
            1 => NetworkStatus::Metered,
            _ => NetworkStatus::Offline,
        }
    }
}
