//! Remote image acquisition.
//!
//! The central piece is the [`RequestLedger`](ledger::RequestLedger): it deduplicates concurrent
//! requests for the same image, bounds the number of simultaneously running downloads, retries
//! failed downloads on demand, and writes successful payloads into an
//! [`ImageCache`](caching::ImageCache).
//!
//! Downloads are performed by an [`ImageDownloader`](download::ImageDownloader), of which
//! [`HttpImageDownloader`](download::HttpImageDownloader) is the production implementation.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod services;
pub mod types;
pub mod utils;

#[cfg(test)]
use imagefetch_test as test;
