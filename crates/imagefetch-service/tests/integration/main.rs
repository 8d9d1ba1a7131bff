mod downloader;
mod e2e;
mod utils;
