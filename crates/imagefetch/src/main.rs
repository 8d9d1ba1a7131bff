//! imagefetch.
//!
//! A command line client for the image services: downloads images through the request ledger
//! into the configured caches, and manages those caches.

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
