//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imagefetch_service::caching::RequestKey;
use imagefetch_service::config::Config;
use imagefetch_service::ledger::RequestLedger;
use imagefetch_service::metrics;
use imagefetch_service::services::ImageService;
use imagefetch_service::types::{ImageOptions, ResizeMode};
use tokio::runtime::Handle;

use crate::logging;

/// imagefetch commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Download images into the cache.
    Fetch(FetchArgs),

    /// Remove all cached images.
    Clear,
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// The urls of the images to download.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    /// Ask the server for images of this width.
    #[arg(long)]
    width: Option<u32>,

    /// Ask the server for images of this height.
    #[arg(long)]
    height: Option<u32>,

    /// How the server should fit images into width and height.
    #[arg(long, default_value_t = ResizeMode::Default)]
    mode: ResizeMode,

    /// Download images even if they are cached already.
    #[arg(long)]
    force: bool,

    /// Write the images into this directory.
    #[arg(long, short, value_name = "DIR")]
    output: Option<PathBuf>,
}

impl FetchArgs {
    fn options(&self) -> ImageOptions {
        ImageOptions {
            width: self.width,
            height: self.height,
            resize_mode: self.mode,
        }
    }
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(name = "imagefetch", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, the runtime is created below.
    unsafe { logging::init_logging(&config) };
    if let Some(statsd) = &config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("imagefetch-io")
        .enable_all()
        .build()
        .context("failed to create the runtime")?;
    let handle = runtime.handle().clone();

    runtime.block_on(async move {
        match cli.command {
            Command::Fetch(args) => fetch(config, handle, &args).await,
            Command::Clear => clear(config, handle),
        }
    })
}

async fn fetch(config: Config, io_pool: Handle, args: &FetchArgs) -> Result<()> {
    let service = ImageService::new(config, io_pool)?;
    let ledger = &service.ledger;
    let options = args.options();

    if let Some(output) = &args.output {
        tokio::fs::create_dir_all(output)
            .await
            .with_context(|| format!("failed to create {}", output.display()))?;
    }

    let mut requests = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        if !args.force && ledger.is_cached(url, &options) {
            requests.push((url, None));
            continue;
        }
        let request = ledger
            .start_or_join_request(url, &options)
            .with_context(|| format!("failed to request `{url}`"))?;
        requests.push((url, Some(request)));
    }

    ledger.in_flight_completion().await;

    let mut failures = 0;
    for (url, request) in requests {
        let result = match request {
            None => Ok("cached"),
            Some(request) => request.completion().await.map(|()| "downloaded"),
        };

        match result {
            Ok(status) => {
                println!("{status:>10}  {url}");
                if let Some(output) = &args.output {
                    let path = write_image(ledger, output, url, &options).await?;
                    tracing::debug!(%url, path = %path.display(), "Wrote image");
                }
            }
            Err(error) => {
                failures += 1;
                println!("{:>10}  {url}  {error}", "failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} images could not be fetched", args.urls.len());
    }
    Ok(())
}

fn clear(config: Config, io_pool: Handle) -> Result<()> {
    let service = ImageService::new(config, io_pool)?;
    service
        .ledger
        .clear_cache()
        .context("failed to clear the image cache")?;
    tracing::info!("Cleared the image cache");
    Ok(())
}

/// Writes the cached image for `url` into `output`, returning the path of the file.
async fn write_image(
    ledger: &RequestLedger,
    output: &Path,
    url: &str,
    options: &ImageOptions,
) -> Result<PathBuf> {
    let data = ledger
        .try_get_cached_image(url, options)
        .with_context(|| format!("`{url}` is no longer cached"))?;

    let name = RequestKey::new(url, options).cache_path().replace('/', "");
    let path = output.join(format!("{name}.{}", file_extension(&data)));
    tokio::fs::write(&path, &data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Guesses the file extension from the magic bytes of an image.
fn file_extension(data: &[u8]) -> &'static str {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [0x89, b'P', b'N', b'G', ..] => "png",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "bin",
    }
}
