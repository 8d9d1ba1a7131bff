use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::error::LedgerError;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "imagefetch".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Limits of the [`RequestLedger`](crate::ledger::RequestLedger).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// The maximum number of downloads running at the same time.
    ///
    /// Additional requests stay pending until a running download completes. Must be at least 1.
    pub max_concurrent_downloads: usize,

    /// How many failed downloads of one image are tolerated before callers get the stale failure.
    ///
    /// Requests that failed because the resource does not exist are never retried, and requests
    /// that failed because the network was unavailable do not count against this limit.
    pub max_retry_attempts: u32,
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.max_concurrent_downloads == 0 {
            return Err(LedgerError::NoDownloadCapacity);
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_retry_attempts: 3,
        }
    }
}

/// Configuration of the in-memory image cache.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Capacity in bytes.
    pub capacity: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
        }
    }
}

/// Struct containing all cache configurations.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfigs {
    /// Configure the in-memory layer, which is always active.
    pub in_memory: InMemoryCacheConfig,
}

/// See README.md for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to use when caching images on disk.
    ///
    /// When this is not set, images are only cached in memory.
    pub cache_dir: Option<PathBuf>,

    /// Logging configuration.
    pub logging: Logging,

    /// Metrics configuration.
    pub metrics: Metrics,

    /// DSN to report internal errors to.
    pub sentry_dsn: Option<Dsn>,

    /// Concurrency and retry limits.
    pub ledger: LedgerConfig,

    /// Fine-tune the image caches.
    pub caches: CacheConfigs,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout until the response headers have to be received.
    #[serde(with = "humantime_serde")]
    pub head_timeout: Duration,

    /// The timeout for one complete image download.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// Responses larger than this are rejected as invalid.
    pub max_image_size: u64,

    /// Refuse to download images over metered connections.
    pub require_wifi: bool,

    /// The `User-Agent` header sent with every download.
    pub user_agent: String,
}

impl Config {
    /// Returns the directory images are cached in, if the file-system cache is enabled.
    pub fn cache_dir<P>(&self, dir: P) -> Option<PathBuf>
    where
        P: AsRef<Path>,
    {
        self.cache_dir.as_ref().map(|base| base.join(dir))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: None,
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            ledger: LedgerConfig::default(),
            caches: CacheConfigs::default(),
            connect_timeout: Duration::from_secs(1),
            head_timeout: Duration::from_secs(5),
            max_download_timeout: Duration::from_secs(30),
            max_image_size: 20 * 1024 * 1024,
            require_wifi: false,
            user_agent: concat!("imagefetch/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self = serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config
            .ledger
            .validate()
            .context("invalid ledger configuration")?;
        Ok(config)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.ledger.max_concurrent_downloads, 3);
        assert_eq!(cfg.ledger.max_retry_attempts, 3);
        assert_eq!(cfg.cache_dir, None);
        assert!(!cfg.require_wifi);
    }

    #[test]
    fn test_ledger_config() {
        // Setting one limit keeps the default of the other.
        let yaml = r#"
            ledger:
              max_concurrent_downloads: 8
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.ledger.max_concurrent_downloads, 8);
        assert_eq!(cfg.ledger.max_retry_attempts, 3);
        assert_eq!(cfg.caches, CacheConfigs::default());
    }

    #[test]
    fn test_zero_download_capacity() {
        let yaml = r#"
            ledger:
              max_concurrent_downloads: 0
        "#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());

        let config = LedgerConfig {
            max_concurrent_downloads: 0,
            max_retry_attempts: 0,
        };
        assert_eq!(config.validate(), Err(LedgerError::NoDownloadCapacity));
    }

    #[test]
    fn test_cache_config() {
        let yaml = r#"
            cache_dir: /tmp/images
            caches:
              in_memory:
                capacity: 1024
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.caches.in_memory.capacity, 1024);
        assert_eq!(
            cfg.cache_dir("images"),
            Some(PathBuf::from("/tmp/images/images"))
        );
    }

    #[test]
    fn test_unspecified_dl_timeouts() {
        let yaml = r#"
            max_image_size: 100
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let default_cfg = Config::default();
        assert_eq!(cfg.max_download_timeout, default_cfg.max_download_timeout);
        assert_eq!(cfg.connect_timeout, default_cfg.connect_timeout);
        assert_eq!(cfg.head_timeout, default_cfg.head_timeout);
        assert_eq!(cfg.max_image_size, 100);
    }

    #[test]
    fn test_humantime_dl_timeouts() {
        let yaml = r#"
            max_download_timeout: 2m
            connect_timeout: 0s
            head_timeout: 250ms
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.max_download_timeout, Duration::from_secs(120));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(0));
        assert_eq!(cfg.head_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_logging() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: verbose
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              not_a_cache:
                capacity: 1
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
