use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

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
            prefix: "stale_cache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// The process-wide switch that turns off caching for every cache built with it.
///
/// This is read once on startup, either from the config file or from the
/// [`STALE_CACHE_DISABLED`](Self::ENV_VAR) environment variable, and then handed to each
/// [`CacheBuilder`](crate::CacheBuilder). It is never consulted at call time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct GlobalSwitch {
    disabled: bool,
}

impl GlobalSwitch {
    /// The environment variable consulted by [`GlobalSwitch::from_env`].
    pub const ENV_VAR: &'static str = "STALE_CACHE_DISABLED";

    pub const fn enabled() -> Self {
        Self { disabled: false }
    }

    pub const fn disabled() -> Self {
        Self { disabled: true }
    }

    /// Reads the switch from the [`STALE_CACHE_DISABLED`](Self::ENV_VAR) environment variable.
    ///
    /// Caching is disabled if the variable is set to `1`, `true`, `yes` or `on`.
    pub fn from_env() -> Self {
        match env::var(Self::ENV_VAR) {
            Ok(value) => Self::parse(&value),
            Err(_) => Self::enabled(),
        }
    }

    fn parse(value: &str) -> Self {
        let disabled = matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
        Self { disabled }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

/// Default settings for caches, and for the [`MemoryStore`](crate::MemoryStore).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a freshly loaded value is served without refreshing it.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How long an expired entry is kept by the in-memory store to be served as a stale value.
    ///
    /// `None` keeps expired entries until they are overwritten or evicted due to capacity.
    #[serde(with = "humantime_serde")]
    pub max_stale: Option<Duration>,

    /// Maximum number of concurrently running lazy refreshes per cache.
    pub max_lazy_refreshes: isize,

    /// Capacity of the in-memory store.
    pub in_memory_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_stale: None,
            max_lazy_refreshes: 50,
            in_memory_capacity: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Turns off all caches built from this configuration.
    ///
    /// Defaults to the value of the `STALE_CACHE_DISABLED` environment variable.
    pub caches_disabled: GlobalSwitch,

    /// Default settings for caches.
    pub cache: CacheConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            caches_disabled: GlobalSwitch::from_env(),
            cache: CacheConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
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

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
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
