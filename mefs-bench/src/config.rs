//! Configuration for the benchmark.
//!
//! Configuration is loaded from the following sources, with decreasing precedence:
//!
//! 1. Environment variables (prefixed with `MEFS_BENCH__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! Environment variables use double underscores (`__`) to denote nested configuration structures,
//! for example `MEFS_BENCH__READINESS__MAX_ATTEMPTS=10`. The same configuration in YAML:
//!
//! ```yaml
//! remote: http://localhost:5001
//! users: 8
//!
//! readiness:
//!   interval: 20s
//!   max_attempts: 10
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::provision::BucketSettings;
use crate::readiness::RetryPolicy;
use crate::workload::Benchmark;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "MEFS_BENCH__";

/// Sizes of the uploaded payloads.
///
/// Used in: [`Config::payload`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Payload {
    /// Exclusive upper bound of random payload sizes. Sizes are drawn uniformly below it.
    ///
    /// # Default
    ///
    /// `100 MiB`
    pub max_size: ByteSize,

    /// Fixed payload sizes replacing random ones.
    ///
    /// Each user cycles through this list from the start. An empty list selects random sizes.
    ///
    /// # Default
    ///
    /// Empty
    pub fixed_sizes: Vec<ByteSize>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            max_size: ByteSize::mib(100),
            fixed_sizes: Vec::new(),
        }
    }
}

/// The bucket each user creates.
///
/// Users at even indices create it erasure-coded with the configured shard counts, users at odd
/// indices replicated.
///
/// Used in: [`Config::bucket`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Bucket {
    /// Name of the bucket. Every user has its own namespace, so all users share the name.
    pub name: String,
    /// Number of data shards.
    pub data_shards: u32,
    /// Number of parity shards.
    pub parity_shards: u32,
}

impl Default for Bucket {
    fn default() -> Self {
        let settings = BucketSettings::default();
        Self {
            name: settings.name,
            data_shards: settings.data_shards,
            parity_shards: settings.parity_shards,
        }
    }
}

/// Retries while a user's storage comes up.
///
/// Used in: [`Config::readiness`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Readiness {
    /// Delay between two attempts.
    ///
    /// # Default
    ///
    /// `20s`
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Attempts per user across starting it, polling its status and creating its bucket.
    ///
    /// Set to `null` to retry forever. A user that never becomes ready then keeps the run from
    /// finishing.
    ///
    /// # Default
    ///
    /// `45`
    pub max_attempts: Option<u32>,
}

impl Default for Readiness {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            interval: policy.interval,
            max_attempts: policy.max_attempts,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty for a TTY, simplified otherwise.
    Auto,
    /// Colored plain text.
    Pretty,
    /// Plain text without colors.
    Simplified,
    /// JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, the report to stdout.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// A plain level in `RUST_LOG` overrides this, any other `RUST_LOG` value is used as a
    /// filter directive.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Benchmark configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Base URL of the daemon's API. A missing scheme defaults to `http`.
    ///
    /// # Default
    ///
    /// `http://localhost:5001`
    pub remote: String,

    /// Number of simulated users.
    ///
    /// # Default
    ///
    /// `3`
    pub users: usize,

    /// Upload, download and verify cycles per user.
    ///
    /// # Default
    ///
    /// `1`
    pub objects_per_user: usize,

    /// Where downloaded objects are written. Created as a directory if it does not exist.
    ///
    /// # Default
    ///
    /// `downloads`
    pub output_dir: PathBuf,

    /// Pause between uploading an object and downloading it again.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub upload_settle_delay: Duration,

    /// Timeout of a single request to the daemon, or `null` to wait indefinitely.
    ///
    /// # Default
    ///
    /// `null`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Seed for payload sizes and contents. Random if not set.
    pub seed: Option<u64>,

    /// See [`Payload`].
    pub payload: Payload,

    /// See [`Bucket`].
    pub bucket: Bucket,

    /// See [`Readiness`].
    pub readiness: Readiness,

    /// See [`Logging`].
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "http://localhost:5001".into(),
            users: 3,
            objects_per_user: 1,
            output_dir: PathBuf::from("downloads"),
            upload_settle_delay: Duration::from_secs(5),
            request_timeout: None,
            seed: None,
            payload: Payload::default(),
            bucket: Bucket::default(),
            readiness: Readiness::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, the optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.users >= 1, "`users` must be at least 1");
        ensure!(
            self.payload.max_size.as_u64() >= 1,
            "`payload.max_size` must be at least 1 byte"
        );
        ensure!(
            self.bucket.data_shards >= 1,
            "`bucket.data_shards` must be at least 1"
        );
        ensure!(
            self.readiness.max_attempts != Some(0),
            "`readiness.max_attempts` must be at least 1, or null to retry forever"
        );
        Ok(())
    }

    /// Creates the benchmark described by this configuration.
    pub fn benchmark(&self) -> Benchmark {
        let mut builder = Benchmark::builder(&self.output_dir)
            .users(self.users)
            .objects_per_user(self.objects_per_user)
            .max_object_size(self.payload.max_size.as_u64())
            .fixed_sizes(
                self.payload
                    .fixed_sizes
                    .iter()
                    .map(ByteSize::as_u64)
                    .collect::<Vec<_>>(),
            )
            .bucket(BucketSettings {
                name: self.bucket.name.clone(),
                data_shards: self.bucket.data_shards,
                parity_shards: self.bucket.parity_shards,
            })
            .readiness(RetryPolicy {
                interval: self.readiness.interval,
                max_attempts: self.readiness.max_attempts,
            })
            .settle_delay(self.upload_settle_delay);

        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        builder.build()
    }
}
