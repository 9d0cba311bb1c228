//! Configuration types for http-dl

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for [`HttpDownloader`](crate::HttpDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`http`](HttpConfig) — transport timeouts and identification
/// - [`retry`](RetryConfig) — backoff behavior for transient segment failures
/// - [`persistence`](PersistenceConfig) — segment store location
///
/// Per-download knobs (mode, segment count, worker count, resume) live on
/// [`DownloadRequest`](crate::DownloadRequest) instead.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry behavior for transient segment failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Segment store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// HTTP transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Overall deadline per segment request, None = unlimited (default: 300 seconds)
    #[serde(default = "default_request_timeout", with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per segment (default: 3)
    ///
    /// A segment facing M consecutive transient failures fails terminally
    /// iff M exceeds this value; the initial attempt is not counted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Copy of this policy with a different retry budget
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self.clone()
        }
    }
}

/// Segment store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// File name of the segment store inside the destination directory
    /// (default: ".http-dl-segments.db")
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            manifest_name: default_manifest_name(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_user_agent() -> String {
    concat!("http-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_manifest_name() -> String {
    ".http-dl-segments.db".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
