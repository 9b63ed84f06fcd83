use crate::model::Platform;
use serde::Deserialize;

/// Main configuration structure for the engine
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub evasion: EvasionConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Worker pool and concurrency ceilings
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Size of the worker pool; also the global concurrency cap
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Maximum concurrent fetches against any single platform
    #[serde(rename = "per-platform-concurrency")]
    pub per_platform_concurrency: usize,
}

/// Token bucket parameters, with optional per-platform overrides
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Default bucket capacity (burst size)
    pub capacity: f64,

    /// Default refill rate in tokens per second
    #[serde(rename = "refill-per-sec")]
    pub refill_per_sec: f64,

    #[serde(default)]
    pub overrides: Vec<RateLimitOverride>,
}

/// Per-platform override of the default bucket parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitOverride {
    pub platform: Platform,
    pub capacity: f64,
    #[serde(rename = "refill-per-sec")]
    pub refill_per_sec: f64,
}

/// Retry limits and backoff shape
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum fetch attempts per subtask
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Maximum attempts when the platform keeps blocking; never more than
    /// `max_attempts`
    #[serde(rename = "blocked-max-attempts")]
    pub blocked_max_attempts: u32,

    /// Base backoff interval for transient failures (milliseconds)
    #[serde(rename = "base-backoff-ms")]
    pub base_backoff_ms: u64,

    /// Base backoff interval after a rate-limit response (milliseconds)
    #[serde(rename = "rate-limited-backoff-ms")]
    pub rate_limited_backoff_ms: u64,

    /// Backoff ceiling (milliseconds)
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Fraction of the computed delay added as random jitter, in [0, 1]
    #[serde(rename = "jitter-ratio")]
    pub jitter_ratio: f64,
}

/// Human-like delay and attempt timeout settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvasionConfig {
    /// Minimum pause before every adapter call (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the random jitter added to the pause (milliseconds)
    #[serde(rename = "delay-jitter-ms")]
    pub delay_jitter_ms: u64,

    /// Hard timeout for one fetch attempt (milliseconds)
    #[serde(rename = "attempt-timeout-ms")]
    pub attempt_timeout_ms: u64,
}

/// Identity pool health thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Consecutive failures before an identity enters cooldown
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// First cooldown duration; doubles with each further failure (seconds)
    #[serde(rename = "cooldown-base-secs")]
    pub cooldown_base_secs: u64,

    /// Cooldown ceiling (seconds)
    #[serde(rename = "cooldown-cap-secs")]
    pub cooldown_cap_secs: u64,

    /// Minimum cooldown applied when an identity gets blocked (seconds)
    #[serde(rename = "blocked-cooldown-secs")]
    pub blocked_cooldown_secs: u64,
}

/// One network egress identity: proxy endpoint plus user-agent
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEntry {
    /// Proxy URL, or absent for a direct connection
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Platforms this identity may be used against; absent means all
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,
}

/// Normalization pipeline thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    /// Minimum title similarity for a candidate to be kept, in [0, 1]
    #[serde(rename = "match-confidence-threshold")]
    pub match_confidence_threshold: f64,

    /// A price further than this multiple from the reference price is
    /// discarded as an outlier
    #[serde(rename = "price-outlier-multiple")]
    pub price_outlier_multiple: f64,
}

/// Result store retry bound
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Append retries before the owning subtask fails
    #[serde(rename = "append-retries", default = "default_append_retries")]
    pub append_retries: u32,

    /// Delay between append retries (milliseconds)
    #[serde(rename = "append-retry-delay-ms", default = "default_append_retry_delay_ms")]
    pub append_retry_delay_ms: u64,
}

fn default_append_retries() -> u32 {
    3
}

fn default_append_retry_delay_ms() -> u64 {
    250
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            append_retries: default_append_retries(),
            append_retry_delay_ms: default_append_retry_delay_ms(),
        }
    }
}
