//! Configuration loading, types, and validation
//!
//! The engine is configured from a single TOML file covering concurrency
//! caps, rate-limit buckets, retry/backoff shape, evasion delays, the
//! identity roster, and normalization thresholds.

mod parser;
mod types;
mod validation;

pub use parser::load_config;
pub use types::{
    EngineConfig, EvasionConfig, IdentityConfig, IdentityEntry, NormalizeConfig, RateLimitConfig,
    RateLimitOverride, RetryConfig, SchedulerConfig, StoreConfig,
};
pub use validation::validate;
