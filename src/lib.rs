//! Pricehound: a price-scraping orchestration engine
//!
//! This crate turns a batch of (product, platform) lookups into normalized
//! price records while surviving anti-bot defenses, rate limits, and partial
//! failures. It is a library-level boundary: platform parsing, persistence,
//! and the API/UI layer plug in through traits.

pub mod adapter;
pub mod config;
pub mod evasion;
pub mod identity;
pub mod limiter;
pub mod model;
pub mod normalize;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod task;

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scrape request is empty: {0}")]
    EmptyRequest(&'static str),

    #[error("No adapter registered for platform: {0}")]
    MissingAdapter(model::Platform),

    #[error("Engine is shutting down")]
    Shutdown,

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid proxy URL: {0}")]
    InvalidProxy(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use adapter::{AdapterError, AdapterRegistry, PlatformAdapter};
pub use config::EngineConfig;
pub use evasion::{CaptchaSolver, ErrorClass};
pub use identity::{Identity, IdentityHealth};
pub use model::{ListingCandidate, Platform, PriceRecord, ProductSpec, ScrapeRequest};
pub use scheduler::Engine;
pub use store::{MemoryStore, ResultStore, StoreError};
pub use task::{SubtaskState, TaskId, TaskState, TaskStatus};
