//! Evasion layer: classified fetch attempts that resemble a human client
//!
//! # Components
//!
//! - `ErrorClass`: the attempt-level error taxonomy driving retry decisions
//! - `Classified`: the outcome of one evasion-wrapped fetch attempt
//! - `EvasionController`: identity selection, rate-limit admission,
//!   humanized delay, hard timeout, and outcome classification around one
//!   adapter call
//! - `CaptchaSolver`: optional challenge-resolution capability

mod controller;

pub use controller::{Admission, EvasionController};

use crate::adapter::AdapterError;
use crate::model::ListingCandidate;
use async_trait::async_trait;

/// Classification of a failed fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bot challenge, block page, or anomalous empty response
    Blocked,

    /// HTTP 429 or a platform-specific throttling signal
    RateLimited,

    /// Valid response with zero matching products; a terminal non-error
    NotFound,

    /// Timeout, connection error, or 5xx; retryable
    Transient,

    /// Response shape did not match the expected schema; terminal,
    /// surfaced for operator attention
    Parse,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Parse => "parse_error",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one evasion-wrapped fetch attempt
#[derive(Debug)]
pub enum Classified {
    /// At least one raw listing came back
    Success(Vec<ListingCandidate>),

    /// The attempt failed with the given classification
    Error(ErrorClass),
}

/// Optional CAPTCHA-resolution capability
///
/// Injected into the evasion controller; absence degrades gracefully to
/// treating challenges as blocked attempts.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Attempts to solve a challenge; returns whether it was solved
    async fn resolve(&self, challenge: &str) -> bool;
}

/// Maps an adapter result onto the attempt taxonomy
///
/// An empty candidate list from a valid response classifies as `NotFound`;
/// adapters signal anomalous empty pages as challenges instead.
pub fn classify(result: Result<Vec<ListingCandidate>, AdapterError>) -> Classified {
    match result {
        Ok(candidates) if candidates.is_empty() => Classified::Error(ErrorClass::NotFound),
        Ok(candidates) => Classified::Success(candidates),
        Err(error) => Classified::Error(classify_error(&error)),
    }
}

fn classify_error(error: &AdapterError) -> ErrorClass {
    match error {
        AdapterError::Challenge { .. } => ErrorClass::Blocked,
        AdapterError::Throttled => ErrorClass::RateLimited,
        AdapterError::Timeout | AdapterError::Connection { .. } => ErrorClass::Transient,
        AdapterError::Parse { .. } => ErrorClass::Parse,
        AdapterError::Http { status } => match status {
            403 | 503 => ErrorClass::Blocked,
            429 => ErrorClass::RateLimited,
            404 => ErrorClass::NotFound,
            500..=599 => ErrorClass::Transient,
            _ => ErrorClass::Transient,
        },
    }
}
