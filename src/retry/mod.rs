//! Retry policy: decides whether and when a failed attempt is retried
//!
//! The policy is a pure function of (error class, attempts so far) plus
//! configuration. Delay comes back as data; the scheduler re-queues the
//! subtask with a ready-at timestamp instead of parking a worker.

use crate::config::RetryConfig;
use crate::evasion::ErrorClass;
use crate::task::FailureReason;
use rand::Rng;
use std::time::Duration;

/// What the scheduler should do with a failed subtask attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-attempt after the given backoff delay
    Retry { delay: Duration },

    /// Give up; the subtask is terminal with this reason
    Fail { reason: FailureReason },
}

/// Per-class retry limits and exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Decides the fate of a subtask whose latest attempt failed with
    /// `class` after `attempts` total attempts
    pub fn decide(&self, class: ErrorClass, attempts: u32) -> Decision {
        match class {
            ErrorClass::Parse => Decision::Fail {
                reason: FailureReason::Parse,
            },

            // NotFound is terminal success; the scheduler resolves it
            // before consulting the policy
            ErrorClass::NotFound => Decision::Fail {
                reason: FailureReason::Exhausted,
            },

            ErrorClass::Blocked => {
                if attempts >= self.config.blocked_max_attempts {
                    Decision::Fail {
                        reason: FailureReason::PersistentBlock,
                    }
                } else {
                    Decision::Retry {
                        delay: self.backoff(class, attempts),
                    }
                }
            }

            ErrorClass::Transient | ErrorClass::RateLimited => {
                if attempts >= self.config.max_attempts {
                    Decision::Fail {
                        reason: FailureReason::Exhausted,
                    }
                } else {
                    Decision::Retry {
                        delay: self.backoff(class, attempts),
                    }
                }
            }
        }
    }

    /// Backoff before attempt `attempts + 1`: base doubled per prior
    /// attempt, capped, with uniform jitter on top
    fn backoff(&self, class: ErrorClass, attempts: u32) -> Duration {
        let base_ms = match class {
            ErrorClass::RateLimited => self.config.rate_limited_backoff_ms,
            _ => self.config.base_backoff_ms,
        };

        let exponent = attempts.saturating_sub(1);
        let grown = base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        let capped = grown.min(self.config.max_backoff_ms);

        let jitter_bound = (capped as f64 * self.config.jitter_ratio) as u64;
        let jitter = if jitter_bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_bound)
        };

        Duration::from_millis(capped + jitter)
    }
}
