use crate::adapter::{AdapterError, AdapterRegistry};
use crate::config::EvasionConfig;
use crate::evasion::{classify, CaptchaSolver, Classified, ErrorClass};
use crate::identity::{IdentityLease, IdentityOutcome, IdentityPool};
use crate::limiter::RateLimiter;
use crate::model::{ListingCandidate, Platform, ProductQuery};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Result of the admission phase preceding one fetch attempt
///
/// A refused admission is not a failure of the subtask: the scheduler
/// re-queues it without consuming an attempt.
#[derive(Debug)]
pub enum Admission {
    Granted(IdentityLease),
    NoIdentity,
    NoToken,
}

/// Wraps one adapter call so the interaction resembles a human client
///
/// Responsibilities per attempt: select an identity, take a rate-limit
/// token, pause for a randomized human-like delay, invoke the adapter
/// under a hard timeout, classify the result, and report the outcome back
/// to the identity pool and rate limiter.
pub struct EvasionController {
    pool: Arc<IdentityPool>,
    limiter: Arc<RateLimiter>,
    registry: Arc<AdapterRegistry>,
    captcha: Option<Arc<dyn CaptchaSolver>>,
    config: EvasionConfig,
}

impl EvasionController {
    pub fn new(
        pool: Arc<IdentityPool>,
        limiter: Arc<RateLimiter>,
        registry: Arc<AdapterRegistry>,
        captcha: Option<Arc<dyn CaptchaSolver>>,
        config: EvasionConfig,
    ) -> Self {
        Self {
            pool,
            limiter,
            registry,
            captcha,
            config,
        }
    }

    /// Tries to admit one fetch attempt for a platform
    ///
    /// Acquires an identity first, then a rate-limit token. When the token
    /// is refused the identity goes straight back to the pool with a
    /// neutral outcome so its health is unaffected.
    pub fn admit(&self, platform: Platform) -> Admission {
        let lease = match self.pool.acquire(platform) {
            Some(lease) => lease,
            None => return Admission::NoIdentity,
        };

        if self.limiter.try_acquire(platform) {
            Admission::Granted(lease)
        } else {
            self.pool.release(lease, IdentityOutcome::Neutral);
            Admission::NoToken
        }
    }

    /// Returns an admitted identity without running an attempt
    ///
    /// Used when the subtask turns out to be stale (e.g. cancelled) after
    /// admission was granted.
    pub fn abort(&self, lease: IdentityLease) {
        self.pool.release(lease, IdentityOutcome::Neutral);
    }

    /// Executes one admitted fetch attempt end to end
    ///
    /// Sleeps the humanized delay, invokes the adapter under the attempt
    /// timeout, optionally runs the CAPTCHA solver on a challenge, then
    /// classifies the outcome, releases the identity with it, and penalizes
    /// the platform bucket on a rate-limit signal.
    pub async fn execute(
        &self,
        lease: IdentityLease,
        platform: Platform,
        query: &ProductQuery,
    ) -> Classified {
        tokio::time::sleep(self.humanized_delay()).await;

        let mut result = self.invoke(platform, &lease, query).await;

        // One solver pass per attempt; absence degrades to Blocked
        if let Err(AdapterError::Challenge { marker }) = &result {
            if let Some(solver) = &self.captcha {
                tracing::debug!("Running CAPTCHA solver for platform {}", platform);
                if solver.resolve(marker).await {
                    result = self.invoke(platform, &lease, query).await;
                }
            }
        }

        let classified = classify(result);

        match &classified {
            Classified::Success(_) => self.pool.release(lease, IdentityOutcome::Success),
            Classified::Error(ErrorClass::NotFound) => {
                self.pool.release(lease, IdentityOutcome::Success)
            }
            Classified::Error(ErrorClass::Blocked) => {
                self.pool.release(lease, IdentityOutcome::Blocked)
            }
            Classified::Error(ErrorClass::RateLimited) => {
                self.pool.release(lease, IdentityOutcome::Failure);
                self.limiter.penalize(platform);
            }
            Classified::Error(_) => self.pool.release(lease, IdentityOutcome::Failure),
        }

        classified
    }

    async fn invoke(
        &self,
        platform: Platform,
        lease: &IdentityLease,
        query: &ProductQuery,
    ) -> Result<Vec<ListingCandidate>, AdapterError> {
        let adapter = match self.registry.get(platform) {
            Some(adapter) => adapter,
            None => {
                // The engine validates registrations at submit time; a miss
                // here means the registry drifted underneath us
                return Err(AdapterError::Parse {
                    message: format!("no adapter registered for {}", platform),
                });
            }
        };

        let timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        match tokio::time::timeout(timeout, adapter.fetch(query, &lease.identity)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout),
        }
    }

    /// Randomized pause before the adapter call: a minimum floor plus
    /// uniform jitter
    fn humanized_delay(&self) -> Duration {
        let jitter = if self.config.delay_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.delay_jitter_ms)
        };
        Duration::from_millis(self.config.min_delay_ms + jitter)
    }
}
