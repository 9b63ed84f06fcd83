use crate::config::{IdentityConfig, IdentityEntry};
use crate::model::Platform;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A network egress identity handed to one fetch attempt at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Proxy URL, or None for a direct connection
    pub proxy: Option<String>,
    pub user_agent: String,
}

/// Exclusive hold on one identity, returned by [`IdentityPool::acquire`]
///
/// The lease must be given back through [`IdentityPool::release`]; the pool
/// will not hand the same identity to another caller until then.
#[derive(Debug)]
pub struct IdentityLease {
    pub(crate) slot: usize,
    pub identity: Identity,
}

/// Outcome of the fetch attempt an identity was used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// The attempt completed normally
    Success,

    /// The attempt failed for reasons attributable to the identity
    /// (timeouts, throttling, connection errors)
    Failure,

    /// The platform served a bot challenge to this identity
    Blocked,

    /// The identity was never used (admission was refused downstream)
    Neutral,
}

/// Health snapshot of one identity, for status reporting and tests
#[derive(Debug, Clone)]
pub struct IdentityHealth {
    pub user_agent: String,
    pub successes: u64,
    pub failures: u64,
    pub in_use: bool,
    pub cooling_down: bool,
}

struct Slot {
    identity: Identity,
    platforms: Option<Vec<Platform>>,
    in_use: bool,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    last_used: Option<Instant>,
}

impl Slot {
    fn eligible(&self, platform: Platform) -> bool {
        match &self.platforms {
            Some(allowed) => allowed.contains(&platform),
            None => true,
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }

    fn failure_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }
}

/// Pool of identities with synchronized acquire/release and health scoring
///
/// Selection prefers the identity with the lowest recent failure rate;
/// ties go to the least-recently-used one. Identities in cooldown or
/// already held by another fetch are never returned.
pub struct IdentityPool {
    slots: Mutex<Vec<Slot>>,
    config: IdentityConfig,
}

impl IdentityPool {
    pub fn new(entries: &[IdentityEntry], config: IdentityConfig) -> Self {
        let slots = entries
            .iter()
            .map(|entry| Slot {
                identity: Identity {
                    proxy: entry.proxy.clone(),
                    user_agent: entry.user_agent.clone(),
                },
                platforms: entry.platforms.clone(),
                in_use: false,
                successes: 0,
                failures: 0,
                consecutive_failures: 0,
                cooldown_until: None,
                last_used: None,
            })
            .collect();

        Self {
            slots: Mutex::new(slots),
            config,
        }
    }

    /// Acquires the healthiest eligible identity for a platform
    ///
    /// Returns None when every eligible identity is in use or cooling
    /// down; callers treat that as a transient condition and re-queue.
    pub fn acquire(&self, platform: Platform) -> Option<IdentityLease> {
        self.acquire_at(platform, Instant::now())
    }

    pub(crate) fn acquire_at(&self, platform: Platform, now: Instant) -> Option<IdentityLease> {
        let mut slots = self.slots.lock().unwrap();

        let mut best: Option<usize> = None;
        for (index, slot) in slots.iter().enumerate() {
            if slot.in_use || !slot.eligible(platform) || slot.cooling_down(now) {
                continue;
            }

            best = match best {
                None => Some(index),
                Some(current) => {
                    let challenger = &slots[index];
                    let incumbent = &slots[current];
                    let better = match challenger
                        .failure_rate()
                        .partial_cmp(&incumbent.failure_rate())
                    {
                        Some(std::cmp::Ordering::Less) => true,
                        Some(std::cmp::Ordering::Greater) => false,
                        // Tie: least-recently-used wins; never-used counts as oldest
                        _ => challenger.last_used < incumbent.last_used,
                    };
                    Some(if better { index } else { current })
                }
            };
        }

        let index = best?;
        let slot = &mut slots[index];
        slot.in_use = true;
        slot.last_used = Some(now);

        Some(IdentityLease {
            slot: index,
            identity: slot.identity.clone(),
        })
    }

    /// Returns a lease and folds the attempt outcome into the identity's
    /// health state
    pub fn release(&self, lease: IdentityLease, outcome: IdentityOutcome) {
        self.release_at(lease, outcome, Instant::now());
    }

    pub(crate) fn release_at(&self, lease: IdentityLease, outcome: IdentityOutcome, now: Instant) {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[lease.slot];
        slot.in_use = false;

        match outcome {
            IdentityOutcome::Neutral => {}
            IdentityOutcome::Success => {
                slot.successes += 1;
                slot.consecutive_failures = 0;
            }
            IdentityOutcome::Failure => {
                slot.failures += 1;
                slot.consecutive_failures += 1;
                if slot.consecutive_failures >= self.config.failure_threshold {
                    let cooldown = self.cooldown_for(slot.consecutive_failures);
                    slot.cooldown_until = Some(now + cooldown);
                    tracing::warn!(
                        "Identity entering cooldown for {:?} after {} consecutive failures",
                        cooldown,
                        slot.consecutive_failures
                    );
                }
            }
            IdentityOutcome::Blocked => {
                slot.failures += 1;
                slot.consecutive_failures += 1;
                // A challenge means the identity is burned for a while
                // regardless of its streak
                let cooldown = self
                    .cooldown_for(slot.consecutive_failures.max(self.config.failure_threshold))
                    .max(Duration::from_secs(self.config.blocked_cooldown_secs));
                slot.cooldown_until = Some(now + cooldown);
                tracing::warn!(
                    "Identity blocked by platform, cooling down for {:?}",
                    cooldown
                );
            }
        }
    }

    /// Cooldown duration for a failure streak: exponential from the base,
    /// doubling past the threshold, capped
    fn cooldown_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(self.config.failure_threshold);
        let base = self.config.cooldown_base_secs;
        let secs = base.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        Duration::from_secs(secs.min(self.config.cooldown_cap_secs))
    }

    /// Number of configured identities
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Health snapshot of every identity
    pub fn snapshot(&self) -> Vec<IdentityHealth> {
        let now = Instant::now();
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .map(|slot| IdentityHealth {
                user_agent: slot.identity.user_agent.clone(),
                successes: slot.successes,
                failures: slot.failures,
                in_use: slot.in_use,
                cooling_down: slot.cooling_down(now),
            })
            .collect()
    }
}
