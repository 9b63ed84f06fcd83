//! Identity pool: proxy + user-agent pairs with health tracking
//!
//! All identity health state lives inside [`IdentityPool`]; no other
//! component touches it. Callers acquire an identity for one fetch attempt
//! and release it with the attempt's outcome, which drives failure streaks
//! and cooldowns.

mod pool;

pub use pool::{Identity, IdentityHealth, IdentityLease, IdentityOutcome, IdentityPool};
