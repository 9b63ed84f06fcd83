//! Concurrency scheduler: platform queues, worker pool, and the engine
//! surface
//!
//! This module handles:
//! - Fan-out of scrape requests into per-platform subtasks
//! - Round-robin job selection under per-platform concurrency caps
//! - Delayed re-entry for backoffs and admission deferrals
//! - The public submit / status / cancel / shutdown surface

mod engine;
mod queue;

pub use engine::Engine;
pub use queue::{Job, QueueState};
