//! Integration tests for the scraping engine
//!
//! These tests wire scripted adapters and in-memory stores into a real
//! engine and exercise the full submit -> fetch -> normalize -> store
//! cycle, including retries, blocks, rate limits, and cancellation.

use async_trait::async_trait;
use pricehound::config::{
    EngineConfig, EvasionConfig, IdentityConfig, IdentityEntry, NormalizeConfig, RateLimitConfig,
    RetryConfig, SchedulerConfig, StoreConfig,
};
use pricehound::store::StoreResult;
use pricehound::task::TaskId;
use pricehound::{
    AdapterError, AdapterRegistry, CaptchaSolver, Engine, Identity, ListingCandidate, MemoryStore,
    Platform, PlatformAdapter, PriceRecord, ProductSpec, ResultStore, ScrapeRequest, StoreError,
    TaskState, TaskStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted adapter response; the last step repeats once the script
/// runs out
enum Step {
    Listings(Vec<ListingCandidate>),
    Empty,
    Challenge,
    ConnectionReset,
}

struct ScriptedAdapter {
    platform: Platform,
    calls: AtomicUsize,
    script: Vec<Step>,
    delay: Duration,
}

impl ScriptedAdapter {
    fn new(platform: Platform, script: Vec<Step>) -> Self {
        Self {
            platform,
            calls: AtomicUsize::new(0),
            script,
            delay: Duration::ZERO,
        }
    }

    fn with_delay(platform: Platform, script: Vec<Step>, delay: Duration) -> Self {
        Self {
            platform,
            calls: AtomicUsize::new(0),
            script,
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch(
        &self,
        _query: &pricehound::model::ProductQuery,
        _identity: &Identity,
    ) -> Result<Vec<ListingCandidate>, AdapterError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .expect("script is never empty");
        match step {
            Step::Listings(items) => Ok(items.clone()),
            Step::Empty => Ok(vec![]),
            Step::Challenge => Err(AdapterError::Challenge {
                marker: "px-captcha".to_string(),
            }),
            Step::ConnectionReset => Err(AdapterError::Connection {
                message: "connection reset by peer".to_string(),
            }),
        }
    }
}

struct AlwaysSolves;

#[async_trait]
impl CaptchaSolver for AlwaysSolves {
    async fn resolve(&self, _challenge: &str) -> bool {
        true
    }
}

/// Store that fails a fixed number of appends before behaving
struct FlakyStore {
    inner: MemoryStore,
    failures_remaining: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_remaining: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn append(&self, records: &[PriceRecord]) -> StoreResult<()> {
        let left = self.failures_remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_remaining.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("store is warming up".to_string()));
        }
        self.inner.append(records).await
    }
}

struct BrokenStore;

#[async_trait]
impl ResultStore for BrokenStore {
    async fn append(&self, _records: &[PriceRecord]) -> StoreResult<()> {
        Err(StoreError::Unavailable("store is down".to_string()))
    }
}

fn test_config(identities: usize) -> EngineConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    EngineConfig {
        scheduler: SchedulerConfig {
            max_workers: 4,
            per_platform_concurrency: 2,
        },
        rate_limit: RateLimitConfig {
            capacity: 50.0,
            refill_per_sec: 100.0,
            overrides: vec![],
        },
        retry: RetryConfig {
            max_attempts: 3,
            blocked_max_attempts: 2,
            base_backoff_ms: 20,
            rate_limited_backoff_ms: 20,
            max_backoff_ms: 200,
            jitter_ratio: 0.0,
        },
        evasion: EvasionConfig {
            min_delay_ms: 0,
            delay_jitter_ms: 0,
            attempt_timeout_ms: 2000,
        },
        identity: IdentityConfig {
            failure_threshold: 3,
            cooldown_base_secs: 60,
            cooldown_cap_secs: 3600,
            blocked_cooldown_secs: 600,
        },
        identities: (0..identities)
            .map(|index| IdentityEntry {
                proxy: None,
                user_agent: format!("PricehoundTest/1.{}", index),
                platforms: None,
            })
            .collect(),
        normalize: NormalizeConfig {
            match_confidence_threshold: 0.6,
            price_outlier_multiple: 10.0,
        },
        store: StoreConfig {
            append_retries: 2,
            append_retry_delay_ms: 10,
        },
    }
}

fn mug() -> ProductSpec {
    ProductSpec {
        gtin: "00012345678905".to_string(),
        brand: "Acme".to_string(),
        description: "travel mug".to_string(),
        reference_price: Some(25.0),
    }
}

fn mug_listing(price_text: &str) -> ListingCandidate {
    ListingCandidate {
        title: "Acme travel mug".to_string(),
        price_text: price_text.to_string(),
        currency: None,
        rating: Some(4.5),
        url: "https://example.com/item/42".to_string(),
        metadata: vec![],
    }
}

fn request(products: Vec<ProductSpec>, platforms: Vec<Platform>) -> ScrapeRequest {
    ScrapeRequest {
        products,
        platforms,
        max_results_per_platform: 5,
    }
}

async fn wait_terminal(engine: &Engine, task: TaskId) -> TaskStatus {
    for _ in 0..1000 {
        if let Some(status) = engine.status(task) {
            if status.state != TaskState::Running {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not reach a terminal state in time", task);
}

#[tokio::test]
async fn test_two_platform_request_completes_with_records() {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Listings(vec![mug_listing("$24.99")])],
    )));
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Ebay,
        vec![Step::Listings(vec![mug_listing("$22.50")])],
    )));

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(2),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon, Platform::Ebay]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 2);
    assert_eq!(status.per_platform[&Platform::Amazon].succeeded, 1);
    assert_eq!(status.per_platform[&Platform::Ebay].succeeded, 1);
    assert!(status.completed_at.is_some());

    let records = store.records();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.gtin, "00012345678905");
        assert_eq!(record.currency, "USD");
        assert!(record.price > 0.0);
        assert!(record.confidence >= 0.6);
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_zero_results_is_success_not_failure() {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Walmart,
        vec![Step::Empty],
    )));

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(1),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Walmart]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 0);
    assert_eq!(status.per_platform[&Platform::Walmart].succeeded, 1);
    assert!(store.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_outlier_prices_complete_with_zero_records() {
    // 50x the reference price: every candidate is discarded, but the
    // subtask still succeeded
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Listings(vec![mug_listing("$1,250.00")])],
    )));

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(1),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 0);
    assert!(store.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_transient_error_retries_then_succeeds() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Platform::Ebay,
        vec![
            Step::ConnectionReset,
            Step::Listings(vec![mug_listing("$24.99")]),
        ],
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(2),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Ebay]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 1);
    assert_eq!(adapter.calls(), 2);
    assert_eq!(store.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_persistent_block_fails_task_and_burns_identities() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Challenge],
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    // Enough identities that every blocked attempt gets a fresh one
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(3),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.records, 0);
    assert_eq!(status.per_platform[&Platform::Amazon].failed, 1);
    assert!(store.is_empty());

    // blocked-max-attempts is 2, so exactly two attempts ran and the
    // identities they used are cooling down
    assert_eq!(adapter.calls(), 2);
    let health = engine.identity_health();
    assert_eq!(health.iter().filter(|h| h.cooling_down).count(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_captcha_solver_recovers_challenge_in_one_attempt() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Challenge, Step::Listings(vec![mug_listing("$24.99")])],
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(1),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        Some(Arc::new(AlwaysSolves)),
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    // The solver resolved the challenge inside the attempt, so no
    // identity was burned
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 1);
    assert_eq!(adapter.calls(), 2);
    assert!(engine.identity_health().iter().all(|h| !h.cooling_down));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rate_limited_bucket_defers_rather_than_fails() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Platform::GoogleShopping,
        vec![Step::Listings(vec![mug_listing("$24.99")])],
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    // A one-token bucket: the fan-out drains it immediately and the rest
    // of the subtasks must wait for refill
    let mut config = test_config(4);
    config.rate_limit.capacity = 1.0;
    config.rate_limit.refill_per_sec = 20.0;

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        config,
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let products = vec![mug(), mug(), mug()];
    let task = engine
        .submit(request(products, vec![Platform::GoogleShopping]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.per_platform[&Platform::GoogleShopping].succeeded, 3);
    assert_eq!(store.len(), 3);
    // Deferred admissions consumed no attempts, so each subtask fetched
    // exactly once
    assert_eq!(adapter.calls(), 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_fails_queued_subtasks_but_not_in_flight() {
    let adapter = Arc::new(ScriptedAdapter::with_delay(
        Platform::Amazon,
        vec![Step::Listings(vec![mug_listing("$24.99")])],
        Duration::from_millis(300),
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    // A single worker: one subtask in flight, the other two queued
    let mut config = test_config(1);
    config.scheduler.max_workers = 1;
    config.scheduler.per_platform_concurrency = 1;

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        config,
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug(), mug(), mug()], vec![Platform::Amazon]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.cancel(task));

    let status = wait_terminal(&engine, task).await;

    // The in-flight attempt ran to completion and its record counts; the
    // two queued subtasks were cancelled
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 1);
    assert_eq!(status.per_platform[&Platform::Amazon].succeeded, 1);
    assert_eq!(status.per_platform[&Platform::Amazon].failed, 2);
    assert_eq!(store.len(), 1);
    assert_eq!(adapter.calls(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_flaky_store_append_is_retried() {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Listings(vec![mug_listing("$24.99")])],
    )));

    // Two failures, then the append lands; append-retries is 2
    let store = Arc::new(FlakyStore::new(2));
    let engine = Engine::start(
        test_config(1),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.records, 1);
    assert_eq!(store.inner.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_store_fails_the_subtask() {
    let adapter = Arc::new(ScriptedAdapter::new(
        Platform::Amazon,
        vec![Step::Listings(vec![mug_listing("$24.99")])],
    ));
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::clone(&adapter) as Arc<dyn PlatformAdapter>);

    let engine = Engine::start(test_config(1), registry, Arc::new(BrokenStore), None).unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Amazon]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(status.records, 0);
    // The fetch itself succeeded once; the store failure is not a reason
    // to hit the platform again
    assert_eq!(adapter.calls(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_european_price_format_normalizes() {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(ScriptedAdapter::new(
        Platform::Ebay,
        vec![Step::Listings(vec![mug_listing("23,99 €")])],
    )));

    let store = Arc::new(MemoryStore::new());
    let engine = Engine::start(
        test_config(1),
        registry,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        None,
    )
    .unwrap();

    let task = engine
        .submit(request(vec![mug()], vec![Platform::Ebay]))
        .unwrap();
    let status = wait_terminal(&engine, task).await;

    assert_eq!(status.state, TaskState::Completed);
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert!((records[0].price - 23.99).abs() < 1e-9);
    assert_eq!(records[0].currency, "EUR");

    engine.shutdown().await;
}
