//! Platform adapter seam
//!
//! A platform adapter performs one fetch of listing data for one query
//! against one platform, using the identity it is handed. Parsing selectors
//! and DOM structure live entirely inside adapter implementations; the
//! engine only sees listing candidates or a classified error.

use crate::identity::Identity;
use crate::model::{ListingCandidate, Platform, ProductQuery};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of one adapter fetch
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The platform served a bot challenge instead of results; the marker
    /// is the raw challenge token for an optional CAPTCHA solver
    #[error("Bot challenge served: {marker}")]
    Challenge { marker: String },

    /// Platform-specific throttling signal other than HTTP 429
    #[error("Platform throttling detected")]
    Throttled,

    #[error("Response shape did not match expected schema: {message}")]
    Parse { message: String },
}

/// One fetch of listing data for one query on one platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// The platform this adapter serves
    fn platform(&self) -> Platform;

    /// Fetches listing candidates for the query using the given identity
    ///
    /// Implementations must return `Ok(vec![])` for a valid response with
    /// zero matching products; an anomalous empty page is a
    /// [`AdapterError::Challenge`] instead.
    async fn fetch(
        &self,
        query: &ProductQuery,
        identity: &Identity,
    ) -> Result<Vec<ListingCandidate>, AdapterError>;
}

/// Mapping from platform to its adapter implementation
///
/// Built once before the engine starts and never mutated afterwards;
/// adding a platform means registering one more adapter here.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under its own platform, replacing any previous
    /// registration for that platform
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.adapters.contains_key(&platform)
    }
}

/// Builds an HTTP client bound to one identity
///
/// Adapter implementations call this so every request they make carries the
/// identity's user-agent and egresses through its proxy.
///
/// # Arguments
///
/// * `identity` - The identity to bind the client to
/// * `timeout` - Per-request timeout
pub fn build_http_client(
    identity: &Identity,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(identity.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &identity.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}
