//! Client SDK for EAMP metadata servers.
//!
//! [`EampClient`] wraps a [`Transport`] with:
//!
//! - **Caching**: fetched records are kept in a [`TtlCache`] and served
//!   locally until they expire
//! - **Timeouts**: every remote call is bounded by [`ClientOptions::timeout`]
//! - **Error classification**: HTTP statuses and transport failures map
//!   into exactly one [`EampError`] variant (see [`classify`])
//! - **Subscriptions**: a local registry of update callbacks, fanned out
//!   through [`EampClient::dispatch`]
//!
//! # Example
//!
//! ```rust,ignore
//! let client = EampClient::new(ClientOptions::new("https://eamp.example.com/v1"));
//! let chart = client.fetch("chart-2024").await?;
//! client.close().await;
//! ```

pub mod classify;
pub mod transport;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::clock::Clock;
use crate::error::{EampError, EampResult};
use crate::metrics;
use crate::models::{Metadata, MetadataFilter, MetadataUpdate};
use crate::validation::validate_resource_id;

pub use transport::{HttpTransport, Transport, TransportFailure, TransportResponse};

/// Default remote call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a cached record.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

const METADATA_PATH: &str = "metadata";

/// Update callback. Errors are logged and reported, never propagated.
///
/// A panicking callback is reported as a failure like an `Err`. Builds with
/// `panic = "abort"` (the release profile) still abort the process.
pub type UpdateCallback = Arc<dyn Fn(&MetadataUpdate) -> anyhow::Result<()> + Send + Sync>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub user_agent: Option<String>,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            user_agent: Some(format!("eamp-gateway/{}", env!("CARGO_PKG_VERSION"))),
            headers: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }
}

/// Outcome of fanning an update out to its subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Error messages of the callbacks that failed, in invocation order.
    pub failures: Vec<String>,
}

impl DispatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Cached, timeout-bounded client for an EAMP metadata server.
///
/// All operations take `&self`; overlapping fetches from one client are fine.
pub struct EampClient<T: Transport = HttpTransport> {
    transport: T,
    options: ClientOptions,
    cache: Option<TtlCache<Metadata>>,
    subscriptions: DashMap<String, Vec<UpdateCallback>>,
}

impl EampClient<HttpTransport> {
    /// Create a client over HTTP. No connection is made until the first call.
    pub fn new(options: ClientOptions) -> Self {
        let transport = HttpTransport::new(&options);
        Self::with_transport(options, transport)
    }
}

impl<T: Transport> EampClient<T> {
    pub fn with_transport(options: ClientOptions, transport: T) -> Self {
        let cache = options
            .cache_enabled
            .then(|| TtlCache::new("client", options.cache_ttl));
        Self {
            transport,
            options,
            cache,
            subscriptions: DashMap::new(),
        }
    }

    /// Like [`with_transport`](Self::with_transport) with an explicit cache clock.
    pub fn with_transport_and_clock(
        options: ClientOptions,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = options
            .cache_enabled
            .then(|| TtlCache::with_clock("client", options.cache_ttl, clock));
        Self {
            transport,
            options,
            cache,
            subscriptions: DashMap::new(),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch a record, serving it from the cache when fresh.
    #[instrument(skip(self))]
    pub async fn fetch(&self, resource_id: &str) -> EampResult<Metadata> {
        validate_resource_id(resource_id)?;

        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(resource_id)
        {
            debug!("Cache hit");
            metrics::record_client_fetch("cached");
            return Ok(hit);
        }

        self.fetch_and_cache(resource_id).await
    }

    /// Remote fetch that stores a successful result. Never reads the cache.
    async fn fetch_and_cache(&self, resource_id: &str) -> EampResult<Metadata> {
        let started = Instant::now();
        let result = self.fetch_remote(resource_id).await;
        metrics::record_fetch_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(metadata) => {
                metrics::record_client_fetch("ok");
                if let Some(cache) = &self.cache {
                    cache.set(resource_id.to_string(), metadata.clone(), None);
                    debug!("Cached metadata");
                }
                Ok(metadata)
            }
            Err(e) => {
                metrics::record_client_fetch(e.code());
                warn!(error = %e, code = e.code(), "Fetch failed");
                Err(e)
            }
        }
    }

    /// Drop any cached copy and fetch again. Always makes a remote call,
    /// even if another task refills the cache meanwhile.
    ///
    /// When the resource is subscribed, its subscribers receive a
    /// `"refreshed"` update with the new record.
    #[instrument(skip(self))]
    pub async fn refresh(&self, resource_id: &str) -> EampResult<Metadata> {
        validate_resource_id(resource_id)?;

        if let Some(cache) = &self.cache {
            cache.delete(resource_id);
        }

        let metadata = self.fetch_and_cache(resource_id).await?;

        if self.is_subscribed(resource_id) {
            let update =
                MetadataUpdate::new(resource_id, "refreshed").with_metadata(metadata.clone());
            self.dispatch(resource_id, &update);
        }

        Ok(metadata)
    }

    /// List records matching `filter`. Never cached.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: Option<&MetadataFilter>) -> EampResult<Vec<Metadata>> {
        let query = filter.map(MetadataFilter::to_query).unwrap_or_default();
        let response = self.request(&[METADATA_PATH], &query).await?;

        if let Some(err) = classify::classify_status(&response, None) {
            return Err(err);
        }

        let items: Vec<serde_json::Value> = serde_json::from_slice(&response.body)
            .map_err(|_| EampError::validation("Expected list of metadata objects"))?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|e| EampError::validation(format!("Invalid metadata format: {e}")))
            })
            .collect()
    }

    async fn fetch_remote(&self, resource_id: &str) -> EampResult<Metadata> {
        let response = self.request(&[METADATA_PATH, resource_id], &[]).await?;

        if let Some(err) = classify::classify_status(&response, Some(resource_id)) {
            return Err(err);
        }

        classify::parse_body(&response)
    }

    /// One remote call bounded by the configured timeout.
    async fn request(
        &self,
        segments: &[&str],
        query: &[(String, String)],
    ) -> EampResult<TransportResponse> {
        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, self.transport.get(segments, query)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(failure)) => Err(classify::classify_failure(
                failure,
                self.transport.name(),
                timeout,
            )),
            Err(_) => Err(EampError::Timeout { timeout }),
        }
    }

    /// Register `callback` for updates of `resource_id`.
    ///
    /// Registering the same callback twice delivers each update twice.
    pub fn subscribe(&self, resource_id: &str, callback: UpdateCallback) -> EampResult<()> {
        validate_resource_id(resource_id)?;
        self.subscriptions
            .entry(resource_id.to_string())
            .or_default()
            .push(callback);
        info!(resource_id, "Subscribed to updates");
        Ok(())
    }

    /// Remove one registration of `callback`, or every callback when `None`.
    ///
    /// Returns whether anything was removed. Removing the last callback
    /// unsubscribes the resource.
    pub fn unsubscribe(&self, resource_id: &str, callback: Option<&UpdateCallback>) -> bool {
        let removed = match callback {
            None => self.subscriptions.remove(resource_id).is_some(),
            Some(callback) => {
                let mut removed = false;
                // remove_if holds the shard lock, so emptying the list and
                // dropping the entry happen together
                self.subscriptions.remove_if_mut(resource_id, |_, callbacks| {
                    if let Some(pos) = callbacks.iter().position(|c| Arc::ptr_eq(c, callback)) {
                        callbacks.remove(pos);
                        removed = true;
                    }
                    callbacks.is_empty()
                });
                removed
            }
        };

        if removed {
            info!(resource_id, "Unsubscribed from updates");
        }
        removed
    }

    pub fn unsubscribe_all(&self) {
        self.subscriptions.clear();
        info!("Unsubscribed from all updates");
    }

    pub fn is_subscribed(&self, resource_id: &str) -> bool {
        self.subscriptions
            .get(resource_id)
            .is_some_and(|callbacks| !callbacks.is_empty())
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.iter().map(|e| e.key().clone()).collect()
    }

    /// Deliver `update` to every callback registered for `resource_id`.
    ///
    /// Callbacks run on a snapshot of the registry, so they may subscribe or
    /// unsubscribe without deadlocking. A failing callback is logged and
    /// the rest still run. When the update carries metadata it replaces the
    /// cached record.
    pub fn dispatch(&self, resource_id: &str, update: &MetadataUpdate) -> DispatchReport {
        let snapshot: Vec<UpdateCallback> = self
            .subscriptions
            .get(resource_id)
            .map(|callbacks| callbacks.value().clone())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for callback in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(update)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))));
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(resource_id, error = %e, "Update callback failed");
                    metrics::record_callback_failure();
                    report.failures.push(e.to_string());
                }
            }
        }

        if let Some(metadata) = &update.metadata
            && let Some(cache) = &self.cache
        {
            cache.set(resource_id.to_string(), metadata.clone(), None);
        }

        debug!(
            resource_id,
            delivered = report.delivered,
            failed = report.failed(),
            "Update dispatched"
        );
        report
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Cache cleared");
        }
    }

    /// `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(TtlCache::stats)
    }

    /// Unsubscribe everything, release the transport and clear the cache.
    pub async fn close(&self) {
        self.unsubscribe_all();
        self.transport.close().await;
        self.clear_cache();
        info!("Client closed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("callback panicked: {detail}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::fixtures;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always answers with the same response and counts calls.
    struct FixedTransport {
        response: TransportResponse,
        calls: AtomicUsize,
    }

    impl FixedTransport {
        fn new(response: TransportResponse) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for FixedTransport {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn get(
            &self,
            _segments: &[&str],
            _query: &[(String, String)],
        ) -> Result<TransportResponse, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        async fn close(&self) {}
    }

    fn chart_client() -> EampClient<FixedTransport> {
        let body = serde_json::to_vec(&fixtures::chart("c1")).unwrap();
        EampClient::with_transport(
            ClientOptions::new("http://unused"),
            FixedTransport::new(TransportResponse::new(200, body)),
        )
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let client = chart_client();

        client.fetch("c1").await.unwrap();
        client.fetch("c1").await.unwrap();

        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_calls_remote() {
        let body = serde_json::to_vec(&fixtures::chart("c1")).unwrap();
        let client = EampClient::with_transport(
            ClientOptions {
                cache_enabled: false,
                ..ClientOptions::new("http://unused")
            },
            FixedTransport::new(TransportResponse::new(200, body)),
        );

        client.fetch("c1").await.unwrap();
        client.fetch("c1").await.unwrap();

        assert_eq!(client.transport().calls(), 2);
        assert!(client.cache_stats().is_none());
    }

    #[tokio::test]
    async fn test_empty_id_never_reaches_transport() {
        let client = chart_client();

        let err = client.fetch("").await.unwrap_err();

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(client.transport().calls(), 0);
    }

    #[test]
    fn test_unsubscribe_specific_callback() {
        let client = chart_client();
        let a: UpdateCallback = Arc::new(|_: &MetadataUpdate| -> anyhow::Result<()> { Ok(()) });
        let b: UpdateCallback = Arc::new(|_: &MetadataUpdate| -> anyhow::Result<()> { Ok(()) });

        client.subscribe("c1", a.clone()).unwrap();
        client.subscribe("c1", b.clone()).unwrap();

        assert!(client.unsubscribe("c1", Some(&a)));
        assert!(client.is_subscribed("c1"));
        assert!(!client.unsubscribe("c1", Some(&a)));

        assert!(client.unsubscribe("c1", Some(&b)));
        assert!(!client.is_subscribed("c1"));
        assert!(client.subscriptions().is_empty());
    }

    #[test]
    fn test_dispatch_with_no_subscribers() {
        let client = chart_client();

        let report = client.dispatch("nobody", &MetadataUpdate::new("nobody", "updated"));

        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn test_panicking_callback_does_not_stop_dispatch() {
        let client = chart_client();
        let delivered = Arc::new(AtomicUsize::new(0));

        let counter = delivered.clone();
        let good: UpdateCallback = Arc::new(move |_: &MetadataUpdate| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let panics: UpdateCallback = Arc::new(|_: &MetadataUpdate| -> anyhow::Result<()> {
            panic!("subscriber bug")
        });

        client.subscribe("c1", good.clone()).unwrap();
        client.subscribe("c1", panics).unwrap();
        client.subscribe("c1", good).unwrap();

        let report = client.dispatch("c1", &MetadataUpdate::new("c1", "updated"));

        assert_eq!(report.delivered, 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(report.failures, vec!["callback panicked: subscriber bug".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refresh_calls_remote_while_cache_is_refilled() {
        let client = Arc::new(chart_client());
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let refiller = {
            let client = client.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let update = MetadataUpdate::new("c1", "updated").with_metadata(fixtures::chart("c1"));
                while !stop.load(Ordering::SeqCst) {
                    client.dispatch("c1", &update);
                }
            })
        };

        for _ in 0..200 {
            client.refresh("c1").await.unwrap();
        }
        stop.store(true, Ordering::SeqCst);
        refiller.join().unwrap();

        assert_eq!(client.transport().calls(), 200);
    }

    #[tokio::test]
    async fn test_refresh_rejects_empty_id() {
        let client = chart_client();

        assert_eq!(client.refresh("").await.unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(client.transport().calls(), 0);
    }
}
