//! Client SDK tests.
//!
//! Most tests script an in-memory transport; the `http_` tests run the real
//! server on an ephemeral port and talk to it through `HttpTransport`.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eamp_gateway::client::{Transport, TransportFailure, TransportResponse};
use eamp_gateway::clock::ManualClock;
use eamp_gateway::models::{Metadata, MetadataFilter, MetadataUpdate};
use eamp_gateway::{AppState, ClientOptions, Config, EampClient, EampError, UpdateCallback};
use serde_json::json;
use tokio::net::TcpListener;

// =============================================================================
// Scripted transport
// =============================================================================

type Scripted = Result<TransportResponse, TransportFailure>;

#[derive(Default)]
struct MockTransport {
    responses: Mutex<VecDeque<Scripted>>,
    /// Used once the script runs out
    fallback: Mutex<Option<Scripted>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_segments: Mutex<Vec<String>>,
    last_query: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl MockTransport {
    fn always(response: Scripted) -> Self {
        Self {
            fallback: Mutex::new(Some(response)),
            ..Self::default()
        }
    }

    fn script(responses: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get(
        &self,
        segments: &[&str],
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_segments.lock().unwrap() = segments.iter().map(|s| s.to_string()).collect();
        *self.last_query.lock().unwrap() = query.to_vec();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.fallback.lock().unwrap().clone())
            .unwrap_or_else(|| Err(TransportFailure::Other("script exhausted".to_string())))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn metadata(id: &str, short_alt: &str) -> Metadata {
    serde_json::from_value(json!({
        "id": id,
        "type": "image",
        "short_alt": short_alt,
        "extended_description": "Bar chart of quarterly sales",
        "data_points": [{"label": "Q1", "value": 1200000, "unit": "USD"}]
    }))
    .unwrap()
}

fn ok(metadata: &Metadata) -> Scripted {
    Ok(TransportResponse::new(
        200,
        serde_json::to_vec(metadata).unwrap(),
    ))
}

fn client(transport: MockTransport) -> EampClient<MockTransport> {
    EampClient::with_transport(ClientOptions::new("http://mock"), transport)
}

// =============================================================================
// Fetch and caching
// =============================================================================

#[tokio::test]
async fn test_empty_id_fails_without_network_call() {
    let client = client(MockTransport::always(ok(&metadata("x", "X"))));

    let err = client.fetch("").await.unwrap_err();

    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(client.transport().calls(), 0);
}

#[tokio::test]
async fn test_fetch_requests_metadata_path() {
    let client = client(MockTransport::always(ok(&metadata("chart 1", "X"))));

    client.fetch("chart 1").await.unwrap();

    assert_eq!(
        *client.transport().last_segments.lock().unwrap(),
        vec!["metadata".to_string(), "chart 1".to_string()]
    );
}

#[tokio::test]
async fn test_fetch_is_cached_and_refresh_bypasses_cache() {
    let client = client(MockTransport::script([
        ok(&metadata("c1", "Old")),
        ok(&metadata("c1", "New")),
    ]));

    assert_eq!(client.fetch("c1").await.unwrap().short_alt, "Old");
    assert_eq!(client.fetch("c1").await.unwrap().short_alt, "Old");
    assert_eq!(client.transport().calls(), 1);

    assert_eq!(client.refresh("c1").await.unwrap().short_alt, "New");
    assert_eq!(client.transport().calls(), 2);

    // The refreshed record is cached again
    assert_eq!(client.fetch("c1").await.unwrap().short_alt, "New");
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test]
async fn test_cache_entry_expires_after_ttl() {
    let clock = Arc::new(ManualClock::default());
    let client = EampClient::with_transport_and_clock(
        ClientOptions {
            cache_ttl: Duration::from_secs(300),
            ..ClientOptions::new("http://mock")
        },
        MockTransport::always(ok(&metadata("c1", "X"))),
        clock.clone(),
    );

    client.fetch("c1").await.unwrap();
    clock.advance(Duration::from_secs(299));
    client.fetch("c1").await.unwrap();
    assert_eq!(client.transport().calls(), 1);

    clock.advance(Duration::from_secs(2));
    client.fetch("c1").await.unwrap();
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let client = client(MockTransport::script([
        Ok(TransportResponse::new(404, "")),
        ok(&metadata("c1", "X")),
    ]));

    let err = client.fetch("c1").await.unwrap_err();
    assert_eq!(err, EampError::NotFound("c1".to_string()));
    assert_eq!(client.cache_stats().unwrap().total_entries, 0);

    client.fetch("c1").await.unwrap();
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test]
async fn test_malformed_success_body_is_validation_error() {
    let client = client(MockTransport::always(Ok(TransportResponse::new(
        200,
        r#"{"id": "c1"}"#,
    ))));

    let err = client.fetch("c1").await.unwrap_err();

    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(client.cache_stats().unwrap().total_entries, 0);
}

// =============================================================================
// Error classification
// =============================================================================

#[tokio::test]
async fn test_rate_limited_propagates_retry_after() {
    let client = client(MockTransport::always(Ok(
        TransportResponse::new(429, "").with_retry_after(30)
    )));

    let err = client.fetch("c1").await.unwrap_err();

    assert_eq!(err.code(), "RATE_LIMIT_ERROR");
    assert_eq!(err.retry_after(), Some(30));
}

#[tokio::test]
async fn test_status_precedence_over_body() {
    let body = r#"{"error":{"code":"CUSTOM","message":"custom"}}"#;
    let client = client(MockTransport::script([
        Ok(TransportResponse::new(401, body)),
        Ok(TransportResponse::new(403, body)),
        Ok(TransportResponse::new(503, body)),
        Ok(TransportResponse::new(409, body)),
        Ok(TransportResponse::new(409, "conflict")),
    ]));

    let codes: Vec<String> = {
        let mut codes = Vec::new();
        for _ in 0..5 {
            codes.push(client.fetch("c1").await.unwrap_err().code().to_string());
        }
        codes
    };

    assert_eq!(
        codes,
        vec![
            "AUTHENTICATION_ERROR",
            "AUTHORIZATION_ERROR",
            "SERVER_ERROR",
            "CUSTOM",
            "NETWORK_ERROR"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_classified_and_not_cached() {
    let client = EampClient::with_transport(
        ClientOptions {
            timeout: Duration::from_millis(50),
            ..ClientOptions::new("http://mock")
        },
        MockTransport::always(ok(&metadata("c1", "X"))).with_delay(Duration::from_secs(5)),
    );

    let err = client.fetch("c1").await.unwrap_err();

    assert_eq!(
        err,
        EampError::Timeout {
            timeout: Duration::from_millis(50)
        }
    );
    assert_eq!(client.cache_stats().unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_transport_failures_are_classified() {
    let client = client(MockTransport::script([
        Err(TransportFailure::Timeout),
        Err(TransportFailure::Connect("connection refused".to_string())),
    ]));

    assert_eq!(client.fetch("c1").await.unwrap_err().code(), "TIMEOUT_ERROR");
    assert_eq!(client.fetch("c1").await.unwrap_err().code(), "NETWORK_ERROR");
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_sends_filter_and_parses_array() {
    let body = serde_json::to_vec(&vec![metadata("a", "A"), metadata("b", "B")]).unwrap();
    let client = client(MockTransport::always(Ok(TransportResponse::new(200, body))));
    let filter = MetadataFilter {
        tags: Some(vec!["sales".to_string()]),
        ..Default::default()
    };

    let records = client.list(Some(&filter)).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(
        *client.transport().last_query.lock().unwrap(),
        vec![("tags".to_string(), "sales".to_string())]
    );
    // Listings never populate the cache
    assert_eq!(client.cache_stats().unwrap().total_entries, 0);
}

#[tokio::test]
async fn test_list_rejects_non_array() {
    let client = client(MockTransport::always(Ok(TransportResponse::new(200, "{}"))));

    assert_eq!(
        client.list(None).await.unwrap_err().code(),
        "VALIDATION_ERROR"
    );
}

// =============================================================================
// Subscriptions
// =============================================================================

fn counting_callback(counter: &Arc<AtomicUsize>) -> UpdateCallback {
    let counter = counter.clone();
    Arc::new(move |_: &MetadataUpdate| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[tokio::test]
async fn test_dispatch_isolates_failing_callback() {
    let client = client(MockTransport::default());
    let first = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicUsize::new(0));

    client.subscribe("c1", counting_callback(&first)).unwrap();
    client
        .subscribe(
            "c1",
            Arc::new(|_: &MetadataUpdate| -> anyhow::Result<()> {
                anyhow::bail!("subscriber crashed")
            }),
        )
        .unwrap();
    client.subscribe("c1", counting_callback(&last)).unwrap();

    let update = MetadataUpdate::new("c1", "updated").with_metadata(metadata("c1", "Pushed"));
    let report = client.dispatch("c1", &update);

    assert_eq!(report.delivered, 2);
    assert_eq!(report.failures, vec!["subscriber crashed".to_string()]);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 1);

    // The pushed record is now served without a remote call
    assert_eq!(client.fetch("c1").await.unwrap().short_alt, "Pushed");
    assert_eq!(client.transport().calls(), 0);
}

#[tokio::test]
async fn test_duplicate_callbacks_fire_once_per_registration() {
    let client = client(MockTransport::default());
    let count = Arc::new(AtomicUsize::new(0));
    let callback = counting_callback(&count);

    client.subscribe("c1", callback.clone()).unwrap();
    client.subscribe("c1", callback.clone()).unwrap();
    client.dispatch("c1", &MetadataUpdate::new("c1", "updated"));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    // Removing one registration leaves the other
    assert!(client.unsubscribe("c1", Some(&callback)));
    assert!(client.is_subscribed("c1"));
    client.dispatch("c1", &MetadataUpdate::new("c1", "updated"));
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unsubscribe_without_callback_removes_all() {
    let client = client(MockTransport::default());
    let count = Arc::new(AtomicUsize::new(0));

    client.subscribe("c1", counting_callback(&count)).unwrap();
    client.subscribe("c1", counting_callback(&count)).unwrap();
    client.subscribe("c2", counting_callback(&count)).unwrap();

    assert!(client.unsubscribe("c1", None));
    assert!(!client.is_subscribed("c1"));
    assert_eq!(client.subscriptions(), vec!["c2".to_string()]);
    assert!(!client.unsubscribe("c1", None));

    client.unsubscribe_all();
    assert!(client.subscriptions().is_empty());
}

#[tokio::test]
async fn test_subscribe_rejects_empty_id() {
    let client = client(MockTransport::default());
    let count = Arc::new(AtomicUsize::new(0));

    assert!(client.subscribe("", counting_callback(&count)).is_err());
    assert!(client.subscriptions().is_empty());
}

#[tokio::test]
async fn test_refresh_notifies_subscribers() {
    let client = client(MockTransport::always(ok(&metadata("c1", "Fresh"))));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    client
        .subscribe(
            "c1",
            Arc::new(move |update: &MetadataUpdate| -> anyhow::Result<()> {
                sink.lock().unwrap().push(update.change_type.clone());
                Ok(())
            }),
        )
        .unwrap();

    client.fetch("c1").await.unwrap();
    assert!(seen.lock().unwrap().is_empty());

    client.refresh("c1").await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["refreshed".to_string()]);
}

#[tokio::test]
async fn test_close_releases_everything() {
    let client = client(MockTransport::always(ok(&metadata("c1", "X"))));
    let count = Arc::new(AtomicUsize::new(0));

    client.fetch("c1").await.unwrap();
    client.subscribe("c1", counting_callback(&count)).unwrap();

    client.close().await;

    assert!(client.subscriptions().is_empty());
    assert_eq!(client.cache_stats().unwrap().total_entries, 0);
    assert!(client.transport().closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_clear_cache() {
    let client = client(MockTransport::always(ok(&metadata("c1", "X"))));

    client.fetch("c1").await.unwrap();
    client.clear_cache();
    client.fetch("c1").await.unwrap();

    assert_eq!(client.transport().calls(), 2);
}

// =============================================================================
// Against a live server
// =============================================================================

async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config).unwrap();
    let app = eamp_gateway::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn test_http_fetch_encodes_ids_and_maps_not_found() {
    let (addr, state) = spawn_server(Config::default()).await;
    state.store.upsert(metadata("charts/q1 2024", "Q1"));

    let client = EampClient::new(ClientOptions::new(format!("http://{addr}")));

    let fetched = client.fetch("charts/q1 2024").await.unwrap();
    assert_eq!(fetched.short_alt, "Q1");

    let err = client.fetch("missing").await.unwrap_err();
    assert_eq!(err.code(), "RESOURCE_NOT_FOUND");

    let listed = client.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);

    client.close().await;
    assert!(!client.transport().is_connected().await);
}

#[tokio::test]
async fn test_http_server_denial_becomes_rate_limit_error() {
    let (addr, state) = spawn_server(Config {
        rate_limit_requests: 2,
        ..Config::default()
    })
    .await;
    state.store.upsert(metadata("c1", "X"));

    let client = EampClient::new(ClientOptions::new(format!("http://{addr}")));

    client.refresh("c1").await.unwrap();
    client.refresh("c1").await.unwrap();
    let err = client.refresh("c1").await.unwrap_err();

    assert_eq!(err.code(), "RATE_LIMIT_ERROR");
    assert_eq!(err.retry_after(), Some(60));
}

#[tokio::test]
async fn test_http_missing_base_url_is_configuration_error() {
    let client = EampClient::new(ClientOptions::default());

    let err = client.fetch("c1").await.unwrap_err();

    assert_eq!(err.code(), "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_http_connection_refused_is_network_error() {
    // Bind then drop to obtain a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let client = EampClient::new(ClientOptions {
        timeout: Duration::from_secs(5),
        ..ClientOptions::new(format!("http://{addr}"))
    });

    let err = client.fetch("c1").await.unwrap_err();

    assert_eq!(err.code(), "NETWORK_ERROR");
}

#[tokio::test]
async fn test_http_api_key_required_by_server() {
    let (addr, state) = spawn_server(Config {
        api_keys: vec!["secret".to_string()],
        ..Config::default()
    })
    .await;
    state.store.upsert(metadata("c1", "X"));

    let anonymous = EampClient::new(ClientOptions::new(format!("http://{addr}")));
    let err = anonymous.fetch("c1").await.unwrap_err();
    assert_eq!(err.code(), "AUTHENTICATION_ERROR");

    let keyed = EampClient::new(ClientOptions {
        headers: vec![("X-API-Key".to_string(), "secret".to_string())],
        ..ClientOptions::new(format!("http://{addr}"))
    });
    assert_eq!(keyed.fetch("c1").await.unwrap().short_alt, "X");
}
