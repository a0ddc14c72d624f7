//! Retry behavior against simulated and mock HTTP remotes

use cardvault_ingest::models::{PartitionKey, SourceRecord};
use cardvault_ingest::retry::{RetryController, RetryPolicy};
use cardvault_ingest::seed::{
    AssetPipeline, AssetSource, HttpAssetSource, MemoryAssetStore, PassthroughCodec,
};
use cardvault_ingest::RemoteError;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_policy(max_retries: u32) -> RetryController {
    RetryController::new(RetryPolicy::new(
        max_retries,
        Duration::from_millis(5),
        Duration::from_millis(20),
    ))
}

// ============================================================================
// BACKOFF SCHEDULE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limited_call_backs_off_until_budget_exhausted() {
    let controller = RetryController::default();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let err = controller
        .call("always limited", || {
            let attempts = attempts.clone();
            async move {
                attempts.lock().unwrap().push(Instant::now());
                Err::<(), _>(RemoteError::RateLimited)
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err, RemoteError::RateLimited);

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 6);

    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![2, 4, 8, 16, 30]);
    assert!(gaps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_caps_delay() {
    let controller = RetryController::new(RetryPolicy::new(
        3,
        Duration::from_millis(100),
        Duration::from_millis(150),
    ));
    let start = Instant::now();

    let _ = controller
        .call("capped", || async { Err::<(), _>(RemoteError::Status(502)) })
        .await;

    // 100 + 150 + 150
    assert_eq!(start.elapsed(), Duration::from_millis(400));
}

// ============================================================================
// HTTP ASSET SOURCE
// ============================================================================

#[tokio::test]
async fn test_http_not_found_resolves_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = HttpAssetSource::new(Duration::from_secs(5)).unwrap();
    let url = format!("{}/missing.jpg", server.uri());

    let result = quick_policy(3)
        .call("asset download", || source.fetch(&url))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_http_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/card.jpg"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/card.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]))
        .mount(&server)
        .await;

    let source = HttpAssetSource::new(Duration::from_secs(5)).unwrap();
    let url = format!("{}/card.jpg", server.uri());

    let bytes = quick_policy(3)
        .call("asset download", || source.fetch(&url))
        .await
        .unwrap();

    assert_eq!(bytes, Some(vec![0xFF, 0xD8, 0xFF, 0xE0]));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_http_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = HttpAssetSource::new(Duration::from_secs(5)).unwrap();
    let url = format!("{}/broken.jpg", server.uri());

    let err = quick_policy(2)
        .call("asset download", || source.fetch(&url))
        .await
        .unwrap_err();

    assert_eq!(err, RemoteError::Status(500));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_pipeline_downloads_and_stores_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lea/232.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG\r\n\x1a\n".to_vec()))
        .mount(&server)
        .await;

    let record: SourceRecord = serde_json::from_value(json!({
        "id": "c1",
        "set": "lea",
        "lang": "en",
        "name": "Black Lotus",
        "collector_number": "232",
        "image_uris": {"png": format!("{}/lea/232.png", server.uri())}
    }))
    .unwrap();

    let store = Arc::new(MemoryAssetStore::new());
    let pipeline = AssetPipeline::new(
        Arc::new(HttpAssetSource::new(Duration::from_secs(5)).unwrap()),
        Arc::new(PassthroughCodec),
        store.clone(),
        quick_policy(1),
        "cards",
    );

    let url = pipeline
        .resolve(&PartitionKey::new("lea", "en"), &record)
        .await
        .unwrap();

    assert_eq!(url.as_deref(), Some("memory://cards/lea/en/232.png"));
    assert_eq!(store.keys(), vec!["cards/lea/en/232.png"]);
}
