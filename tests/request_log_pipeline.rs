//! End-to-end tests: request → middleware → log channel → processor → store.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use futures_util::{stream, StreamExt};
use serde_json::json;
use tower::ServiceExt;

use relief_backend::audit::ProcessorState;
use relief_backend::channel::PubSubTransport;

mod common;

#[tokio::test]
async fn test_post_supplies_persists_sanitized_body() {
    let app = common::spawn_app().await;

    let res = app
        .client
        .post(app.url("/supplies?source=field"))
        .json(&json!({ "name": "water", "password": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    let records = app.records(1).await;
    let record = &records[0];
    assert_eq!(record.method, "POST");
    assert_eq!(record.path, "/supplies");
    assert_eq!(record.query.as_deref(), Some("source=field"));
    assert_eq!(record.status_code, 201);
    assert_eq!(record.request_body, Some(json!({ "name": "water" })));
    assert_eq!(
        record.response_body,
        Some(json!({ "id": "sup-1", "name": "water" }))
    );
    assert_eq!(record.error, None);
    assert_eq!(record.resource_id, None);
    assert_eq!(record.client_address, "127.0.0.1");

    app.stop().await;
}

#[tokio::test]
async fn test_credential_headers_are_not_persisted() {
    let app = common::spawn_app().await;

    app.client
        .get(app.url("/shelters/abc-123"))
        .header("Authorization", "Bearer secret")
        .header("Cookie", "session=1")
        .header("X-API-Key", "k")
        .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
        .header("X-Trace", "t-1")
        .send()
        .await
        .unwrap();

    let records = app.records(1).await;
    let headers = records[0].headers.as_object().unwrap();
    assert!(!headers.contains_key("authorization"));
    assert!(!headers.contains_key("cookie"));
    assert!(!headers.contains_key("x-api-key"));
    assert_eq!(headers.get("x-trace"), Some(&json!("t-1")));
    assert!(headers.contains_key("x-request-id"));

    assert_eq!(records[0].client_address, "203.0.113.7");
    assert_eq!(records[0].resource_id.as_deref(), Some("abc-123"));
    assert_eq!(records[0].request_body, None);

    app.stop().await;
}

#[tokio::test]
async fn test_oversized_body_is_truncated() {
    let app = common::spawn_app().await;

    let payload = json!({ "text": "a".repeat(20_000) });
    let size = payload.to_string().chars().count();
    let res = app
        .client
        .post(app.url("/reports"))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 202);

    let records = app.records(1).await;
    let marker = json!({ "truncated": true, "size": size });
    assert_eq!(records[0].request_body, Some(marker.clone()));
    assert_eq!(records[0].response_body, Some(marker));

    app.stop().await;
}

#[tokio::test]
async fn test_oversized_headers_are_truncated() {
    let app = common::spawn_app().await;

    app.client
        .get(app.url("/shelters/1"))
        .header("x-note", "n".repeat(12_000))
        .send()
        .await
        .unwrap();

    let records = app.records(1).await;
    assert_eq!(records[0].headers["truncated"], json!(true));
    assert!(records[0].headers["size"].as_u64().unwrap() > 12_000);

    app.stop().await;
}

#[tokio::test]
async fn test_chunked_body_is_captured() {
    let (app, _transport, store) = common::build_app(common::test_config());
    app.state().processor.start().await;

    let frames: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(br#"{"name":"#)),
        Ok(Bytes::from_static(br#""water","token":"t"}"#)),
    ];
    let request = Request::builder()
        .method("POST")
        .uri("/supplies")
        .header("content-type", "application/json")
        .body(Body::from_stream(stream::iter(frames)))
        .unwrap();

    let res = app.router().oneshot(request).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    common::wait_until(|| store.len() == 1).await;
    let record = &store.records()[0];
    assert_eq!(record.request_body, Some(json!({ "name": "water" })));

    app.state().processor.stop().await;
}

#[tokio::test]
async fn test_stalled_upload_times_out_and_is_logged() {
    let mut config = common::test_config();
    config.timeouts.request_secs = 1;
    let (app, _transport, store) = common::build_app(config);
    app.state().processor.start().await;

    let stalled = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"{\"name\""))])
        .chain(stream::pending());
    let request = Request::builder()
        .method("POST")
        .uri("/supplies")
        .header("content-type", "application/json")
        .body(Body::from_stream(stalled))
        .unwrap();

    let res = tokio::time::timeout(Duration::from_secs(3), app.router().oneshot(request))
        .await
        .expect("stalled upload must not hang")
        .unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);

    common::wait_until(|| store.len() == 1).await;
    let record = &store.records()[0];
    assert_eq!(record.status_code, 408);
    assert_eq!(record.error.as_deref(), Some("Request body not received in time"));
    assert_eq!(record.request_body, None);

    app.state().processor.stop().await;
}

#[tokio::test]
async fn test_server_error_records_reason() {
    let app = common::spawn_app().await;

    let res = app.client.get(app.url("/broken")).send().await.unwrap();
    assert_eq!(res.status(), 500);

    let records = app.records(1).await;
    assert_eq!(records[0].status_code, 500);
    assert_eq!(records[0].error.as_deref(), Some("Internal Server Error"));

    app.stop().await;
}

#[tokio::test]
async fn test_one_publish_per_request() {
    let app = common::spawn_app().await;
    let mut tap = app.transport.subscribe("request_logs").await.unwrap();

    for i in 0..5 {
        app.client
            .get(app.url(&format!("/shelters/{}", i)))
            .send()
            .await
            .unwrap();
    }

    for _ in 0..5 {
        let next = tokio::time::timeout(Duration::from_secs(2), tap.next()).await;
        assert!(matches!(next, Ok(Some(Ok(_)))));
    }
    let extra = tokio::time::timeout(Duration::from_millis(200), tap.next()).await;
    assert!(extra.is_err(), "no more than one event per request");

    let records = app.records(5).await;
    let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["/shelters/0", "/shelters/1", "/shelters/2", "/shelters/3", "/shelters/4"]);

    app.stop().await;
}

#[tokio::test]
async fn test_channel_down_does_not_affect_response() {
    let app = common::spawn_app().await;
    app.transport.set_available(false);

    let res = app
        .client
        .post(app.url("/supplies"))
        .json(&json!({ "name": "blankets" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["name"], "blankets");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.store.is_empty());

    app.transport.set_available(true);
    app.stop().await;
}

#[tokio::test]
async fn test_malformed_message_is_skipped() {
    let app = common::spawn_app().await;

    app.transport
        .publish("request_logs", "not json at all".into())
        .await
        .unwrap();
    app.transport
        .publish("request_logs", r#"{"method":"GET"}"#.into())
        .await
        .unwrap();
    app.client.get(app.url("/shelters/7")).send().await.unwrap();

    let records = app.records(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "/shelters/7");
    assert!(app.state.processor.is_consuming());

    app.stop().await;
}

#[tokio::test]
async fn test_store_failure_does_not_stop_processing() {
    let app = common::spawn_app().await;

    app.store.set_available(false);
    app.client.get(app.url("/shelters/1")).send().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.store.is_empty());

    app.store.set_available(true);
    app.client.get(app.url("/shelters/2")).send().await.unwrap();

    let records = app.records(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "/shelters/2");

    app.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_inflight_insert() {
    let app = common::spawn_app().await;
    app.store.set_insert_delay(Duration::from_millis(300));

    app.transport
        .publish(
            "request_logs",
            r#"{"method":"DELETE","path":"/supplies/9","status_code":204}"#.into(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    app.state.processor.stop().await;
    assert_eq!(app.state.processor.state(), ProcessorState::Stopped);
    assert_eq!(app.store.len(), 1);

    app.stop().await;
}

#[tokio::test]
async fn test_start_twice_keeps_single_subscription() {
    let app = common::spawn_app().await;

    app.state.processor.start().await;
    assert_eq!(app.transport.subscriber_count("request_logs"), 1);

    app.client.get(app.url("/shelters/1")).send().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.store.len(), 1);

    app.stop().await;
}

#[tokio::test]
async fn test_disabled_middleware_publishes_nothing() {
    let mut config = common::test_config();
    config.request_log.enabled = false;
    let app = common::spawn_app_with(config).await;

    let res = app.client.get(app.url("/shelters/1")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.store.is_empty());

    app.stop().await;
}
