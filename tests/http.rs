//! Router-level tests: every endpoint driven through `tower::ServiceExt::oneshot`
//!
//! Run: `cargo test --test http`

#![cfg(feature = "test-pattern")]

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use shutterbug::capture::{Frame, FrameBuffer, FrameMetadata};
use shutterbug::server::relay::{StreamRelay, CONTENT_TYPE};
use shutterbug::server::router;

use common::{harness, harness_with, Harness};

async fn app() -> (Router, Harness) {
    started(harness()).await
}

async fn started(h: Harness) -> (Router, Harness) {
    h.registry.initialize().await.unwrap();
    (router(h.app_state()), h)
}

async fn next_chunk(body: &mut Body) -> Bytes {
    tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .into_data()
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn meta_lists_enabled_controls() {
    let (app, _h) = app().await;

    let response = app.oneshot(get("/meta")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-cache, private"
    );

    let meta = json_body(response).await;
    assert_eq!(meta["Quality"]["value"], json!(75));
    assert_eq!(meta["AeEnable"]["controlType"], json!("checkbox"));
    assert_eq!(meta["Brightness"]["min"], json!(-1.0));
    assert!(meta.get("FrameDurationLimits").is_none());
}

#[tokio::test]
async fn controls_post_returns_updated_meta() {
    let (app, h) = app().await;

    let response = app
        .oneshot(post("/controls", r#"{"Brightness": 0.5, "AnalogueGain": "max"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let meta = json_body(response).await;
    assert_eq!(meta["Brightness"]["value"], json!(0.5));
    assert_eq!(meta["AnalogueGain"]["value"], json!(16));
    assert_eq!(h.probe.starts(), 1);
}

#[tokio::test]
async fn partially_bad_controls_still_apply_the_rest() {
    let (app, _h) = app().await;

    let response = app
        .oneshot(post("/controls", r#"{"Brightness": "dark", "Contrast": 2}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let meta = json_body(response).await;
    assert_eq!(meta["Brightness"]["value"], json!(0.0));
    assert_eq!(meta["Contrast"]["value"], json!(2.0));
}

#[tokio::test]
async fn unparseable_body_is_rejected() {
    let (app, _h) = app().await;

    let response = app.oneshot(post("/controls", "{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("INVALID_REQUEST"));
}

#[tokio::test]
async fn quality_endpoint_accepts_bare_number() {
    let (app, h) = app().await;

    let response = app.clone().oneshot(post("/quality", "20")).await.unwrap();
    assert_eq!(json_body(response).await["Quality"]["value"], json!(20));

    let response = app
        .oneshot(post("/quality", r#"{"quality": 60}"#))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["Quality"]["value"], json!(60));
    assert_eq!(h.probe.starts(), 3);
}

#[tokio::test]
async fn body_without_its_field_returns_current_meta() {
    let (app, h) = app().await;
    let before = json_body(app.clone().oneshot(get("/meta")).await.unwrap()).await;

    let response = app.clone().oneshot(post("/mode", "{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, before);

    let response = app
        .clone()
        .oneshot(post("/quality", r#"{"foo": 1}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["Quality"]["value"], json!(75));
    assert_eq!(h.probe.starts(), 1);

    // A mode that is present but not a name is still refused
    let response = app.oneshot(post("/mode", r#"{"mode": 3}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("UNKNOWN_MODE"));
}

#[tokio::test]
async fn failed_quality_restart_is_unavailable_and_keeps_old_quality() {
    let (app, h) = app().await;
    h.probe.fail_configure(true);

    let response = app.clone().oneshot(post("/quality", "30")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    h.probe.fail_configure(false);
    let meta = json_body(app.oneshot(get("/meta")).await.unwrap()).await;
    assert_eq!(meta["Quality"]["value"], json!(75));
}

#[tokio::test]
async fn modes_table_and_apply() {
    let (app, _h) = app().await;

    let modes = json_body(app.clone().oneshot(get("/modes")).await.unwrap()).await;
    assert_eq!(modes["Night"]["ExposureTime"], json!("max"));

    let response = app
        .clone()
        .oneshot(post("/mode", r#"{"mode": "Night"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let meta = json_body(response).await;
    assert_eq!(meta["AeEnable"]["value"], json!(false));
    assert_eq!(meta["ExposureTime"]["value"], json!(200_000));

    let response = app
        .oneshot(post("/mode", r#"{"mode": "Dusk"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("UNKNOWN_MODE"));
}

#[tokio::test]
async fn stream_serves_multipart_jpeg() {
    let (app, _h) = app().await;

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);

    let mut body = response.into_body();
    let chunk = next_chunk(&mut body).await;

    let head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    assert!(chunk.starts_with(head));
    assert!(chunk.ends_with(b"\r\n"));
    // JPEG start-of-image marker
    assert_eq!(&chunk[head.len()..head.len() + 2], &[0xFF_u8, 0xD8]);
}

#[tokio::test]
async fn stream_restarts_stopped_capture() {
    let (app, h) = app().await;
    h.session.stop();

    let response = app.clone().oneshot(get("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.session.is_running());

    let health = json_body(app.oneshot(get("/healthz")).await.unwrap()).await;
    assert_eq!(health["capturing"], json!(true));
    assert_eq!(health["clients"], json!(1));
    drop(response);
}

#[tokio::test]
async fn stream_clients_share_frames_and_survive_a_disconnect() {
    let mut config = common::config();
    // Slow enough that both bodies are always waiting when a frame lands
    config.capture.fps = 20;
    let (app, h) = started(harness_with(config)).await;

    let mut a = app.clone().oneshot(get("/")).await.unwrap().into_body();
    let mut b = app.clone().oneshot(get("/")).await.unwrap().into_body();

    for _ in 0..4 {
        let (ca, cb) = tokio::join!(next_chunk(&mut a), next_chunk(&mut b));
        assert_eq!(ca, cb);
    }

    drop(a);
    let mut previous = Bytes::new();
    for _ in 0..3 {
        let chunk = next_chunk(&mut b).await;
        assert_ne!(chunk, previous);
        previous = chunk;
    }
    assert!(h.session.is_running());

    let health = json_body(app.oneshot(get("/healthz")).await.unwrap()).await;
    assert_eq!(health["clients"], json!(1));
    assert!(health["lastFrame"].as_u64().unwrap() >= 7);
}

fn frame(sequence: u64, data: &'static [u8]) -> Frame {
    Frame::new(
        Bytes::from_static(data),
        FrameMetadata {
            sequence,
            width: 1,
            height: 1,
            quality: 75,
            device_timestamp: None,
        },
    )
}

#[tokio::test]
async fn two_clients_receive_identical_frames() {
    let buffer = FrameBuffer::new();
    let mut a = StreamRelay::new(buffer.subscribe(), Duration::ZERO);
    let mut b = StreamRelay::new(buffer.subscribe(), Duration::ZERO);

    let publisher = buffer.clone();
    let (ca, cb, ()) = tokio::join!(a.next_chunk(), b.next_chunk(), async move {
        tokio::task::yield_now().await;
        publisher.publish(frame(7, b"shared"));
    });

    assert_eq!(ca.unwrap(), cb.unwrap());
}

#[tokio::test]
async fn disconnect_only_ends_that_client() {
    let buffer = FrameBuffer::new();
    let gone = StreamRelay::new(buffer.subscribe(), Duration::ZERO);
    let mut stays = StreamRelay::new(buffer.subscribe(), Duration::ZERO);
    assert_eq!(buffer.reader_count(), 2);

    drop(gone);
    assert_eq!(buffer.reader_count(), 1);

    let publisher = buffer.clone();
    let (chunk, ()) = tokio::join!(stays.next_chunk(), async move {
        tokio::task::yield_now().await;
        publisher.publish(frame(1, b"still here"));
    });
    assert!(chunk.unwrap().ends_with(b"still here\r\n"));
}
