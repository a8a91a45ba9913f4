//! End-to-end scenarios driven entirely through `kaf::http::router`, the
//! way the teacher's `client-api` integration tests drive `Router` with
//! `tower::ServiceExt::oneshot` rather than a real listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use kaf::http::router;
use kaf::registry;
use tempfile::tempdir;
use tower::ServiceExt;

async fn put(app: &axum::Router, logname: &str, body: &'static str) -> StatusCode {
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/put/{logname}"))
                .header(axum::http::header::CONTENT_LENGTH, body.len())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

async fn get_body(app: &axum::Router, path: &str) -> Vec<u8> {
    let response = app.clone().oneshot(Request::get(path).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

#[tokio::test]
async fn get_window_stops_at_five_records() {
    let dir = tempdir().unwrap();
    let app = router(registry::spawn(dir.path().to_path_buf()));

    for n in 1..=7u32 {
        let status = put(&app, "orders", Box::leak(n.to_string().into_boxed_str())).await;
        assert_eq!(status, StatusCode::OK);
    }

    let body = get_body(&app, "/get/orders?from=1&format=kaf").await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("KAF_MSGS|v1|5"));

    let body = get_body(&app, "/get/orders?from=6&format=raw").await;
    assert_eq!(body, b"6\n7\n");
}

#[tokio::test]
async fn archive_through_http_then_round_trips_the_retained_tail() {
    let dir = tempdir().unwrap();
    let app = router(registry::spawn(dir.path().to_path_buf()));

    for i in 1..=5u32 {
        let payload = format!("m{i}");
        let status = put(&app, "widgets", Box::leak(payload.into_boxed_str())).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(Request::post("/archive/widgets?upto=3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = get_body(&app, "/get/widgets?from=1&format=raw").await;
    assert_eq!(body, b"m4\nm5\n");
}

#[tokio::test]
async fn json_format_renders_payloads_as_a_comma_joined_array() {
    let dir = tempdir().unwrap();
    let app = router(registry::spawn(dir.path().to_path_buf()));

    assert_eq!(put(&app, "events", r#"{"a":1}"#).await, StatusCode::OK);
    assert_eq!(put(&app, "events", r#"{"a":2}"#).await, StatusCode::OK);

    let body = get_body(&app, "/get/events?from=1&format=json").await;
    assert_eq!(body, b"[{\"a\":1},\n{\"a\":2}]");
}

#[tokio::test]
async fn put_to_reserved_stats_log_is_rejected() {
    let dir = tempdir().unwrap();
    let app = router(registry::spawn(dir.path().to_path_buf()));

    let response = app
        .oneshot(
            Request::post("/put/_kaf")
                .header(axum::http::header::CONTENT_LENGTH, 1)
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_with_from_zero_is_rejected() {
    let dir = tempdir().unwrap();
    let app = router(registry::spawn(dir.path().to_path_buf()));

    let response = app
        .oneshot(Request::get("/get/orders?from=0").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
