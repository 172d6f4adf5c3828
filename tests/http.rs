//! HTTP routes: health, event stream, push subscriptions and the operator API.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chatrelay::create_app;
use chatrelay::repositories::PresenceStore;
use common::*;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tower::util::ServiceExt;

async fn body_json(res: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn notify_request(key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/notify")
        .header("x-app-key", key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn subscription_body() -> Value {
    json!({
        "endpoint": "https://push.example/send/abc",
        "expirationTime": null,
        "keys": { "p256dh": "BNc", "auth": "tBH" }
    })
}

#[tokio::test]
async fn health_returns_ok() {
    let app = create_app(harness().state);
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = tokio_test::assert_ok!(app.oneshot(req).await);
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json.get("status").and_then(|v| v.as_str()), Some("ok"));
}

#[tokio::test]
async fn stream_requires_token() {
    let app = create_app(harness().state);
    for uri in ["/stream", "/stream?token=", "/stream?token=garbage"] {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn notify_is_delivered_on_open_stream() {
    let h = harness();
    let app = create_app(h.state.clone());

    let req = Request::builder()
        .uri(format!("/stream?token={}", token_for(4)))
        .body(Body::empty())
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    let mut body = res.into_body().into_data_stream();

    let res = app
        .oneshot(notify_request(
            APP_KEY,
            json!({
                "user_ids": [1, 4],
                "exclude": [1],
                "type": "project-edited",
                "message": "Apollo was renamed.",
                "data": { "project_id": PROJECT_ID }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["deliveries"], json!({ "4": "stream" }));

    let chunk = timeout(Duration::from_secs(1), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(frame.starts_with("event:action-project\ndata:{"), "{}", frame);
    assert!(frame.contains("\"message\":\"Apollo was renamed.\""), "{}", frame);
    assert!(frame.ends_with("retry:30000\n\n"), "{}", frame);
    assert!(h.push.sent().is_empty());
}

#[tokio::test]
async fn operator_routes_require_app_key() {
    let app = create_app(harness().state);
    let body = json!({ "user_ids": [1], "type": "role-changed", "message": "x" });

    let res = app.clone().oneshot(notify_request("wrong", body)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/rooms/7/online")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn notify_without_recipients_is_rejected() {
    let app = create_app(harness().state);
    let body = json!({ "user_ids": [], "type": "role-changed", "message": "x" });
    let res = app.oneshot(notify_request(APP_KEY, body)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let json = body_json(res).await;
    assert_eq!(json["errors"]["user_ids"], "'user_ids' is required.");
}

#[tokio::test]
async fn subscription_lifecycle() {
    let h = harness();
    let app = create_app(h.state.clone());
    let bearer = format!("Bearer {}", token_for(3));

    let req = Request::builder()
        .method("POST")
        .uri("/subscription")
        .header(header::AUTHORIZATION, &bearer)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(subscription_body().to_string()))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let mirrored = h.store.get("webpush:sub:user:3").await.unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&mirrored).unwrap(),
        subscription_body()
    );

    let res = app
        .clone()
        .oneshot(notify_request(
            APP_KEY,
            json!({ "user_ids": [3], "type": "added-to-project", "message": "Welcome." }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["deliveries"], json!({ "3": "push" }));
    assert_eq!(h.push.sent().len(), 1);

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/subscription")
            .header(header::AUTHORIZATION, &bearer)
            .body(Body::empty())
            .unwrap()
    };
    let res = app.clone().oneshot(delete()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(h.store.get("webpush:sub:user:3").await.unwrap().is_none());

    let res = app.oneshot(delete()).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let json = body_json(res).await;
    assert!(json["message"]
        .as_str()
        .unwrap()
        .ends_with("Service Worker Key was not found."));
}

#[tokio::test]
async fn subscription_body_is_validated() {
    let h = harness();
    let app = create_app(h.state.clone());
    let mut body = subscription_body();
    body["endpoint"] = json!("not a url");
    body["keys"]["auth"] = json!("");

    let req = Request::builder()
        .method("POST")
        .uri("/subscription")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for(3)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let json = body_json(res).await;
    assert_eq!(json["errors"]["endpoint"], "'endpoint' must be a URL.");
    assert_eq!(json["errors"]["keys.auth"], "'auth' is required.");
    assert!(h.store.get("webpush:sub:user:3").await.unwrap().is_none());
}

#[tokio::test]
async fn warm_start_mirrors_durable_subscriptions() {
    let h = harness();
    h.chat.insert_subscription(2, r#"{"endpoint":"https://push.example/two"}"#);
    h.chat.insert_subscription(3, r#"{"endpoint":"https://push.example/three"}"#);
    h.store.set("sid:stale", r#"{"user_id":1}"#).await.unwrap();

    assert_eq!(h.state.presence_service.reset().await.unwrap(), 1);
    assert_eq!(h.state.subscription_service.mirror_all().await.unwrap(), 2);
    assert_eq!(
        h.store.get("webpush:sub:user:2").await.unwrap().as_deref(),
        Some(r#"{"endpoint":"https://push.example/two"}"#)
    );
    assert!(h.store.get("sid:stale").await.unwrap().is_none());
}

#[tokio::test]
async fn room_online_lists_members() {
    let h = harness();
    h.state.presence_service.register_connection("s1", 1).await.unwrap();
    h.state.presence_service.register_connection("s2", 2).await.unwrap();
    h.state.presence_service.join("s1", "room:project:7").await.unwrap();
    h.state.presence_service.join("s2", "room:project:7").await.unwrap();

    let app = create_app(h.state.clone());
    let req = Request::builder()
        .uri("/api/rooms/7/online")
        .header("x-app-key", APP_KEY)
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["room"], "room:project:7");
    let mut ids: Vec<i64> = json["online"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["user_id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn purge_removes_every_user_channel() {
    let h = harness();
    h.chat.insert_subscription(4, r#"{"endpoint":"https://push.example/abc"}"#);
    tag_push(&h.store, 4).await;
    let _stream = h.state.stream_service.stream(4).await.unwrap();

    let app = create_app(h.state.clone());
    let req = Request::builder()
        .method("DELETE")
        .uri("/api/users/4/channels")
        .header("x-app-key", APP_KEY)
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert!(h.store.keys("*:sub:user:4").await.unwrap().is_empty());
    assert!(!h.state.stream_service.is_streaming(4).await);
    let outcome = h
        .state
        .notification_router
        .route(4, &chatrelay::models::Envelope::new(
            chatrelay::models::NotificationKind::AccountArchived,
            "Your account was archived.",
            Value::Null,
        ))
        .await
        .unwrap();
    assert_eq!(outcome, chatrelay::models::Delivery::Dropped);
}
