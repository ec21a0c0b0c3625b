#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use ringside_core::SESSION_EVENTS_QUEUE;
use ringside_events::{InMemoryChannel, PublishRetryConfig, TokenPublisher};
use ringside_server::AppConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

pub fn publisher(channel: &InMemoryChannel) -> TokenPublisher {
    TokenPublisher::new(
        Arc::new(channel.clone()),
        SESSION_EVENTS_QUEUE,
        Duration::from_secs(1),
        PublishRetryConfig {
            max_attempts: 20,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
    )
}

pub fn issuer_app(channel: &InMemoryChannel) -> Router {
    issuer_app_with(channel, &AppConfig::default())
}

pub fn issuer_app_with(channel: &InMemoryChannel, config: &AppConfig) -> Router {
    let (router, _) = ringside_server::build_issuer(config, publisher(channel));
    router
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into()))
    };
    (status, json)
}

pub async fn register(app: &Router, email: &str, username: &str, password: &str) -> (StatusCode, Value) {
    let body = json!({ "email": email, "username": username, "password": password });
    send(
        app,
        Request::post("/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password={password}")))
            .unwrap(),
    )
    .await
}

pub fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
