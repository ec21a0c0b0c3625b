use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use ringside_auth::{Caller, TokenCache};
use ringside_events::ConsumerStats;
use serde::Serialize;

use crate::metrics::{record_cache_stats, record_consumer_stats, render_metrics};

/// State shared by the health and metrics endpoints.
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    pub cache: Option<Arc<dyn TokenCache>>,
    pub consumer_stats: Option<Arc<ConsumerStats>>,
}

impl AppState {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: Arc::from(service_name),
            cache: None,
            consumer_stats: None,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    service: &'a str,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            service: &state.service_name,
        }),
    )
        .into_response()
}

/// Prometheus scrape endpoint. Gauges are refreshed before rendering.
pub async fn metrics(State(state): State<AppState>) -> Response {
    if let Some(cache) = &state.cache {
        record_cache_stats(&cache.stats());
    }
    if let Some(stats) = &state.consumer_stats {
        record_consumer_stats(&stats.snapshot());
    }

    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

#[derive(Serialize)]
pub struct WhoAmI {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// `GET /whoami` - echoes the caller resolved by the auth gate.
pub async fn whoami(Caller(identity): Caller) -> Json<WhoAmI> {
    Json(WhoAmI {
        id: identity.id.clone(),
        email: identity.email.clone(),
        username: identity.username.clone(),
    })
}
