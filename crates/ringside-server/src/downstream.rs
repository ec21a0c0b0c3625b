//! Downstream service wiring.
//!
//! A downstream service owns a token cache, keeps it current from the
//! session event channel, and guards its routes with the auth gate.

use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use ringside_auth::{GateState, IdentityVerifier, TokenCache, auth_gate, create_token_cache};
use ringside_events::{ConsumerStats, EventSource, TokenCacheConsumer, spawn_cache_sweeper};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::handlers::{self, AppState};

/// Background tasks owned by a running service.
#[derive(Default)]
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancels every task and waits for them to finish.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// A gated downstream router plus the state backing it.
pub struct DownstreamService {
    /// Service routes, `/health` and `/whoami`, behind the auth gate.
    pub router: Router,
    pub cache: Arc<dyn TokenCache>,
    /// `None` when the cache is disabled and no consumer runs.
    pub consumer_stats: Option<Arc<ConsumerStats>>,
    pub tasks: BackgroundTasks,
}

impl DownstreamService {
    /// State for the health and metrics endpoints.
    pub fn app_state(&self, service_name: &str) -> AppState {
        AppState {
            cache: Some(Arc::clone(&self.cache)),
            consumer_stats: self.consumer_stats.clone(),
            ..AppState::new(service_name)
        }
    }
}

/// Starts the consumer and cache sweeper and wraps `routes` in the auth gate.
///
/// Must be called from within a Tokio runtime.
pub fn start_downstream(
    config: &AppConfig,
    source: Arc<dyn EventSource>,
    verifier: Arc<dyn IdentityVerifier>,
    routes: Router,
    shutdown: CancellationToken,
) -> DownstreamService {
    let cache = create_token_cache(&config.cache);
    let mut tasks = BackgroundTasks::new(shutdown.clone());

    let consumer_stats = if config.cache.enabled {
        let consumer = TokenCacheConsumer::from_config(source, Arc::clone(&cache), &config.channel);
        let stats = consumer.stats();
        tasks.push(consumer.spawn(shutdown.child_token()));
        tasks.push(spawn_cache_sweeper(
            Arc::clone(&cache),
            config.cache.sweep_interval,
            shutdown.child_token(),
        ));
        Some(stats)
    } else {
        tracing::warn!("Token cache disabled, every protected request is verified remotely");
        None
    };

    let gate = GateState::new(Arc::clone(&cache), verifier, &config.gate);

    let mut service = DownstreamService {
        router: Router::new(),
        cache,
        consumer_stats,
        tasks,
    };

    let health = Router::new()
        .route(&config.gate.health_path, get(handlers::health))
        .with_state(service.app_state(&config.service.name));

    service.router = routes
        .route("/whoami", get(handlers::whoami))
        .merge(health)
        .layer(middleware::from_fn_with_state(gate, auth_gate));

    tracing::info!(
        service = %config.service.name,
        cache_enabled = config.cache.enabled,
        public_prefixes = ?config.gate.public_prefixes,
        "Downstream service started"
    );

    service
}
