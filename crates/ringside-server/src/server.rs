use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware, routing::get};
use ringside_auth::HttpIdentityVerifier;
use ringside_events::{RedisStreamChannel, TokenPublisher};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, CorsConfig, ServiceRole};
use crate::downstream::{BackgroundTasks, start_downstream};
use crate::handlers::{self, AppState};
use crate::issuer::{self, InMemoryUserDirectory, IssuerState, SessionStore};
use crate::{metrics as app_metrics, middleware as app_middleware};

pub struct RingsideServer {
    addr: SocketAddr,
    app: Router,
    tasks: BackgroundTasks,
}

/// Wraps a role router with `/metrics` and the shared middleware stack.
pub fn build_app(cfg: &AppConfig, routes: Router, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    let metrics = Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(state);

    let app = routes
        .merge(metrics)
        // Last layer runs first: body limit, request id, trace, http metrics
        .layer(middleware::from_fn(app_metrics::http_metrics))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit));

    // Outermost, so preflights are answered before the auth gate sees them.
    match cors_layer(&cfg.server.cors) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

/// CORS policy for browser clients; `None` when disabled.
///
/// Credentials are allowed, so origins, methods and headers are mirrored
/// from the request instead of answered with `*`.
pub fn cors_layer(cfg: &CorsConfig) -> Option<CorsLayer> {
    if !cfg.enabled {
        return None;
    }
    let origins = if cfg.allow_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            cfg.allow_origins
                .iter()
                .filter(|o| o.trim() != "*")
                .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok()),
        )
    };
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}

/// Builds the issuing service router.
pub fn build_issuer(cfg: &AppConfig, publisher: TokenPublisher) -> (Router, Arc<SessionStore>) {
    let sessions = Arc::new(SessionStore::new(cfg.issuer.session_ttl));
    let state = IssuerState::new(
        Arc::new(InMemoryUserDirectory::new()),
        Arc::clone(&sessions),
        publisher,
    );
    let health = Router::new()
        .route(&cfg.gate.health_path, get(handlers::health))
        .with_state(AppState::new(&cfg.service.name));
    (issuer::routes(state).merge(health), sessions)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    routes: Router,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            routes: Router::new(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Service routes placed behind the auth gate (downstream role only).
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = routes;
        self
    }

    /// Connects the role's collaborators and assembles the router.
    ///
    /// Background tasks are spawned here, so this must run inside a Tokio runtime.
    pub fn build(self) -> anyhow::Result<RingsideServer> {
        let cfg = self.config;
        let shutdown = CancellationToken::new();
        let channel = Arc::new(RedisStreamChannel::new(
            &cfg.channel,
            cfg.consumer_group(),
            cfg.consumer_name(),
        )?);

        tracing::info!(
            role = %cfg.service.role,
            service = %cfg.service.name,
            stream = %cfg.channel.stream,
            "Building server"
        );

        let (app, tasks) = match cfg.service.role {
            ServiceRole::Issuer => {
                let publisher = TokenPublisher::from_config(channel, &cfg.channel);
                let (routes, sessions) = build_issuer(&cfg, publisher);
                let mut tasks = BackgroundTasks::new(shutdown.clone());
                tasks.push(issuer::spawn_session_sweeper(
                    sessions,
                    cfg.cache.sweep_interval,
                    shutdown.child_token(),
                ));
                let state = AppState::new(&cfg.service.name);
                (build_app(&cfg, routes, state), tasks)
            }
            ServiceRole::Downstream => {
                let verifier =
                    HttpIdentityVerifier::new(&cfg.gate.issuer_url()?, cfg.gate.verify_timeout)?;
                let service = start_downstream(
                    &cfg,
                    channel,
                    Arc::new(verifier),
                    self.routes,
                    shutdown,
                );
                let state = service.app_state(&cfg.service.name);
                (build_app(&cfg, service.router, state), service.tasks)
            }
        };

        Ok(RingsideServer {
            addr: self.addr,
            app,
            tasks,
        })
    }
}

impl RingsideServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        self.tasks.stop().await;
        tracing::info!("background tasks stopped");
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
