use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    middleware::from_fn_with_state,
    routing::get,
};
use ringside_auth::{
    Caller, GateConfig, GateState, HttpIdentityVerifier, IdentityVerifier, LocalTokenCache,
    OptionalCaller, TokenCache, VerifyError, auth_gate,
};
use ringside_core::{Identity, LoginData};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Verifier that counts calls and answers from a fixed behaviour.
struct CountingVerifier {
    calls: AtomicUsize,
    behaviour: Behaviour,
}

enum Behaviour {
    Accept(Identity),
    Reject(u16),
    Fail,
    Hang,
}

impl CountingVerifier {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            behaviour,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for CountingVerifier {
    async fn verify(&self, _token: &str) -> Result<Identity, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Accept(identity) => Ok(identity.clone()),
            Behaviour::Reject(status) => Err(VerifyError::Rejected { status: *status }),
            Behaviour::Fail => Err(VerifyError::unavailable("connection refused")),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(VerifyError::unavailable("unreachable"))
            }
        }
    }
}

fn gate_config() -> GateConfig {
    GateConfig {
        public_prefixes: vec!["/matches".into(), "/ratings/top".into()],
        verify_timeout: Duration::from_millis(200),
        ..GateConfig::default()
    }
}

fn app(cache: Arc<dyn TokenCache>, verifier: Arc<dyn IdentityVerifier>) -> Router {
    let state = GateState::new(cache, verifier, &gate_config());
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/matches",
            get(|OptionalCaller(caller): OptionalCaller| async move {
                caller.map(|c| c.email.clone()).unwrap_or_else(|| "anonymous".into())
            })
            .post(|Caller(caller): Caller| async move { caller.email.clone() }),
        )
        .route(
            "/wrestlers",
            get(|Caller(caller): Caller| async move { caller.email.clone() }),
        )
        .layer(from_fn_with_state(state, auth_gate))
}

fn seeded_cache(token: &str, email: &str) -> Arc<LocalTokenCache> {
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    cache.put(token.to_string(), LoginData::new(email, token).identity());
    cache
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn cached_token_is_resolved_without_fallback() {
    let cache = seeded_cache("tok123", "a@x.com");
    let verifier = CountingVerifier::new(Behaviour::Fail);

    let response = app(cache, verifier.clone())
        .oneshot(get_with_token("/wrestlers", "tok123"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "a@x.com");
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn cache_miss_calls_issuer_once_and_populates_cache() {
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let verifier = CountingVerifier::new(Behaviour::Accept(
        Identity::new("7", "b@x.com").with_username("bob"),
    ));
    let app = app(cache.clone(), verifier.clone());

    let response = app
        .clone()
        .oneshot(get_with_token("/wrestlers", "fresh"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "b@x.com");
    assert_eq!(verifier.calls(), 1);

    // Second request is served from the cache.
    let response = app
        .oneshot(get_with_token("/wrestlers", "fresh"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(verifier.calls(), 1);
    assert_eq!(cache.get("fresh").unwrap().id, "7");
}

#[tokio::test]
async fn populate_on_verify_can_be_disabled() {
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let verifier = CountingVerifier::new(Behaviour::Accept(Identity::new("7", "b@x.com")));
    let config = GateConfig {
        populate_on_verify: false,
        ..gate_config()
    };
    let state = GateState::new(cache.clone(), verifier.clone(), &config);

    let mut headers = axum::http::HeaderMap::new();
    headers.insert(header::AUTHORIZATION, "Bearer fresh".parse().unwrap());
    state.authenticate(&headers).await.unwrap();
    state.authenticate(&headers).await.unwrap();

    assert_eq!(verifier.calls(), 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn missing_header_is_rejected_without_fallback() {
    let verifier = CountingVerifier::new(Behaviour::Fail);
    let response = app(Arc::new(LocalTokenCache::new(Duration::from_secs(60))), verifier.clone())
        .oneshot(Request::builder().uri("/wrestlers").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    let json = body_json(response).await;
    assert_eq!(json["detail"], "Not authenticated");
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn malformed_header_is_rejected_without_fallback() {
    let verifier = CountingVerifier::new(Behaviour::Fail);
    let request = Request::builder()
        .uri("/wrestlers")
        .header(header::AUTHORIZATION, "Token tok123")
        .body(Body::empty())
        .unwrap();

    let response = app(Arc::new(LocalTokenCache::new(Duration::from_secs(60))), verifier.clone())
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "invalid_credentials");
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn rejected_token_is_invalid_credentials() {
    let verifier = CountingVerifier::new(Behaviour::Reject(401));
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(60)));

    let response = app(cache.clone(), verifier.clone())
        .oneshot(get_with_token("/wrestlers", "bogus"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["detail"], "Invalid token");
    assert_eq!(verifier.calls(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn unreachable_issuer_is_service_unavailable() {
    let verifier = CountingVerifier::new(Behaviour::Fail);

    let response = app(Arc::new(LocalTokenCache::new(Duration::from_secs(60))), verifier)
        .oneshot(get_with_token("/wrestlers", "unknown"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_json(response).await["code"], "auth_service_unavailable");
}

#[tokio::test]
async fn hanging_issuer_times_out_as_service_unavailable() {
    let verifier = CountingVerifier::new(Behaviour::Hang);

    let started = std::time::Instant::now();
    let response = app(Arc::new(LocalTokenCache::new(Duration::from_secs(60))), verifier.clone())
        .oneshot(get_with_token("/wrestlers", "slow"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn health_and_public_reads_bypass_the_gate() {
    let verifier = CountingVerifier::new(Behaviour::Fail);
    let app = app(Arc::new(LocalTokenCache::new(Duration::from_secs(60))), verifier.clone());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A public read ignores even an unknown token.
    let response = app
        .clone()
        .oneshot(get_with_token("/matches", "unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "anonymous");

    // Writes to a public prefix are protected.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/matches")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(verifier.calls(), 0);
}

#[tokio::test]
async fn http_verifier_against_issuer() {
    let issuer = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header_matcher("authorization", "Bearer good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 3,
            "email": "c@x.com",
            "username": "carol",
            "is_active": true,
            "created_at": "2024-01-01T00:00:00"
        })))
        .expect(1)
        .mount(&issuer)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header_matcher("authorization", "Bearer bad"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Could not validate credentials"
        })))
        .mount(&issuer)
        .await;

    let base = url::Url::parse(&issuer.uri()).unwrap();
    let verifier = Arc::new(HttpIdentityVerifier::new(&base, Duration::from_secs(2)).unwrap());
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(60)));
    let app = app(cache.clone(), verifier);

    let response = app
        .clone()
        .oneshot(get_with_token("/wrestlers", "good"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "c@x.com");
    assert_eq!(cache.get("good").unwrap().id, "3");

    // Served from the cache; the mock expects exactly one call.
    let response = app
        .clone()
        .oneshot(get_with_token("/wrestlers", "good"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_with_token("/wrestlers", "bad"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_verifier_unreadable_body_is_unavailable() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&issuer)
        .await;

    let base = url::Url::parse(&issuer.uri()).unwrap();
    let verifier = HttpIdentityVerifier::new(&base, Duration::from_secs(2)).unwrap();

    assert!(matches!(
        verifier.verify("any").await,
        Err(VerifyError::Unavailable { .. })
    ));
}

#[tokio::test]
async fn http_verifier_connection_refused_is_unavailable() {
    // Nothing listens on port 9 of localhost in test environments.
    let base = url::Url::parse("http://127.0.0.1:9").unwrap();
    let verifier = HttpIdentityVerifier::new(&base, Duration::from_secs(2)).unwrap();

    assert!(matches!(
        verifier.verify("any").await,
        Err(VerifyError::Unavailable { .. })
    ));
}

#[test]
fn concurrent_readers_never_observe_torn_entries() {
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let tokens: Vec<String> = (0..32).map(|i| format!("tok{i}")).collect();

    std::thread::scope(|scope| {
        for round in 0..4 {
            let cache = Arc::clone(&cache);
            let tokens = &tokens;
            scope.spawn(move || {
                for _ in 0..200 {
                    for token in tokens {
                        let identity = Identity::new(format!("{token}-{round}"), format!("{token}@x.com"));
                        cache.put(token.clone(), identity);
                    }
                }
            });
        }

        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let tokens = &tokens;
            scope.spawn(move || {
                for _ in 0..200 {
                    for token in tokens {
                        if let Some(identity) = cache.get(token) {
                            assert_eq!(identity.email, format!("{token}@x.com"));
                            assert!(identity.id.starts_with(&format!("{token}-")));
                        }
                    }
                }
            });
        }
    });

    assert_eq!(cache.len(), tokens.len());
}
