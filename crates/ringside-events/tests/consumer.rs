use std::sync::Arc;
use std::time::Duration;

use ringside_auth::{LocalTokenCache, TokenCache};
use ringside_core::{LoginData, SESSION_EVENTS_QUEUE, SessionEvent};
use ringside_events::{
    EventSink, InMemoryChannel, PublishOutcome, PublishRetryConfig, ReconnectConfig,
    TokenCacheConsumer, TokenPublisher,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(2),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn start(
    channel: &InMemoryChannel,
    cache: Arc<LocalTokenCache>,
) -> (
    Arc<ringside_events::ConsumerStats>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    let consumer = TokenCacheConsumer::new(
        Arc::new(channel.clone()),
        cache,
        SESSION_EVENTS_QUEUE,
        reconnect(),
    );
    let stats = consumer.stats();
    let shutdown = CancellationToken::new();
    let handle = consumer.spawn(shutdown.clone());
    (stats, shutdown, handle)
}

#[tokio::test(start_paused = true)]
async fn login_event_reaches_cache() {
    let channel = InMemoryChannel::new();
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (_, shutdown, handle) = start(&channel, cache.clone());

    channel
        .publish(
            SESSION_EVENTS_QUEUE,
            r#"{"event_name":"UserLoggedIn","data":{"email":"a@x.com","token":"tok123"}}"#,
        )
        .await
        .unwrap();

    wait_until(|| cache.get("tok123").is_some()).await;
    assert_eq!(cache.get("tok123").unwrap().email, "a@x.com");
    wait_until(|| channel.pending_count(SESSION_EVENTS_QUEUE) == 0).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn consumer_survives_subscribe_failures() {
    let channel = InMemoryChannel::new();
    channel.fail_next_subscribes(3);
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (stats, shutdown, handle) = start(&channel, cache.clone());

    wait_until(|| channel.subscribe_count() == 1).await;
    assert_eq!(stats.snapshot().reconnects, 3);

    channel
        .publish(
            SESSION_EVENTS_QUEUE,
            &SessionEvent::logged_in(&LoginData::new("b@x.com", "late"))
                .to_json()
                .unwrap(),
        )
        .await
        .unwrap();
    wait_until(|| cache.get("late").is_some()).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn consumer_reconnects_after_outage() {
    let channel = InMemoryChannel::new();
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (stats, shutdown, handle) = start(&channel, cache.clone());
    wait_until(|| channel.subscribe_count() == 1).await;

    channel.set_available(false);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(stats.snapshot().reconnects >= 2);

    channel.set_available(true);
    wait_until(|| channel.subscribe_count() == 2).await;

    channel
        .publish(
            SESSION_EVENTS_QUEUE,
            &SessionEvent::logged_in(&LoginData::new("c@x.com", "after"))
                .to_json()
                .unwrap(),
        )
        .await
        .unwrap();
    wait_until(|| cache.get("after").is_some()).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn poison_and_unknown_events_are_acknowledged() {
    let channel = InMemoryChannel::new();
    channel.inject_raw(SESSION_EVENTS_QUEUE, "definitely not json");
    channel.inject_raw(
        SESSION_EVENTS_QUEUE,
        r#"{"event_name":"UserRenamed","data":{"token":"x"}}"#,
    );
    channel.inject_raw(
        SESSION_EVENTS_QUEUE,
        r#"{"event_name":"UserLoggedIn","data":{"email":"d@x.com","token":"good"}}"#,
    );

    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (stats, shutdown, handle) = start(&channel, cache.clone());

    wait_until(|| cache.get("good").is_some()).await;
    wait_until(|| channel.pending_count(SESSION_EVENTS_QUEUE) == 0).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.malformed, 1);
    assert_eq!(snapshot.ignored, 1);
    assert_eq!(snapshot.applied, 1);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_deliveries_are_replayed_to_next_consumer() {
    let channel = InMemoryChannel::new();
    channel.inject_raw(
        SESSION_EVENTS_QUEUE,
        r#"{"event_name":"UserLoggedIn","data":{"email":"e@x.com","token":"replayed"}}"#,
    );

    // A previous consumer read the entry and died before acknowledging it.
    {
        use ringside_events::{EventSource, Subscription};
        let mut subscription = channel.subscribe(SESSION_EVENTS_QUEUE).await.unwrap();
        assert_eq!(subscription.next_batch().await.unwrap().len(), 1);
    }
    assert_eq!(channel.pending_count(SESSION_EVENTS_QUEUE), 1);

    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (_, shutdown, handle) = start(&channel, cache.clone());

    wait_until(|| cache.get("replayed").is_some()).await;
    wait_until(|| channel.pending_count(SESSION_EVENTS_QUEUE) == 0).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn logout_event_removes_token() {
    let channel = InMemoryChannel::new();
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (_, shutdown, handle) = start(&channel, cache.clone());

    let publisher = TokenPublisher::new(
        Arc::new(channel.clone()),
        SESSION_EVENTS_QUEUE,
        Duration::from_secs(1),
        PublishRetryConfig::default(),
    );
    publisher
        .publish("UserLoggedIn", &json!({"email": "f@x.com", "token": "bye"}))
        .await
        .unwrap();
    wait_until(|| cache.get("bye").is_some()).await;

    publisher
        .publish_event(&SessionEvent::logged_out("bye"))
        .await
        .unwrap();
    wait_until(|| cache.get("bye").is_none()).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn deferred_login_is_delivered_once_channel_recovers() {
    let channel = InMemoryChannel::new();
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (_, shutdown, handle) = start(&channel, cache.clone());
    wait_until(|| channel.subscribe_count() == 1).await;

    channel.set_available(false);
    let publisher = TokenPublisher::new(
        Arc::new(channel.clone()),
        SESSION_EVENTS_QUEUE,
        Duration::from_secs(1),
        PublishRetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
        },
    );
    let outcome = publisher
        .publish_or_defer("UserLoggedIn", &LoginData::new("g@x.com", "deferred"))
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Deferred);

    tokio::time::sleep(Duration::from_secs(1)).await;
    channel.set_available(true);

    wait_until(|| cache.get("deferred").is_some()).await;

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn late_group_replays_only_live_sessions() {
    let channel = InMemoryChannel::new();
    let now = time::OffsetDateTime::now_utc();

    let mut stale = LoginData::new("g@x.com", "stale");
    stale.expires_at = Some(now - time::Duration::minutes(5));
    let mut live = LoginData::new("h@x.com", "live");
    live.expires_at = Some(now + time::Duration::hours(1));
    let ended = LoginData::new("i@x.com", "ended");

    for event in [
        SessionEvent::logged_in(&stale),
        SessionEvent::logged_in(&ended),
        SessionEvent::logged_in(&live),
        SessionEvent::logged_out("ended"),
    ] {
        channel
            .publish(SESSION_EVENTS_QUEUE, &event.to_json().unwrap())
            .await
            .unwrap();
    }

    // The service joins after all four events were appended.
    let cache = Arc::new(LocalTokenCache::new(Duration::from_secs(3600)));
    let (stats, shutdown, handle) = start(&channel, cache.clone());

    wait_until(|| {
        let snapshot = stats.snapshot();
        snapshot.applied + snapshot.ignored == 4
    })
    .await;

    assert!(cache.get("live").is_some());
    assert!(cache.get("stale").is_none());
    assert!(cache.get("ended").is_none());
    assert_eq!(stats.snapshot().ignored, 1);

    shutdown.cancel();
    handle.await.unwrap();
}
