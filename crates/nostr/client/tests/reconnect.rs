//! Connection lifecycle: reconnect after drops, manual close, unreachable relays.

mod common;

use common::{MockRelay, WAIT, eventually, settle, text_note, unreachable_url};
use nostr::Filter;
use nostr_client::{ConnectionState, PoolConfig, RelayConfig, RelayConnection, RelayPool, RelayStatus};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

fn fast_reconnect() -> PoolConfig {
    PoolConfig {
        relay: RelayConfig {
            reconnect_delay_ms: 50,
            max_reconnect_delay_ms: 200,
            connect_timeout_ms: 1_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn connect(pool: &RelayPool, relay: &MockRelay) -> RelayConnection {
    pool.add(relay.url()).await.unwrap();
    let conn = pool.connection(relay.url()).await.unwrap();
    assert!(eventually(|| conn.is_open()).await);
    conn
}

#[tokio::test]
async fn test_reconnects_after_unexpected_close() {
    let relay = MockRelay::start().await;
    let pool = RelayPool::new(fast_reconnect());
    let mut status = pool.status_events();
    let conn = connect(&pool, &relay).await;

    let filters = vec![Filter::new().kinds(vec![1])];
    pool.subscribe("main", &filters).await;
    assert!(eventually(|| relay.received_tagged("REQ").len() == 1).await);

    relay.drop_connections();

    // Closed, then a fresh Connecting, then Open again on the same URL.
    let mut seen = Vec::new();
    timeout(WAIT, async {
        while let Ok(RelayStatus { url, state }) = status.recv().await {
            assert_eq!(url, conn.url());
            seen.push(state);
            if seen.ends_with(&[
                ConnectionState::Closed,
                ConnectionState::Connecting,
                ConnectionState::Open,
            ]) {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert!(eventually(|| relay.accepted() == 2).await);

    // The old subscription did not survive the socket.
    assert!(!conn.has_subscription("main"));
    assert_eq!(pool.subscribe("main", &filters).await, 1);
    assert!(eventually(|| relay.received_tagged("REQ").len() == 2).await);
}

#[tokio::test]
async fn test_no_reconnect_when_disabled() {
    let relay = MockRelay::start().await;
    let mut config = fast_reconnect();
    config.relay.reconnect = false;
    let pool = RelayPool::new(config);
    let conn = connect(&pool, &relay).await;

    relay.drop_connections();
    assert!(eventually(|| conn.state() == ConnectionState::Closed).await);
    settle().await;

    assert_eq!(relay.accepted(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_manual_close_suppresses_reconnect() {
    let relay = MockRelay::start().await;
    let pool = RelayPool::new(fast_reconnect());
    let conn = connect(&pool, &relay).await;

    conn.close();
    timeout(WAIT, conn.join()).await.unwrap();
    settle().await;

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(relay.accepted(), 1);
    assert!(conn.subscribe("main", &[Filter::new()]).is_err());
}

#[tokio::test]
async fn test_reopen_after_manual_close() {
    let relay = MockRelay::start().await;
    let pool = RelayPool::new(fast_reconnect());
    let conn = connect(&pool, &relay).await;

    conn.close();
    timeout(WAIT, conn.join()).await.unwrap();

    conn.open();
    assert!(eventually(|| conn.is_open()).await);
    assert!(conn.subscribe("main", &[Filter::new()]).unwrap());
    assert!(eventually(|| relay.received_tagged("REQ").len() == 1).await);
}

#[tokio::test]
async fn test_reopen_immediately_after_close() {
    let relay = MockRelay::start().await;
    let pool = RelayPool::new(fast_reconnect());
    let conn = connect(&pool, &relay).await;

    // No join: the old driver is still winding down when open() runs.
    conn.close();
    conn.open();

    assert!(!conn.is_manually_closed());
    assert!(eventually(|| relay.accepted() == 2 && conn.is_open()).await);
    assert!(conn.subscribe("main", &[Filter::new()]).unwrap());
    assert!(eventually(|| relay.received_tagged("REQ").len() == 1).await);
}

#[tokio::test]
async fn test_unreachable_relay_keeps_pool_usable() {
    let live = MockRelay::start().await;
    let dead = unreachable_url().await;
    let pool = RelayPool::new(fast_reconnect());

    assert!(pool.add(&dead).await.unwrap());
    let live_conn = connect(&pool, &live).await;
    let dead_conn = pool.connection(&dead).await.unwrap();

    assert!(!dead_conn.is_open());
    assert_eq!(pool.connected_count().await, 1);
    assert!(pool.send_event(text_note("abc")).await.is_ok());
    assert!(eventually(|| live.received_tagged("EVENT").len() == 1).await);
    assert!(live_conn.is_open());

    // Still retrying in the background.
    assert!(!dead_conn.is_manually_closed());
    pool.close_all().await;
}

#[tokio::test]
async fn test_backoff_gives_up_after_max_attempts() {
    let dead = unreachable_url().await;
    let config = RelayConfig {
        reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 20,
        max_reconnect_attempts: 2,
        connect_timeout_ms: 500,
        ..Default::default()
    };
    let conn = RelayConnection::new(&dead, config).unwrap();
    let mut states = conn.watch_state();

    conn.open();
    timeout(WAIT, conn.join()).await.unwrap();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_frames_queued_while_connecting_are_flushed() {
    let relay = MockRelay::start().await;
    let conn = RelayConnection::new(relay.url(), RelayConfig::default()).unwrap();

    assert!(conn.subscribe("main", &[Filter::new().kinds(vec![1])]).unwrap());
    conn.send_event(&text_note("abc")).unwrap();
    conn.open();

    assert!(eventually(|| relay.received().len() == 2).await);
    let frames = relay.received();
    assert!(frames[0].starts_with(r#"["REQ","main""#));
    assert!(frames[1].starts_with(r#"["EVENT",{"#));

    conn.close();
    timeout(WAIT, conn.join()).await.unwrap();
}
