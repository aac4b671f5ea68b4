//! Connection manager behaviour driven through the in-memory transport with a
//! paused clock, so every reconnect delay and heartbeat is exact.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lib_realtime::transport::memory::{self, MemoryPeer, MemoryServer, PeerFrame};
use lib_realtime::transport::{Connector, Link, LinkEvent};
use lib_realtime::{
    ChannelClient, ClientConfig, ConnectionEvent, ConnectionState, MessageKind, Notification,
    OutboundMessage, TransportError,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

const BASE: Duration = Duration::from_millis(1000);

fn config(max_attempts: u32) -> ClientConfig {
    ClientConfig {
        url: "ws://memory.test/ws".to_string(),
        auto_connect: false,
        reconnect_interval: BASE.as_millis() as u64,
        max_reconnect_attempts: max_attempts,
        ..ClientConfig::default()
    }
}

fn memory_client(config: ClientConfig) -> (ChannelClient, MemoryServer) {
    let (connector, server) = memory::pair();
    (ChannelClient::with_connector(config, Arc::new(connector)), server)
}

async fn accept_next(server: &mut MemoryServer, client: &ChannelClient) -> MemoryPeer {
    let attempt = server.next_attempt().await.expect("connection attempt");
    let peer = attempt.accept();
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .expect("manager alive");
    peer
}

async fn connect(server: &mut MemoryServer, client: &ChannelClient) -> MemoryPeer {
    client.connect();
    accept_next(server, client).await
}

async fn next_schedule(events: &mut broadcast::Receiver<ConnectionEvent>) -> (u32, Duration) {
    loop {
        match events.recv().await.expect("event stream open") {
            ConnectionEvent::ReconnectScheduled { attempt, delay } => return (attempt, delay),
            _ => continue,
        }
    }
}

async fn next_notice(events: &mut broadcast::Receiver<ConnectionEvent>) -> Notification {
    loop {
        match events.recv().await.expect("event stream open") {
            ConnectionEvent::Notice(notice) => return notice,
            _ => continue,
        }
    }
}

/// Channel named in a subscribe/unsubscribe request.
fn requested_channel(message: &lib_realtime::Message) -> String {
    message.data["channel"].as_str().unwrap_or_default().to_string()
}

async fn expect_no_attempt(server: &mut MemoryServer) {
    assert!(
        timeout(Duration::from_secs(3600), server.next_attempt())
            .await
            .is_err(),
        "no reconnect attempt may run"
    );
}

#[tokio::test(start_paused = true)]
async fn unclean_close_backs_off_then_gives_up() {
    let (client, mut server) = memory_client(config(3));
    let mut events = client.events();
    let peer = connect(&mut server, &client).await;

    peer.close_unclean();

    let mut delays = Vec::new();
    for expected_attempt in 1..=3 {
        let (attempt, delay) = next_schedule(&mut events).await;
        assert_eq!(attempt, expected_attempt);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        delays.push(delay);

        // Nothing happens before the delay has elapsed.
        let scheduled_at = Instant::now();
        assert!(
            timeout(delay - Duration::from_millis(1), server.next_attempt())
                .await
                .is_err()
        );
        let attempt = server.next_attempt().await.expect("reconnect attempt");
        assert!(scheduled_at.elapsed() >= delay - Duration::from_millis(1));
        attempt.refuse("server down");
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(1500),
            Duration::from_millis(2250)
        ]
    );

    assert_eq!(
        next_notice(&mut events).await,
        Notification::RetriesExhausted { attempts: 3 }
    );
    assert_eq!(client.state(), ConnectionState::Error);
    expect_no_attempt(&mut server).await;
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test(start_paused = true)]
async fn five_attempts_grow_by_half() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    let peer = connect(&mut server, &client).await;
    peer.close_unclean();

    let mut delays = Vec::new();
    for _ in 0..5 {
        let (_, delay) = next_schedule(&mut events).await;
        delays.push(delay);
        server.next_attempt().await.expect("attempt").refuse("down");
    }

    for (k, delay) in delays.iter().enumerate() {
        assert_eq!(*delay, BASE.mul_f64(1.5f64.powi(k as i32)));
    }
    assert!(delays.windows(2).all(|w| w[0] < w[1]));
    client.wait_for_state(ConnectionState::Error).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn successful_connect_resets_attempts() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    let peer = connect(&mut server, &client).await;

    peer.close_unclean();
    assert_eq!(next_schedule(&mut events).await.0, 1);
    server.next_attempt().await.unwrap().refuse("down");
    assert_eq!(next_schedule(&mut events).await.0, 2);

    let peer = accept_next(&mut server, &client).await;
    peer.close_unclean();
    assert_eq!(next_schedule(&mut events).await, (1, BASE));
}

#[tokio::test(start_paused = true)]
async fn clean_server_close_does_not_reconnect() {
    let (client, mut server) = memory_client(config(5));
    let peer = connect(&mut server, &client).await;

    peer.close_clean();
    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    expect_no_attempt(&mut server).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    let peer = connect(&mut server, &client).await;

    peer.close_unclean();
    next_schedule(&mut events).await;
    client.disconnect();

    client
        .wait_for_state(ConnectionState::Disconnected)
        .await
        .unwrap();
    expect_no_attempt(&mut server).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_queued_behind_drop_stays_disconnected() {
    let (client, mut server) = memory_client(config(5));
    let peer = connect(&mut server, &client).await;

    peer.close_unclean();
    client.disconnect();

    expect_no_attempt(&mut server).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_link_cleanly() {
    let (client, mut server) = memory_client(config(5));
    let mut peer = connect(&mut server, &client).await;

    client.disconnect();
    assert_eq!(peer.recv().await, Some(PeerFrame::Close));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn replays_exact_registry_after_connect() {
    let (client, mut server) = memory_client(config(5));

    client.subscribe("fire_updates");
    client.subscribe("weather_updates");
    client.subscribe("sensor_readings");
    client.unsubscribe("weather_updates");
    client.subscribe("alerts");
    client.subscribe("fire_updates");
    client.unsubscribe("never_subscribed");

    let mut peer = connect(&mut server, &client).await;
    let mut requested = Vec::new();
    for _ in 0..3 {
        let message = peer.recv_message().await.expect("subscribe request");
        assert_eq!(message.kind, MessageKind::Subscribe);
        requested.push(requested_channel(&message));
    }
    assert_eq!(requested, vec!["fire_updates", "sensor_readings", "alerts"]);
    assert_eq!(client.subscribed_channels(), requested);

    tokio::task::yield_now().await;
    assert!(peer.drain().is_empty(), "no extra requests");
}

#[tokio::test(start_paused = true)]
async fn resubscribes_after_reconnect() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    let mut peer = connect(&mut server, &client).await;

    client.subscribe("fire_updates");
    client.subscribe("weather_updates");
    assert_eq!(requested_channel(&peer.recv_message().await.unwrap()), "fire_updates");
    assert_eq!(requested_channel(&peer.recv_message().await.unwrap()), "weather_updates");

    peer.close_unclean();
    next_schedule(&mut events).await;
    client.unsubscribe("fire_updates");

    let mut peer = accept_next(&mut server, &client).await;
    let message = peer.recv_message().await.unwrap();
    assert_eq!(message.kind, MessageKind::Subscribe);
    assert_eq!(requested_channel(&message), "weather_updates");
    tokio::task::yield_now().await;
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_connected_is_sent_immediately() {
    let (client, mut server) = memory_client(config(5));
    let mut peer = connect(&mut server, &client).await;

    client.subscribe("fire_updates");
    client.subscribe("fire_updates");
    client.unsubscribe("fire_updates");

    let kinds: Vec<MessageKind> = vec![
        peer.recv_message().await.unwrap().kind,
        peer.recv_message().await.unwrap().kind,
        peer.recv_message().await.unwrap().kind,
    ];
    assert_eq!(
        kinds,
        vec![MessageKind::Subscribe, MessageKind::Subscribe, MessageKind::Unsubscribe]
    );
    assert!(client.subscribed_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dispatch_is_isolated_per_channel() {
    let (client, mut server) = memory_client(config(5));
    let mut fire_a = client.open_channel("fire_updates");
    let mut fire_b = client.open_channel("fire_updates");
    let mut weather = client.open_channel("weather_updates");
    let peer = connect(&mut server, &client).await;

    peer.send_json(&json!({
        "type": "fire_detected",
        "channel": "fire_updates",
        "data": {"id": 7},
        "timestamp": "2024-07-01T00:00:00.000Z"
    }));
    peer.send_json(&json!({
        "type": "weather_data",
        "channel": "weather_updates",
        "data": {"temp": 15}
    }));

    assert_eq!(fire_a.recv().await.unwrap().data["id"], 7);
    assert_eq!(fire_b.recv().await.unwrap().data["id"], 7);
    assert_eq!(weather.recv().await.unwrap().data["temp"], 15);

    assert_eq!(fire_a.read().len(), 1);
    assert_eq!(fire_b.read().len(), 1);
    let weather_seen = weather.read();
    assert_eq!(weather_seen.len(), 1);
    assert_eq!(weather_seen[0].channel.as_deref(), Some("weather_updates"));

    let last = client.last_message().expect("last message");
    assert_eq!(last.kind, MessageKind::Topic("weather_data".to_string()));
}

#[tokio::test(start_paused = true)]
async fn feed_buffer_keeps_most_recent() {
    let (client, mut server) = memory_client(config(5));
    let mut feed = client.open_channel_with_capacity("sensor_readings", 50);
    let peer = connect(&mut server, &client).await;

    for seq in 0..=50 {
        peer.send_json(&json!({
            "type": "sensor_reading",
            "channel": "sensor_readings",
            "data": {"seq": seq}
        }));
    }
    while feed.recv().await.unwrap().data["seq"] != 50 {}
    assert_eq!(feed.len(), 50);

    let seen: Vec<u64> = feed
        .read()
        .iter()
        .map(|m| m.data["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seen, (1..=50).collect::<Vec<_>>());

    feed.clear();
    assert!(feed.read().is_empty());
}

#[tokio::test(start_paused = true)]
async fn last_feed_dispose_unsubscribes() {
    let (client, mut server) = memory_client(config(5));
    let mut peer = connect(&mut server, &client).await;

    let mut first = client.open_channel("fire_updates");
    let second = client.open_channel("fire_updates");
    let message = peer.recv_message().await.unwrap();
    assert_eq!(message.kind, MessageKind::Subscribe);
    assert!(first.is_connected());

    first.dispose();
    first.dispose();
    tokio::task::yield_now().await;
    assert!(peer.drain().is_empty(), "another feed still needs the channel");
    assert_eq!(client.subscribed_channels(), vec!["fire_updates"]);

    drop(second);
    let message = peer.recv_message().await.unwrap();
    assert_eq!(message.kind, MessageKind::Unsubscribe);
    assert_eq!(requested_channel(&message), "fire_updates");
    assert!(client.subscribed_channels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_while_connected() {
    let (client, mut server) = memory_client(config(5));
    let started = Instant::now();
    let mut peer = connect(&mut server, &client).await;

    for n in 1..=2u32 {
        match peer.recv().await.expect("frame") {
            PeerFrame::Text(text) => {
                let message = lib_realtime::Message::from_text(&text).unwrap();
                assert_eq!(message.kind, MessageKind::Ping);
                assert!(message.data["timestamp"].as_str().is_some());
            }
            other => panic!("expected ping, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(30) * n);
    }

    peer.send_json(&json!({"type": "pong"}));
    tokio::task::yield_now().await;
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn silent_peer_trips_pong_timeout() {
    let mut cfg = config(5);
    cfg.heartbeat_interval = 30_000;
    cfg.pong_timeout = Some(45_000);
    let (client, mut server) = memory_client(cfg);
    let mut events = client.events();
    let _peer = connect(&mut server, &client).await;

    match next_notice(&mut events).await {
        Notification::HeartbeatTimeout { silent_for } => {
            assert!(silent_for > Duration::from_secs(45))
        }
        other => panic!("unexpected notice {other:?}"),
    }
    assert_eq!(next_schedule(&mut events).await, (1, BASE));
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_link_alive() {
    let mut cfg = config(5);
    cfg.pong_timeout = Some(45_000);
    let (client, mut server) = memory_client(cfg);
    let mut peer = connect(&mut server, &client).await;

    for _ in 0..4 {
        assert!(matches!(peer.recv().await, Some(PeerFrame::Text(_))));
        peer.send_json(&json!({"type": "pong"}));
    }
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_is_dropped() {
    let (client, mut server) = memory_client(config(5));

    client.send(OutboundMessage::new("chat", json!({"text": "lost"})).on_channel("chat"));
    let mut peer = connect(&mut server, &client).await;
    client.send(OutboundMessage::new("chat", json!({"text": "delivered"})).on_channel("chat"));

    let message = peer.recv_message().await.unwrap();
    assert_eq!(message.data["text"], "delivered");
    assert_eq!(message.channel.as_deref(), Some("chat"));
    assert!(!message.timestamp.is_empty());
}

#[tokio::test(start_paused = true)]
async fn server_error_frame_becomes_notice() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    let peer = connect(&mut server, &client).await;

    peer.send_json(&json!({"type": "error", "data": {"message": "unknown channel"}}));
    assert_eq!(
        next_notice(&mut events).await,
        Notification::ServerError {
            message: "unknown channel".to_string()
        }
    );
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped() {
    let (client, mut server) = memory_client(config(5));
    let mut feed = client.open_channel("weather_updates");
    let peer = connect(&mut server, &client).await;

    peer.send_text("not json");
    peer.send_json(&json!({"type": "weather_data", "data": {"temp": 1}}));
    peer.send_json(&json!({"type": "", "channel": "weather_updates"}));
    peer.send_json(&json!({"type": "weather_data", "channel": "weather_updates", "data": {"temp": 2}}));

    assert_eq!(feed.recv().await.unwrap().data["temp"], 2);
    assert_eq!(feed.read().len(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn unusable_endpoint_goes_straight_to_error() {
    let (client, mut server) = memory_client(config(5));
    let mut events = client.events();
    client.connect();

    server
        .next_attempt()
        .await
        .unwrap()
        .fail(TransportError::InvalidUrl {
            url: "ws://memory.test/ws".to_string(),
            reason: "bad host".to_string(),
        });

    assert!(matches!(
        next_notice(&mut events).await,
        Notification::EndpointUnusable { .. }
    ));
    assert_eq!(client.state(), ConnectionState::Error);
    expect_no_attempt(&mut server).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_recovers_from_error() {
    let (client, mut server) = memory_client(config(1));
    let mut events = client.events();
    client.subscribe("fire_updates");
    let peer = connect(&mut server, &client).await;
    drop(peer);

    next_schedule(&mut events).await;
    server.next_attempt().await.unwrap().refuse("down");
    client.wait_for_state(ConnectionState::Error).await.unwrap();

    client.reconnect();
    let mut peer = accept_next(&mut server, &client).await;
    let message = peer.recv_message().await.unwrap();
    assert_eq!(requested_channel(&message), "fire_updates");

    peer.close_unclean();
    assert_eq!(next_schedule(&mut events).await, (1, BASE));
}

#[tokio::test(start_paused = true)]
async fn auto_connect_dials_on_construction() {
    let mut cfg = config(5);
    cfg.auto_connect = true;
    let (client, mut server) = memory_client(cfg);

    let attempt = server.next_attempt().await.expect("attempt");
    assert_eq!(attempt.url(), "ws://memory.test/ws");
    assert_eq!(client.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn close_stops_the_manager() {
    let (client, mut server) = memory_client(config(5));
    let mut peer = connect(&mut server, &client).await;
    let mut feed = client.open_channel("fire_updates");
    peer.recv_message().await.unwrap();

    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(peer.recv().await, Some(PeerFrame::Close));
    assert!(feed.recv().await.is_none());
    assert!(client.close().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn explicit_subscription_outlives_feeds() {
    let (client, mut server) = memory_client(config(5));
    let mut peer = connect(&mut server, &client).await;
    client.subscribe("fire_updates");
    assert_eq!(peer.recv_message().await.unwrap().kind, MessageKind::Subscribe);

    let feed = client.open_channel("fire_updates");
    drop(feed);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let unsubscribed = peer
        .drain()
        .iter()
        .any(|frame| matches!(frame, PeerFrame::Text(text) if text.contains(r#""unsubscribe""#)));
    assert!(!unsubscribed, "explicit subscription must survive its feeds");
    assert_eq!(client.subscribed_channels(), vec!["fire_updates"]);

    client.unsubscribe("fire_updates");
    let message = peer.recv_message().await.unwrap();
    assert_eq!(message.kind, MessageKind::Unsubscribe);
    assert!(client.subscribed_channels().is_empty());
}

/// A link whose close handshake never completes.
struct StuckLink;

impl Link for StuckLink {
    fn send_text(
        &mut self,
        _text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn next_event(&mut self) -> Pin<Box<dyn Future<Output = LinkEvent> + Send + '_>> {
        Box::pin(std::future::pending())
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

struct StuckConnector;

impl Connector for StuckConnector {
    fn connect(
        &self,
        _url: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Link>, TransportError>> + Send + 'static>> {
        Box::pin(async { Ok(Box::new(StuckLink) as Box<dyn Link>) })
    }
}

#[tokio::test(start_paused = true)]
async fn hung_close_handshake_does_not_stall_the_manager() {
    let client = ChannelClient::with_connector(config(5), Arc::new(StuckConnector));
    client.connect();
    client
        .wait_for_state(ConnectionState::Connected)
        .await
        .unwrap();

    let mut events = client.events();
    let started = Instant::now();
    client.disconnect();
    client.connect();
    timeout(Duration::from_secs(60), async {
        loop {
            if let ConnectionEvent::Opened = events.recv().await.expect("event stream open") {
                return;
            }
        }
    })
    .await
    .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(client.state(), ConnectionState::Connected);
}
