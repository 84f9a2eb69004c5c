//! End-to-end tests for the gateway over real loopback TCP.
//!
//! Every test starts a [`GatewayServer`] on an ephemeral port via
//! `start_with_listener`, connects plain `tokio::net::TcpStream` clients to
//! it and observes two outputs:
//!
//! - the data handler, wired to an mpsc channel, and
//! - the notification stream returned by `GatewayServer::new`.
//!
//! Idle eviction is driven by a [`ManualClock`] plus a direct
//! `evict_idle()` call, so no test waits real minutes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devgate_server::{
    DispatchItem, EventKind, GatewayServer, ManualClock, RegistryError, ServerConfig,
    ServerError, ServerEvent, TextEncoding,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    server: GatewayServer,
    events: UnboundedReceiver<ServerEvent>,
    data: UnboundedReceiver<DispatchItem>,
    clock: Arc<ManualClock>,
    addr: SocketAddr,
}

async fn start_gateway(idle_minutes: u32) -> Harness {
    let (data_tx, data) = unbounded_channel();
    let clock = Arc::new(ManualClock::new());
    let (mut server, events) = GatewayServer::with_clock(
        ServerConfig::new("127.0.0.1", 0),
        move |item: DispatchItem| {
            let _ = data_tx.send(item);
        },
        clock.clone(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server.start_with_listener(listener, idle_minutes).unwrap();
    Harness {
        server,
        events,
        data,
        clock,
        addr,
    }
}

/// Waits until an event of `kind` for `client_id` shows up.
async fn expect_event(
    events: &mut UnboundedReceiver<ServerEvent>,
    kind: EventKind,
    client_id: &str,
) -> ServerEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if event.kind() == kind && event.client_id() == Some(client_id) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} event for {client_id}"))
}

/// Connects a client and waits until the gateway reports it online.
async fn connect(h: &mut Harness) -> (TcpStream, String) {
    let client = TcpStream::connect(h.addr).await.unwrap();
    let id = client.local_addr().unwrap().to_string();
    expect_event(&mut h.events, EventKind::Online, &id).await;
    (client, id)
}

async fn expect_eof(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("peer should observe close")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

// ── Receiving ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ten_bytes_from_client_reach_handler_with_its_id() {
    // Arrange
    let mut h = start_gateway(1).await;
    let client = TcpStream::connect(h.addr).await.unwrap();
    let id = client.local_addr().unwrap().to_string();
    expect_event(&mut h.events, EventKind::Connected, &id).await;
    let mut client = client;

    // Act
    client.write_all(&[0xAA; 10]).await.unwrap();
    let item = timeout(WAIT, h.data.recv()).await.unwrap().unwrap();

    // Assert
    assert_eq!(item.client_id().as_str(), id);
    assert_eq!(item.payload(), &[0xAA; 10]);
    assert_eq!(h.server.connection_count(), 1);
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_data_from_two_clients_is_attributed_correctly() {
    let mut h = start_gateway(1).await;
    let (mut a, id_a) = connect(&mut h).await;
    let (mut b, id_b) = connect(&mut h).await;

    a.write_all(b"from-a").await.unwrap();
    let first = timeout(WAIT, h.data.recv()).await.unwrap().unwrap();
    b.write_all(b"from-b").await.unwrap();
    let second = timeout(WAIT, h.data.recv()).await.unwrap().unwrap();

    assert_eq!((first.client_id().as_str(), first.payload()), (id_a.as_str(), &b"from-a"[..]));
    assert_eq!((second.client_id().as_str(), second.payload()), (id_b.as_str(), &b"from-b"[..]));
    h.server.shutdown().await;
}

// ── Idle eviction ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_silent_client_is_evicted_after_threshold() {
    // Arrange
    let mut h = start_gateway(1).await;
    let (mut client, id) = connect(&mut h).await;
    client.write_all(&[1u8; 10]).await.unwrap();
    timeout(WAIT, h.data.recv()).await.unwrap().unwrap();

    // Act: 61 simulated seconds of silence, then one sweep pass.
    h.clock.advance(Duration::from_secs(61));
    let evicted = h.server.registry().unwrap().evict_idle();

    // Assert
    assert_eq!(evicted, 1);
    expect_event(&mut h.events, EventKind::Offline, &id).await;
    assert_eq!(h.server.connection_count(), 0);
    expect_eof(&mut client).await;
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_client_within_threshold_is_kept() {
    let mut h = start_gateway(1).await;
    let (_client, id) = connect(&mut h).await;

    h.clock.advance(Duration::from_secs(59));
    let evicted = h.server.registry().unwrap().evict_idle();

    assert_eq!(evicted, 0);
    assert!(h.server.registry().unwrap().contains(&id));
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_after_eviction_is_online_again() {
    let mut h = start_gateway(1).await;
    let (_old, id) = connect(&mut h).await;
    h.clock.advance(Duration::from_secs(61));
    h.server.registry().unwrap().evict_idle();
    expect_event(&mut h.events, EventKind::Offline, &id).await;

    let (_new, new_id) = connect(&mut h).await;

    assert_eq!(h.server.connection_count(), 1);
    assert!(h.server.registry().unwrap().contains(&new_id));
    h.server.shutdown().await;
}

// ── Disconnects ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_peer_disconnect_fires_offline_once() {
    // Arrange
    let mut h = start_gateway(1).await;
    let (client, id) = connect(&mut h).await;

    // Act
    drop(client);

    // Assert
    expect_event(&mut h.events, EventKind::Offline, &id).await;
    assert_eq!(h.server.connection_count(), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = h.events.try_recv() {
        assert_ne!(event.kind(), EventKind::Offline, "offline raised twice");
    }
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_remove_client_disconnects_peer() {
    let mut h = start_gateway(1).await;
    let (mut client, id) = connect(&mut h).await;

    let message = h.server.remove_client(&id).unwrap();

    assert!(message.contains(&id));
    expect_event(&mut h.events, EventKind::Offline, &id).await;
    assert_eq!(h.server.connection_count(), 0);
    expect_eof(&mut client).await;
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_remove_unknown_client_is_not_found() {
    let h = start_gateway(1).await;

    let err = h.server.remove_client("127.0.0.1:1").unwrap_err();

    assert!(matches!(
        err,
        ServerError::Registry(RegistryError::NotFound { .. })
    ));
}

// ── Sending ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    // Arrange
    let mut h = start_gateway(1).await;
    let (mut a, _) = connect(&mut h).await;
    let (mut b, _) = connect(&mut h).await;

    // Act
    let delivered = h.server.broadcast(b"\x01\x02\x03\x04").await.unwrap();

    // Assert
    assert_eq!(delivered, 2);
    for client in [&mut a, &mut b] {
        let mut buf = [0u8; 4];
        timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"\x01\x02\x03\x04");
    }
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_send_text_to_uses_requested_encoding() {
    let mut h = start_gateway(1).await;
    let (mut client, id) = connect(&mut h).await;

    h.server
        .send_text_to(&id, "Hi", TextEncoding::Utf16Le)
        .await
        .unwrap();

    let mut buf = [0u8; 4];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, &[b'H', 0, b'i', 0]);
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_send_to_unknown_client_names_the_id() {
    let h = start_gateway(1).await;

    let err = h.server.send_to("127.0.0.1:9", b"x").await.unwrap_err();

    let text = err.to_string();
    assert!(text.contains("127.0.0.1:9"));
    assert!(text.contains("not found"));
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_keeps_existing_clients_receiving() {
    // Arrange
    let mut h = start_gateway(1).await;
    let (mut client, id) = connect(&mut h).await;

    // Act
    h.server.stop();
    client.write_all(b"after-stop").await.unwrap();
    let item = timeout(WAIT, h.data.recv()).await.unwrap().unwrap();

    // Assert
    assert_eq!(item.client_id().as_str(), id);
    assert_eq!(item.payload(), b"after-stop");
    assert_eq!(h.server.connection_count(), 1);
    h.server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_client() {
    let mut h = start_gateway(1).await;
    let (mut a, _) = connect(&mut h).await;
    let (mut b, _) = connect(&mut h).await;

    h.server.shutdown().await;

    expect_eof(&mut a).await;
    expect_eof(&mut b).await;
    assert_eq!(h.server.connection_count(), 0);
}

#[tokio::test]
async fn test_bind_failure_initializes_registry_without_accepting() {
    // Arrange: occupy a port, then ask the gateway for the same one.
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    let (mut server, mut events) =
        GatewayServer::new(ServerConfig::new("127.0.0.1", port), |_: DispatchItem| {});

    // Act
    let result = server.start(1);

    // Assert
    assert!(matches!(result, Err(ServerError::Bind { .. })));
    assert!(server.registry().is_ok());
    assert!(server.local_addr().is_none());
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.kind(), EventKind::Error);
    server.shutdown().await;
}
