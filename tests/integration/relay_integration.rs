//! End-to-end relay tests over loopback
//!
//! Each test runs the full accept -> resolve -> dial -> relay path with the
//! simulated NAT fixtures from [`super::harness`].

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use redir_relay::io::CopyStrategy;

use super::harness::{
    echo_round_trip, original_dst, payload, read_until_closed, spawn_echo_server,
    spawn_sink_server, within, RecordingDialer, RelayHarness, StaticResolver,
};

fn http_request(len: usize) -> Vec<u8> {
    let head = |body_len: usize| {
        format!(
            "POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Length: {body_len:04}\r\n\r\n"
        )
    };
    let body_len = len - head(0).len();
    let mut request = head(body_len).into_bytes();
    request.resize(len, b'x');
    request
}

// ============================================================================
// Forwarding
// ============================================================================

async fn forwards_request_to_original_destination(strategy: CopyStrategy) {
    let request = http_request(1200);
    let (sink, data_rx, eof_rx) = spawn_sink_server(request.len()).await;

    let resolver = StaticResolver::new(original_dst());
    let dialer = RecordingDialer::new(sink);
    let relay = RelayHarness::start(resolver.clone(), dialer.clone(), strategy).await;

    let mut client = relay.connect().await;
    client.write_all(&request).await.unwrap();

    let received = within(data_rx).await.unwrap();
    assert_eq!(received, request);
    assert_eq!(dialer.dialed(), vec![original_dst()]);
    assert_eq!(resolver.calls(), 1);

    // Client close reaches the destination as EOF
    drop(client);
    within(eof_rx).await.unwrap();

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.bytes_client_to_upstream, 1200);
    assert_eq!(stats.failed(), 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_forwards_request_buffered() {
    forwards_request_to_original_destination(CopyStrategy::Buffered).await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_forwards_request_splice() {
    forwards_request_to_original_destination(CopyStrategy::Splice).await;
}

async fn full_duplex_preserves_order(strategy: CopyStrategy) {
    let echo = spawn_echo_server().await;
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(echo),
        strategy,
    )
    .await;

    let client = relay.connect().await;
    let data = payload(512 * 1024);
    let (client, echoed) = echo_round_trip(client, data.clone()).await;
    assert_eq!(echoed.len(), data.len());
    assert!(echoed == data, "echoed bytes differ from what was sent");

    // A second exchange on the same connection still works
    let (client, echoed) = echo_round_trip(client, b"second".to_vec()).await;
    assert_eq!(echoed, b"second");

    drop(client);
    relay.settle().await;

    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.bytes_client_to_upstream, 512 * 1024 + 6);

    relay.stop().await;
}

#[tokio::test]
async fn test_full_duplex_buffered() {
    full_duplex_preserves_order(CopyStrategy::Buffered).await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_full_duplex_splice() {
    full_duplex_preserves_order(CopyStrategy::Splice).await;
}

#[tokio::test]
async fn test_destination_close_closes_client() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = server.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = server.accept().await.unwrap();
        stream
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
    });

    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(target),
        CopyStrategy::default(),
    )
    .await;

    let mut client = relay.connect().await;
    let response = read_until_closed(&mut client).await;
    assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.bytes_upstream_to_client, response.len() as u64);

    relay.stop().await;
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_resolve_failure_closes_client_without_dialing() {
    let echo = spawn_echo_server().await;
    let dialer = RecordingDialer::new(echo);
    let relay = RelayHarness::start(
        StaticResolver::always_failing(),
        dialer.clone(),
        CopyStrategy::default(),
    )
    .await;

    let mut client = relay.connect().await;
    let received = read_until_closed(&mut client).await;
    assert!(received.is_empty());
    assert!(dialer.dialed().is_empty());

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.resolve_failed, 1);
    assert_eq!(stats.completed, 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_dial_failure_closes_client() {
    let dialer = RecordingDialer::always_failing();
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        dialer.clone(),
        CopyStrategy::default(),
    )
    .await;

    let mut client = relay.connect().await;
    let received = read_until_closed(&mut client).await;
    assert!(received.is_empty());
    assert_eq!(dialer.dialed(), vec![original_dst()]);

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.dial_failed, 1);
    assert_eq!(stats.completed, 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_failed_connections_do_not_affect_others() {
    let echo = spawn_echo_server().await;
    // First connection fails to resolve, second fails to dial
    let resolver = StaticResolver::failing_on(original_dst(), &[0]);
    let dialer = RecordingDialer::failing_on(echo, &[0]);
    let relay =
        RelayHarness::start(resolver.clone(), dialer.clone(), CopyStrategy::default()).await;

    let mut first = relay.connect().await;
    assert!(read_until_closed(&mut first).await.is_empty());

    let mut second = relay.connect().await;
    assert!(read_until_closed(&mut second).await.is_empty());

    let third = relay.connect().await;
    let (third, echoed) = echo_round_trip(third, b"still relaying".to_vec()).await;
    assert_eq!(echoed, b"still relaying");
    drop(third);

    relay.settle().await;
    assert_eq!(resolver.calls(), 3);
    assert_eq!(dialer.dialed().len(), 2);

    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.resolve_failed, 1);
    assert_eq!(stats.dial_failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_many_concurrent_connections() {
    let echo = spawn_echo_server().await;
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(echo),
        CopyStrategy::default(),
    )
    .await;

    let mut tasks = Vec::new();
    for i in 0..32u8 {
        let client = relay.connect().await;
        tasks.push(tokio::spawn(async move {
            let data = vec![i; 4096];
            let (mut client, echoed) = echo_round_trip(client, data.clone()).await;
            assert_eq!(echoed, data);
            client.shutdown().await.unwrap();
            let mut rest = Vec::new();
            let _ = client.read_to_end(&mut rest).await;
        }));
    }
    for task in tasks {
        within(task).await.unwrap();
    }

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.accepted, 32);
    assert_eq!(stats.completed, 32);
    assert_eq!(stats.bytes_client_to_upstream, 32 * 4096);

    relay.stop().await;
}
