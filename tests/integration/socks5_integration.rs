//! Relay through a real SOCKS5 negotiation
//!
//! A minimal SOCKS5 server stands in for the upstream proxy: it records the
//! CONNECT target and forwards the tunnel to a local echo server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use redir_relay::io::CopyStrategy;
use redir_relay::upstream::dialer_from_url;

use super::harness::{
    echo_round_trip, original_dst, read_until_closed, spawn_echo_server, within,
    RelayHarness, StaticResolver,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Accept SOCKS5 CONNECTs (no auth), report each target, tunnel to `forward_to`
async fn spawn_socks5_proxy(
    forward_to: Option<SocketAddr>,
) -> (SocketAddr, mpsc::UnboundedReceiver<SocketAddr>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve_connect(stream, forward_to, tx).await;
            });
        }
    });

    (addr, rx)
}

async fn serve_connect(
    mut client: TcpStream,
    forward_to: Option<SocketAddr>,
    targets: mpsc::UnboundedSender<SocketAddr>,
) -> std::io::Result<()> {
    // Greeting: VER, NMETHODS, METHODS
    let mut greeting = [0u8; 2];
    client.read_exact(&mut greeting).await?;
    let mut methods = vec![0u8; greeting[1] as usize];
    client.read_exact(&mut methods).await?;
    client.write_all(&[0x05, 0x00]).await?;

    // Request: VER, CMD, RSV, ATYP=IPv4, ADDR, PORT
    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    assert_eq!(request[1], 0x01, "expected CONNECT");
    assert_eq!(request[3], 0x01, "expected an IPv4 target");
    let mut ip = [0u8; 4];
    client.read_exact(&mut ip).await?;
    let port = client.read_u16().await?;
    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port);
    let _ = targets.send(target);

    let Some(forward_to) = forward_to else {
        // Host unreachable
        client
            .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await?;
        return Ok(());
    };

    let mut upstream = TcpStream::connect(forward_to).await?;
    client
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0])
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_tunnel_carries_original_destination() {
    let echo = spawn_echo_server().await;
    let (proxy, mut targets) = spawn_socks5_proxy(Some(echo)).await;

    let dialer = dialer_from_url(&format!("socks5://{proxy}"), Duration::from_secs(5)).unwrap();
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        dialer,
        CopyStrategy::default(),
    )
    .await;

    let client = relay.connect().await;
    let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
    let (client, echoed) = echo_round_trip(client, request.clone()).await;
    assert_eq!(echoed, request);

    let target = within(targets.recv()).await.unwrap();
    assert_eq!(target, original_dst());

    drop(client);
    relay.settle().await;
    assert_eq!(relay.supervisor.stats().snapshot().completed, 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_proxy_refusal_closes_client() {
    let (proxy, mut targets) = spawn_socks5_proxy(None).await;

    let dialer = dialer_from_url(&format!("socks5://{proxy}"), Duration::from_secs(5)).unwrap();
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        dialer,
        CopyStrategy::default(),
    )
    .await;

    let mut client = relay.connect().await;
    assert!(read_until_closed(&mut client).await.is_empty());
    assert_eq!(within(targets.recv()).await.unwrap(), original_dst());

    relay.settle().await;
    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.dial_failed, 1);
    assert_eq!(stats.completed, 0);

    relay.stop().await;
}
