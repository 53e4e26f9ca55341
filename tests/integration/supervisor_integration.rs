//! Listener lifecycle tests: shutdown stops accepting, in-flight
//! connections keep relaying until they end on their own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use redir_relay::connection::ListenerState;
use redir_relay::io::CopyStrategy;

use super::harness::{
    echo_round_trip, original_dst, read_until_closed, spawn_echo_server, spawn_silent_server,
    within, RecordingDialer, RelayHarness, StaticResolver,
};

#[tokio::test]
async fn test_shutdown_drains_in_flight_connections() {
    let echo = spawn_echo_server().await;
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(echo),
        CopyStrategy::default(),
    )
    .await;
    let addr = relay.addr;

    let client = relay.connect().await;
    let (client, echoed) = echo_round_trip(client, b"before shutdown".to_vec()).await;
    assert_eq!(echoed, b"before shutdown");

    let handle = relay.supervisor.shutdown_handle();
    assert!(handle.shutdown());
    within(relay.accept_loop).await.unwrap();
    assert_eq!(relay.supervisor.state(), ListenerState::Stopped);

    // No new connections
    assert!(TcpStream::connect(addr).await.is_err());

    // The established connection is untouched
    assert_eq!(relay.supervisor.active_connections(), 1);
    let (client, echoed) = echo_round_trip(client, b"after shutdown".to_vec()).await;
    assert_eq!(echoed, b"after shutdown");

    drop(client);
    within(relay.supervisor.wait_idle()).await;

    let stats = relay.supervisor.stats().snapshot();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_wait_idle_blocks_until_connections_end() {
    let silent = spawn_silent_server().await;
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(silent),
        CopyStrategy::default(),
    )
    .await;

    let client = relay.connect().await;
    // Wait for the handler to be running
    within(async {
        while relay.supervisor.active_connections() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let supervisor = std::sync::Arc::clone(&relay.supervisor);
    relay.stop().await;

    let idle = tokio::spawn(async move { supervisor.wait_idle().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!idle.is_finished(), "wait_idle returned with a live connection");

    drop(client);
    within(idle).await.unwrap();
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let relay = RelayHarness::start(
        StaticResolver::new(original_dst()),
        RecordingDialer::new(spawn_echo_server().await),
        CopyStrategy::default(),
    )
    .await;

    let mut states = relay.supervisor.subscribe();
    assert_eq!(*states.borrow(), ListenerState::Running);

    let handle = relay.supervisor.shutdown_handle();
    let second = handle.clone();
    assert!(handle.shutdown());
    assert!(!second.shutdown());

    let stopped = within(states.wait_for(|state| *state == ListenerState::Stopped))
        .await
        .map(|state| *state);
    assert_eq!(stopped.unwrap(), ListenerState::Stopped);

    within(relay.accept_loop).await.unwrap();
}

/// Layer counting ERROR events
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_shutdown_logs_no_errors() {
    let errors = Arc::new(AtomicUsize::new(0));
    // Scoped to this thread; the test runtime is single-threaded
    let _guard = tracing::subscriber::set_default(
        tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&errors))),
    );

    let echo = spawn_echo_server().await;
    let relay = RelayHarness::start(
        StaticResolver::failing_on(original_dst(), &[0]),
        RecordingDialer::new(echo),
        CopyStrategy::default(),
    )
    .await;

    // A real failure while running is reported
    let mut rejected = relay.connect().await;
    let rest = read_until_closed(&mut rejected).await;
    assert!(rest.is_empty());
    relay.settle().await;
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    let client = relay.connect().await;
    let (client, echoed) = echo_round_trip(client, b"last words".to_vec()).await;
    assert_eq!(echoed, b"last words");
    drop(client);
    relay.settle().await;

    assert!(relay.supervisor.shutdown_handle().shutdown());
    within(relay.accept_loop).await.unwrap();
    assert_eq!(relay.supervisor.state(), ListenerState::Stopped);

    // Closing the listener is not an accept failure
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
