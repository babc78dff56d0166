//! Integration tests that run two real nodes over loopback TCP

use std::time::Duration;

use rapidtexter::networking::{Command, NetEvent, SessionState};
use rapidtexter::{FixedText, LanHandle, LanNode, NetworkConfig};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

async fn start(name: &str, discovery_port: u16) -> LanHandle {
    let config = NetworkConfig {
        tcp_port: 0,
        discovery_port,
        ..NetworkConfig::default()
    };
    LanNode::start(
        config,
        name.to_string(),
        "en".to_string(),
        Box::new(FixedText::new("loopback race text")),
    )
    .await
    .unwrap()
}

async fn wait_for(
    rx: &mut broadcast::Receiver<NetEvent>,
    predicate: impl Fn(&NetEvent) -> bool,
) -> NetEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_join_over_loopback() {
    let host = start("Hana", 47_611).await;
    let guest = start("Gil", 47_612).await;
    let mut host_rx = host.subscribe();
    let mut guest_rx = guest.subscribe();

    host.command(Command::CreateRoom).unwrap();
    wait_for(&mut host_rx, |e| {
        matches!(e, NetEvent::RoomStateChanged { state: SessionState::Hosting, .. })
    })
    .await;

    guest
        .command(Command::JoinRoom {
            ip: "127.0.0.1".to_string(),
            port: host.listen_addr().port(),
        })
        .unwrap();
    wait_for(&mut guest_rx, |e| matches!(e, NetEvent::JoinSucceeded)).await;
    wait_for(&mut host_rx, |e| {
        matches!(e, NetEvent::PlayerJoined { name, .. } if name == "Gil")
    })
    .await;

    let snapshot = guest.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Joined);
    assert_eq!(snapshot.host_id.as_ref(), Some(host.local_id()));
    assert_eq!(snapshot.players.len(), 2);
    assert_eq!(snapshot.game_text, "loopback race text");

    guest.command(Command::LeaveRoom).unwrap();
    wait_for(&mut host_rx, |e| {
        matches!(e, NetEvent::PlayerLeft { name, .. } if name == "Gil")
    })
    .await;
    assert_eq!(host.snapshot().await.unwrap().players.len(), 1);

    guest.shutdown().await;
    host.shutdown().await;
    assert!(host.command(Command::CloseRoom).is_err());
}

#[tokio::test]
async fn test_join_refused_when_nobody_hosts() {
    let idle = start("Ivy", 47_613).await;
    let guest = start("Gil", 47_614).await;
    let mut guest_rx = guest.subscribe();

    guest
        .command(Command::JoinRoom {
            ip: "127.0.0.1".to_string(),
            port: idle.listen_addr().port(),
        })
        .unwrap();
    let event = wait_for(&mut guest_rx, |e| matches!(e, NetEvent::JoinFailed(_))).await;
    // The idle peer accepts the socket and drops it straight away.
    assert_eq!(
        event,
        NetEvent::JoinFailed("Connection closed by host".to_string())
    );
    assert_eq!(guest.snapshot().await.unwrap().state, SessionState::Idle);

    guest.shutdown().await;
    idle.shutdown().await;
}
