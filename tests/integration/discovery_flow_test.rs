//! Integration tests for room advertising and scanning

use rapidtexter::networking::{Command, NetEvent, RoomStatus};

use crate::harness::{has_event, SimNet, PORT};

#[test]
fn test_scanner_finds_and_forgets_room() {
    let mut net = SimNet::new();
    net.add_peer("host", "Hana");
    net.add_peer("scan", "Sam");

    net.command(1, Command::StartScanning);
    net.host(0);

    let events = net.events(1);
    assert!(has_event(&events, |e| matches!(
        e,
        NetEvent::RoomFound(room) if room.host_name == "Hana" && room.port == PORT
    )));
    let rooms = net.peer(1).rooms().rooms();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].host_ip.to_string(), "10.0.0.1");
    assert_eq!(rooms[0].player_count, 1);
    assert_eq!(rooms[0].status, RoomStatus::Waiting);

    net.advance(3_000);
    assert_eq!(net.peer(1).rooms().len(), 1);

    net.command(0, Command::CloseRoom);
    net.events(1);
    net.advance(4_999);
    assert_eq!(net.peer(1).rooms().len(), 1);

    net.advance(2_501);
    assert!(net.peer(1).rooms().is_empty());
    assert!(has_event(&net.events(1), |e| matches!(
        e,
        NetEvent::RoomsChanged(rooms) if rooms.is_empty()
    )));
}

#[test]
fn test_announcements_follow_room_changes() {
    let mut net = SimNet::new();
    net.add_peer("host", "Hana");
    net.add_peer("guest", "Gil");
    net.add_peer("scan", "Sam");
    net.command(2, Command::StartScanning);
    net.host(0);
    net.join(1, 0);

    net.advance(1_000);
    let room = net.peer(2).rooms().rooms().remove(0);
    assert_eq!(room.player_count, 2);

    net.command(0, Command::StartCountdown);
    net.advance(1_000);
    let room = net.peer(2).rooms().rooms().remove(0);
    assert_eq!(room.status, RoomStatus::Countdown);
}

#[test]
fn test_not_scanning_ignores_announcements() {
    let mut net = SimNet::new();
    net.add_peer("host", "Hana");
    net.add_peer("idle", "Ivy");
    net.host(0);
    net.advance(2_000);
    assert!(net.peer(1).rooms().is_empty());

    net.command(1, Command::StartScanning);
    net.advance(1_000);
    assert_eq!(net.peer(1).rooms().len(), 1);

    net.command(1, Command::StopScanning);
    assert!(!net.peer(1).is_scanning());
    net.command(1, Command::RefreshRooms);
    assert!(net.peer(1).is_scanning());
    assert!(net.peer(1).rooms().is_empty());
}

#[test]
fn test_creating_room_stops_scanning() {
    let mut net = SimNet::new();
    net.add_peer("host", "Hana");
    net.command(0, Command::StartScanning);
    net.host(0);

    assert!(!net.peer(0).is_scanning());
    assert!(has_event(&net.events(0), |e| matches!(e, NetEvent::ScanningChanged(false))));
}
