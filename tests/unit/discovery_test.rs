//! Unit tests for room discovery datagrams and the scan cache

use std::net::Ipv4Addr;

use rapidtexter::networking::discovery::{RoomDirectory, RoomStatus, Upsert, ROOM_TIMEOUT_MS};
use rapidtexter::networking::peer::PeerId;
use rapidtexter::networking::protocol::{DiscoveryAnnounce, ProtocolError};
use rapidtexter::RacePhase;
use serde_json::{json, Value};

#[test]
fn test_announce_wire_format() {
    let announce = DiscoveryAnnounce::new(
        PeerId::from("host-1"),
        "Alice",
        52765,
        3,
        RoomStatus::Countdown,
    );
    let value: Value = serde_json::from_slice(&announce.to_bytes().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "app": "RapidTexterP2P",
            "type": "DISCOVERY",
            "uuid": "host-1",
            "name": "Alice",
            "port": 52765,
            "playerCount": 3,
            "status": "countdown"
        })
    );
}

#[test]
fn test_parses_announce_from_other_peer() {
    let raw = br#"{"app":"RapidTexterP2P","type":"DISCOVERY","uuid":"u-9","name":"Zed","port":41000,"playerCount":2,"status":"racing"}"#;
    let announce = DiscoveryAnnounce::from_bytes(raw).unwrap();
    assert_eq!(announce.uuid, PeerId::from("u-9"));
    assert_eq!(announce.port, 41000);
    assert_eq!(announce.status, RoomStatus::Racing);
}

#[test]
fn test_rejects_other_applications() {
    let raw = br#"{"app":"SomethingElse","type":"DISCOVERY","uuid":"u","name":"n","port":1,"playerCount":1,"status":"waiting"}"#;
    assert!(matches!(
        DiscoveryAnnounce::from_bytes(raw),
        Err(ProtocolError::ForeignApp(app)) if app == "SomethingElse"
    ));
    assert!(matches!(
        DiscoveryAnnounce::from_bytes(b"\x00\x01garbage"),
        Err(ProtocolError::Malformed(_))
    ));
}

#[test]
fn test_phase_to_room_status() {
    assert_eq!(RacePhase::Lobby.room_status(), RoomStatus::Waiting);
    assert_eq!(RacePhase::ReadyCheck.room_status(), RoomStatus::Waiting);
    assert_eq!(RacePhase::Countdown.room_status(), RoomStatus::Countdown);
    assert_eq!(RacePhase::Racing.room_status(), RoomStatus::Racing);
    assert_eq!(RacePhase::Results.room_status(), RoomStatus::Waiting);
}

#[test]
fn test_directory_tracks_sender_address() {
    let mut dir = RoomDirectory::new(8);
    let announce = DiscoveryAnnounce::new(PeerId::from("h"), "Host", 52765, 1, RoomStatus::Waiting);

    dir.upsert(&announce, Ipv4Addr::new(192, 168, 0, 5), 0);
    assert_eq!(
        dir.upsert(&announce, Ipv4Addr::new(192, 168, 0, 6), 100),
        Upsert::Updated
    );
    let room = dir.get(&PeerId::from("h")).unwrap();
    assert_eq!(room.host_ip, Ipv4Addr::new(192, 168, 0, 6));
    assert_eq!(room.max_players, 8);
}

#[test]
fn test_rooms_sorted_by_name() {
    let mut dir = RoomDirectory::new(8);
    let ip = Ipv4Addr::new(10, 0, 0, 1);
    for (id, name) in [("3", "Carol"), ("1", "Alice"), ("2", "Bob")] {
        let announce = DiscoveryAnnounce::new(PeerId::from(id), name, 52765, 1, RoomStatus::Waiting);
        dir.upsert(&announce, ip, 0);
    }
    let names: Vec<String> = dir.rooms().into_iter().map(|r| r.host_name).collect();
    assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
}

#[test]
fn test_eviction_boundary() {
    let mut dir = RoomDirectory::new(8);
    let announce = DiscoveryAnnounce::new(PeerId::from("h"), "Host", 52765, 1, RoomStatus::Waiting);
    dir.upsert(&announce, Ipv4Addr::new(10, 0, 0, 1), 1000);

    assert!(dir.evict_stale(1000 + ROOM_TIMEOUT_MS, ROOM_TIMEOUT_MS).is_empty());
    assert_eq!(dir.evict_stale(1001 + ROOM_TIMEOUT_MS, ROOM_TIMEOUT_MS).len(), 1);
    assert!(dir.is_empty());
}
