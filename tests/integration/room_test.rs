//! Integration tests for hosting, joining, leaving and kicking

use rapidtexter::networking::{Command, NetEvent, SessionState};

use crate::harness::{has_event, SimNet, PORT};

fn room_of_three() -> SimNet {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.add_peer("c", "C");
    net.host(0);
    net.join(1, 0);
    net.join(2, 0);
    net
}

#[test]
fn test_guest_joins_host() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.host(0);
    net.events(0);
    net.join(1, 0);

    assert_eq!(net.peer(1).state(), SessionState::Joined);
    assert_eq!(net.peer(1).host_id(), Some(&net.id(0)));
    assert!(!net.peer(1).is_host());
    assert_eq!(net.peer(1).game_text(), net.peer(0).game_text());

    let guest_events = net.events(1);
    assert!(has_event(&guest_events, |e| matches!(e, NetEvent::JoinSucceeded)));
    assert!(has_event(&guest_events, |e| matches!(
        e,
        NetEvent::RoomStateChanged {
            state: SessionState::Joined,
            is_host: false
        }
    )));

    let host_events = net.events(0);
    assert!(has_event(&host_events, |e| matches!(
        e,
        NetEvent::PlayerJoined { name, .. } if name == "B"
    )));

    for i in 0..2 {
        let players = net.peer(i).snapshot().players;
        assert_eq!(players.len(), 2);
        assert!(players.iter().any(|p| p.is_host && p.name == "A"));
        assert_eq!(players.iter().filter(|p| p.is_local).count(), 1);
    }
}

#[test]
fn test_join_times_out_when_nobody_answers() {
    let mut net = SimNet::new();
    net.add_peer("b", "B");
    net.command(
        0,
        Command::JoinRoom {
            ip: "10.0.0.9".to_string(),
            port: PORT,
        },
    );
    assert_eq!(net.peer(0).state(), SessionState::Joining);

    net.advance(4_999);
    assert_eq!(net.peer(0).state(), SessionState::Joining);

    net.advance(1);
    assert_eq!(net.peer(0).state(), SessionState::Idle);
    let events = net.events(0);
    assert!(has_event(&events, |e| matches!(
        e,
        NetEvent::JoinFailed(reason) if reason == "Connection timed out. Host not found at 10.0.0.9"
    )));
    assert!(net.peer(0).registry().is_empty());
}

#[test]
fn test_join_refused_by_idle_peer() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.join(1, 0);

    assert_eq!(net.peer(1).state(), SessionState::Idle);
    let events = net.events(1);
    assert!(has_event(&events, |e| matches!(
        e,
        NetEvent::JoinFailed(reason) if reason.contains("10.0.0.1:52765") && reason.contains("refused")
    )));
    let last_error = net.peer(1).snapshot().last_error.unwrap();
    assert!(last_error.contains("refused"));
}

#[test]
fn test_leave_twice_is_harmless() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.host(0);
    net.join(1, 0);
    net.events(0);

    net.command(1, Command::LeaveRoom);
    net.command(1, Command::LeaveRoom);

    assert_eq!(net.peer(1).state(), SessionState::Idle);
    assert_eq!(net.peer(1).mesh().link_count(), 0);
    assert_eq!(net.peer(0).registry().len(), 1);
    assert_eq!(net.peer(0).state(), SessionState::Hosting);

    let host_events = net.events(0);
    let left = host_events
        .iter()
        .filter(|e| matches!(e, NetEvent::PlayerLeft { name, .. } if name == "B"))
        .count();
    assert_eq!(left, 1);
}

#[test]
fn test_closing_room_ends_it_for_guests() {
    let mut net = room_of_three();
    net.events(1);
    net.events(2);

    net.command(0, Command::CloseRoom);
    assert_eq!(net.peer(0).state(), SessionState::Idle);

    for guest in [1, 2] {
        assert_eq!(net.peer(guest).state(), SessionState::Idle);
        assert!(net.peer(guest).registry().is_empty());
        let events = net.events(guest);
        assert!(has_event(&events, |e| matches!(
            e,
            NetEvent::ConnectionError(reason) if reason == "Host left the room"
        )));
    }
}

#[test]
fn test_host_crash_sends_guests_home() {
    let mut net = room_of_three();
    net.run_to_race(0);
    net.crash(0);

    for guest in [1, 2] {
        assert_eq!(net.peer(guest).state(), SessionState::Idle);
        assert!(net.peer(guest).registry().is_empty());
        assert_eq!(net.peer(guest).mesh().link_count(), 0);
        assert_eq!(
            net.peer(guest).snapshot().last_error.as_deref(),
            Some("Host left the room")
        );
    }
}

#[test]
fn test_kick_removes_player_everywhere() {
    let mut net = room_of_three();
    let victim = net.id(1);
    net.events(1);

    net.command(0, Command::KickPlayer(victim.clone()));

    assert_eq!(net.peer(1).state(), SessionState::Idle);
    let events = net.events(1);
    assert!(has_event(&events, |e| matches!(e, NetEvent::Kicked)));

    assert!(!net.peer(0).registry().contains(&victim));
    assert!(!net.peer(2).registry().contains(&victim));
    assert!(!net.peer(2).mesh().is_linked(&victim));
    assert_eq!(net.peer(0).registry().len(), 2);
    assert_eq!(net.peer(2).registry().len(), 2);
}

#[test]
fn test_only_host_may_kick() {
    let mut net = room_of_three();
    let target = net.id(2);
    net.command(1, Command::KickPlayer(target.clone()));

    assert_eq!(net.peer(2).state(), SessionState::Joined);
    assert!(net.peer(0).registry().contains(&target));
}

#[test]
fn test_renaming_updates_local_row() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.host(0);
    net.command(0, Command::SetPlayerName("Ada".to_string()));

    let events = net.events(0);
    assert!(has_event(&events, |e| matches!(e, NetEvent::PlayerNameChanged(n) if n == "Ada")));
    let players = net.peer(0).snapshot().players;
    assert_eq!(players[0].name, "Ada");
}
