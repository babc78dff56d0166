//! Integration tests for the ready check, countdown, race and rematch flow

use rapidtexter::networking::protocol::FinishReport;
use rapidtexter::networking::{Command, Message, NetEvent, Packet, PeerId, Ranking, SessionState};
use rapidtexter::RacePhase;

use crate::harness::{has_event, SimNet, RACE_TEXT};

fn names(rankings: &[Ranking]) -> Vec<(String, u32)> {
    rankings
        .iter()
        .map(|r| (r.name.clone(), r.position))
        .collect()
}

fn final_rankings(events: &[NetEvent]) -> Option<Vec<Ranking>> {
    events.iter().rev().find_map(|e| match e {
        NetEvent::RaceFinished { rankings } => Some(rankings.clone()),
        _ => None,
    })
}

fn pair() -> SimNet {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.host(0);
    net.join(1, 0);
    net
}

#[test]
fn test_solo_race_skips_ready_check() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.host(0);
    net.command(0, Command::SetGameText("hello world".to_string()));
    net.events(0);

    net.command(0, Command::StartCountdown);
    assert_eq!(net.peer(0).phase(), RacePhase::Countdown);
    assert_eq!(net.peer(0).snapshot().countdown_remaining, Some(3));
    net.advance(1_500);
    assert_eq!(net.peer(0).snapshot().countdown_remaining, Some(2));

    net.advance(1_499);
    assert_eq!(net.peer(0).phase(), RacePhase::Countdown);
    net.advance(1);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    assert_eq!(net.peer(0).snapshot().countdown_remaining, None);

    net.finish(0, 75);
    assert_eq!(net.peer(0).phase(), RacePhase::Results);

    let events = net.events(0);
    assert!(!has_event(&events, |e| matches!(e, NetEvent::WaitingForReady(_))));
    assert!(has_event(&events, |e| matches!(e, NetEvent::CountdownStarted { seconds: 3 })));
    assert!(has_event(&events, |e| matches!(e, NetEvent::RaceStarted)));
    let rankings = final_rankings(&events).unwrap();
    assert_eq!(names(&rankings), vec![("A".to_string(), 1)]);
    assert_eq!(rankings[0].wpm, 75);
}

#[test]
fn test_two_player_race() {
    let mut net = pair();
    net.events(0);
    net.events(1);

    net.command(0, Command::StartCountdown);
    assert_eq!(net.peer(0).phase(), RacePhase::Countdown);
    assert_eq!(net.peer(1).phase(), RacePhase::Countdown);
    let host_events = net.events(0);
    assert!(has_event(&host_events, |e| matches!(e, NetEvent::WaitingForReady(true))));
    assert!(has_event(&host_events, |e| matches!(e, NetEvent::AllPlayersReady)));

    net.advance(3_000);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    assert_eq!(net.peer(1).phase(), RacePhase::Racing);
    assert_eq!(net.peer(1).game_text(), RACE_TEXT);

    net.type_some(1, 10, 50);
    net.advance(100);
    let seen = net.peer(0).registry().get(&net.id(1)).unwrap();
    assert_eq!(seen.position, 10);
    assert_eq!(seen.wpm, 50);

    net.finish(0, 80);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    net.advance(200);
    net.finish(1, 70);

    for i in 0..2 {
        assert_eq!(net.peer(i).phase(), RacePhase::Results);
        let rankings = final_rankings(&net.events(i)).unwrap();
        assert_eq!(
            names(&rankings),
            vec![("A".to_string(), 1), ("B".to_string(), 2)]
        );
        assert_eq!(rankings[1].accuracy, 98.0);
    }
    let host_view = net.peer(0).registry().get(&net.id(1)).unwrap();
    assert!(host_view.finished);
    assert_eq!(host_view.rank, 2);
}

#[test]
fn test_silent_guest_does_not_block_the_start() {
    let mut net = pair();
    net.mute(1);

    let started = net.now();
    net.command(0, Command::StartCountdown);
    assert_eq!(net.peer(0).phase(), RacePhase::ReadyCheck);

    net.advance(4_999);
    assert_eq!(net.now(), started + 4_999);
    assert_eq!(net.peer(0).phase(), RacePhase::ReadyCheck);

    net.advance(1);
    assert_eq!(net.peer(0).phase(), RacePhase::Countdown);
    let events = net.events(0);
    assert!(has_event(&events, |e| matches!(e, NetEvent::WaitingForReady(false))));
    assert!(!has_event(&events, |e| matches!(e, NetEvent::AllPlayersReady)));
}

#[test]
fn test_leaving_player_ranks_last() {
    let mut net = SimNet::new();
    net.add_peer("a", "A");
    net.add_peer("b", "B");
    net.add_peer("c", "C");
    net.host(0);
    net.join(1, 0);
    net.join(2, 0);

    net.run_to_race(0);
    assert_eq!(net.peer(2).phase(), RacePhase::Racing);
    net.type_some(2, 5, 30);
    net.crash(2);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);

    net.finish(0, 90);
    net.advance(300);
    net.finish(1, 60);

    for i in 0..2 {
        let rankings = final_rankings(&net.events(i)).unwrap();
        assert_eq!(
            names(&rankings),
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 2),
                ("C".to_string(), 3)
            ]
        );
    }
}

#[test]
fn test_race_ends_when_last_racer_leaves() {
    let mut net = pair();
    net.run_to_race(0);
    net.finish(0, 90);
    net.command(1, Command::LeaveRoom);

    assert_eq!(net.peer(0).phase(), RacePhase::Results);
    let rankings = final_rankings(&net.events(0)).unwrap();
    assert_eq!(
        names(&rankings),
        vec![("A".to_string(), 1), ("B".to_string(), 2)]
    );
}

fn join_failed(events: &[NetEvent]) -> bool {
    has_event(events, |e| matches!(e, NetEvent::JoinFailed(_)))
}

#[test]
fn test_late_joiner_is_turned_away_until_results() {
    let mut net = pair();
    let late = net.add_peer("c", "C");

    net.command(0, Command::StartCountdown);
    assert_eq!(net.peer(0).phase(), RacePhase::Countdown);
    net.join(late, 0);
    assert_eq!(net.peer(late).state(), SessionState::Idle);
    assert!(join_failed(&net.events(late)));
    assert_eq!(net.peer(0).registry().len(), 2);

    net.advance(3_000);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    net.join(late, 0);
    assert!(join_failed(&net.events(late)));

    net.finish(0, 80);
    net.finish(1, 70);
    for i in 0..2 {
        assert_eq!(net.peer(i).phase(), RacePhase::Results);
        let rankings = final_rankings(&net.events(i)).unwrap();
        assert_eq!(
            names(&rankings),
            vec![("A".to_string(), 1), ("B".to_string(), 2)]
        );
    }

    net.join(late, 0);
    assert_eq!(net.peer(late).state(), SessionState::Joined);
    assert_eq!(net.peer(late).phase(), RacePhase::Lobby);
    assert_eq!(net.peer(0).registry().len(), 3);
    assert!(net.peer(1).registry().contains(&net.id(late)));
}

#[test]
fn test_joiner_during_ready_check_does_not_stall_the_race() {
    let mut net = pair();
    let late = net.add_peer("c", "C");
    net.mute(1);

    net.command(0, Command::StartCountdown);
    assert_eq!(net.peer(0).phase(), RacePhase::ReadyCheck);
    net.join(late, 0);
    assert!(join_failed(&net.events(late)));

    net.advance(5_000 + 3_000);
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    net.finish(0, 80);
    net.crash(1);

    assert_eq!(net.peer(0).phase(), RacePhase::Results);
    let rankings = final_rankings(&net.events(0)).unwrap();
    assert_eq!(
        names(&rankings),
        vec![("A".to_string(), 1), ("B".to_string(), 2)]
    );
}

#[test]
fn test_repeated_finish_counts_once() {
    let mut net = pair();
    net.run_to_race(0);
    net.finish(1, 70);

    let again = || {
        Message::Finish(FinishReport {
            wpm: 120,
            accuracy: 100.0,
            position: 1,
        })
    };
    net.send_raw(1, 0, Packet::new(net.id(1), again()));
    net.send_raw(1, 0, Packet::new(PeerId::from("zed"), again()));
    assert_eq!(net.peer(0).phase(), RacePhase::Racing);
    assert_eq!(net.peer(0).registry().get(&net.id(1)).unwrap().wpm, 70);

    net.finish(0, 80);
    net.send_raw(1, 0, Packet::new(net.id(1), again()));

    let rankings = final_rankings(&net.events(0)).unwrap();
    assert_eq!(
        names(&rankings),
        vec![("B".to_string(), 1), ("A".to_string(), 2)]
    );
    assert_eq!(rankings[0].wpm, 70);
    let finished = net
        .events(1)
        .into_iter()
        .filter(|e| matches!(e, NetEvent::RaceFinished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[test]
fn test_game_text_is_applied_once() {
    let mut net = pair();
    net.events(1);

    net.command(0, Command::SetGameText("alpha beta".to_string()));
    net.command(0, Command::SetGameText("alpha beta".to_string()));

    assert_eq!(net.peer(1).game_text(), "alpha beta");
    let changes = net
        .events(1)
        .into_iter()
        .filter(|e| matches!(e, NetEvent::GameTextChanged(t) if t == "alpha beta"))
        .count();
    assert_eq!(changes, 1);
}

#[test]
fn test_guest_cannot_change_text_or_start() {
    let mut net = pair();
    net.command(1, Command::SetGameText("sneaky".to_string()));
    net.command(1, Command::StartCountdown);

    assert_eq!(net.peer(0).game_text(), RACE_TEXT);
    assert_eq!(net.peer(1).game_text(), RACE_TEXT);
    assert_eq!(net.peer(0).phase(), RacePhase::Lobby);
}

#[test]
fn test_play_again_accepted() {
    let mut net = pair();
    net.run_to_race(0);
    net.finish(0, 80);
    net.finish(1, 70);
    net.events(0);

    net.command(0, Command::SendPlayAgainInvite);
    assert_eq!(net.peer(0).phase(), RacePhase::Lobby);
    assert!(has_event(&net.events(1), |e| matches!(e, NetEvent::PlayAgainInviteReceived)));
    assert_eq!(net.peer(1).phase(), RacePhase::Results);
    assert!(net.peer(1).snapshot().play_again_pending);

    net.command(1, Command::AcceptPlayAgain);
    assert_eq!(net.peer(1).phase(), RacePhase::Lobby);
    assert!(!net.peer(1).snapshot().play_again_pending);
    assert!(has_event(&net.events(0), |e| matches!(
        e,
        NetEvent::PlayAgainAccepted { name } if name == "B"
    )));

    net.run_to_race(0);
    assert_eq!(net.peer(1).phase(), RacePhase::Racing);
    net.finish(1, 95);
    net.finish(0, 50);
    let rankings = final_rankings(&net.events(0)).unwrap();
    assert_eq!(
        names(&rankings),
        vec![("B".to_string(), 1), ("A".to_string(), 2)]
    );
}

#[test]
fn test_play_again_declined() {
    let mut net = pair();
    net.run_to_race(0);
    net.finish(0, 80);
    net.finish(1, 70);
    net.command(0, Command::SendPlayAgainInvite);
    net.events(0);

    net.command(1, Command::DeclinePlayAgain);

    assert_eq!(net.peer(1).state(), SessionState::Idle);
    let events = net.events(0);
    let declined = events
        .iter()
        .position(|e| matches!(e, NetEvent::PlayAgainDeclined { name } if name == "B"));
    let left = events
        .iter()
        .position(|e| matches!(e, NetEvent::PlayerLeft { name, .. } if name == "B"));
    assert!(declined.is_some());
    assert!(declined < left);
    assert_eq!(net.peer(0).registry().len(), 1);
}

#[test]
fn test_progress_ignored_outside_race() {
    let mut net = pair();
    net.type_some(1, 10, 40);
    net.command(
        1,
        Command::FinishRace {
            wpm: 40,
            accuracy: 100.0,
            errors: 0,
        },
    );
    let seen = net.peer(0).registry().get(&net.id(1)).unwrap();
    assert_eq!(seen.position, 0);
    assert!(!seen.finished);
}
