//! Host-driven race state machine.
//!
//! The host decides every phase change and tells guests by packet; guests
//! only follow. Methods never touch sockets: they return [`RaceAction`]s
//! for the controller to carry out, in order.

use crate::clock::Timer;
use crate::networking::control::NetEvent;
use crate::networking::peer::PeerId;
use crate::networking::protocol::{FinishReport, Message, Ranking, RaceText};
use crate::networking::session::RoomRegistry;
use crate::text::TextSource;

use super::countdown::{Countdown, ReadyCheck};
use super::events::{constants, RacePhase};
use super::results::RaceLedger;

/// Something the controller must do on the orchestrator's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceAction {
    /// Send to every connected peer.
    Broadcast(Message),
    /// Send to the host only.
    SendToHost(Message),
    Notify(NetEvent),
    /// Arm a timer at an absolute deadline.
    Arm(Timer, u64),
    Disarm(Timer),
    StartProgress,
    StopProgress,
    /// Leave the room (guest declined a rematch).
    Leave,
}

/// Timing and sizing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceSettings {
    pub countdown_seconds: u32,
    pub ready_check_timeout_ms: u64,
    pub word_count: usize,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            countdown_seconds: constants::COUNTDOWN_SECONDS,
            ready_check_timeout_ms: constants::READY_CHECK_TIMEOUT_MS,
            word_count: constants::RACE_WORD_COUNT,
        }
    }
}

pub struct RaceOrchestrator {
    local_id: PeerId,
    is_host: bool,
    phase: RacePhase,
    text: String,
    language: String,
    ready: Option<ReadyCheck>,
    countdown: Option<Countdown>,
    ledger: RaceLedger,
    rankings: Vec<Ranking>,
    invite_pending: bool,
    settings: RaceSettings,
    text_source: Box<dyn TextSource>,
}

impl RaceOrchestrator {
    pub fn new(local_id: PeerId, settings: RaceSettings, text_source: Box<dyn TextSource>) -> Self {
        Self {
            local_id,
            is_host: false,
            phase: RacePhase::Lobby,
            text: String::new(),
            language: constants::DEFAULT_LANGUAGE.to_string(),
            ready: None,
            countdown: None,
            ledger: RaceLedger::new(),
            rankings: Vec::new(),
            invite_pending: false,
            settings,
            text_source,
        }
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn rankings(&self) -> &[Ranking] {
        &self.rankings
    }

    /// Whole seconds until the race starts, while counting down.
    pub fn countdown_remaining(&self, now_ms: u64) -> Option<u32> {
        self.countdown
            .filter(|_| self.phase == RacePhase::Countdown)
            .map(|countdown| countdown.remaining_seconds(now_ms))
    }

    /// Newcomers may enter the room only between races.
    pub fn accepts_new_players(&self) -> bool {
        matches!(self.phase, RacePhase::Lobby | RacePhase::Results)
    }

    pub fn invite_pending(&self) -> bool {
        self.invite_pending
    }

    fn enter(&mut self, phase: RacePhase, actions: &mut Vec<RaceAction>) {
        if self.phase != phase {
            tracing::debug!("Race phase {} -> {}", self.phase.as_str(), phase.as_str());
            self.phase = phase;
            actions.push(RaceAction::Notify(NetEvent::PhaseChanged(phase)));
        }
    }

    fn host_only(&self, what: &str) -> bool {
        if !self.is_host {
            tracing::debug!("Ignoring {}: only the host may do that", what);
        }
        self.is_host
    }

    fn set_text_inner(&mut self, text: String, actions: &mut Vec<RaceAction>) {
        if self.text != text {
            self.text = text;
            actions.push(RaceAction::Notify(NetEvent::GameTextChanged(self.text.clone())));
        }
    }

    fn set_language_inner(&mut self, language: String, actions: &mut Vec<RaceAction>) {
        if self.language != language {
            self.language = language;
            actions.push(RaceAction::Notify(NetEvent::GameLanguageChanged(
                self.language.clone(),
            )));
        }
    }

    fn race_text(&self) -> RaceText {
        RaceText {
            text: self.text.clone(),
            language: self.language.clone(),
        }
    }

    fn clear_race(&mut self) {
        self.ready = None;
        self.countdown = None;
        self.ledger.clear();
    }

    /// Enters a room. A host picks the first text in `language`.
    pub fn open(&mut self, as_host: bool, language: &str) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        self.is_host = as_host;
        self.clear_race();
        self.rankings.clear();
        self.invite_pending = false;
        self.enter(RacePhase::Lobby, &mut actions);
        self.set_language_inner(language.to_string(), &mut actions);
        if as_host {
            let text = self
                .text_source
                .race_text(&self.language, self.settings.word_count);
            self.set_text_inner(text, &mut actions);
        } else {
            self.set_text_inner(String::new(), &mut actions);
        }
        actions
    }

    /// Drops all race state after leaving a room.
    pub fn reset(&mut self) -> Vec<RaceAction> {
        let mut actions = vec![
            RaceAction::StopProgress,
            RaceAction::Disarm(Timer::ReadyCheckTimeout),
            RaceAction::Disarm(Timer::CountdownEnd),
        ];
        self.is_host = false;
        self.clear_race();
        self.rankings.clear();
        self.invite_pending = false;
        self.enter(RacePhase::Lobby, &mut actions);
        self.set_text_inner(String::new(), &mut actions);
        actions
    }

    /// Text a freshly handshaken peer must receive, if any.
    pub fn text_for_new_peer(&self) -> Option<Message> {
        (self.is_host && self.phase == RacePhase::Lobby && !self.text.is_empty())
            .then(|| Message::GameText(self.race_text()))
    }

    /// Host: replace the race text.
    pub fn set_text(&mut self, text: String) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.host_only("setGameText") {
            return actions;
        }
        if self.phase != RacePhase::Lobby {
            tracing::debug!("Ignoring text change during {}", self.phase.as_str());
            return actions;
        }
        self.set_text_inner(text, &mut actions);
        actions.push(RaceAction::Broadcast(Message::GameText(self.race_text())));
        actions
    }

    /// Host: change language, which also draws a new text.
    pub fn set_language(&mut self, language: String) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.host_only("setGameLanguage") || self.language == language {
            return actions;
        }
        if self.phase != RacePhase::Lobby {
            tracing::debug!("Ignoring language change during {}", self.phase.as_str());
            return actions;
        }
        self.set_language_inner(language, &mut actions);
        actions.extend(self.refresh_text());
        actions
    }

    /// Host: draw a new text and share it.
    pub fn refresh_text(&mut self) -> Vec<RaceAction> {
        if !self.host_only("refreshGameText") {
            return Vec::new();
        }
        let text = self
            .text_source
            .race_text(&self.language, self.settings.word_count);
        self.set_text(text)
    }

    /// Host: start the race. Solo rooms skip the ready check.
    pub fn start_countdown(&mut self, registry: &mut RoomRegistry, now_ms: u64) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.host_only("startCountdown") {
            return actions;
        }
        if self.phase != RacePhase::Lobby {
            tracing::debug!("Cannot start countdown during {}", self.phase.as_str());
            return actions;
        }
        if self.text.is_empty() {
            tracing::warn!("Cannot start: no race text");
            return actions;
        }

        registry.reset_race();
        self.rankings.clear();

        if registry.len() <= 1 {
            tracing::info!("Solo race, skipping ready check");
            self.begin_countdown(now_ms, &mut actions);
            return actions;
        }

        let check = ReadyCheck::new(
            self.local_id.clone(),
            now_ms,
            self.settings.ready_check_timeout_ms,
        );
        actions.push(RaceAction::Arm(Timer::ReadyCheckTimeout, check.deadline_ms()));
        self.ready = Some(check);
        self.enter(RacePhase::ReadyCheck, &mut actions);
        actions.push(RaceAction::Broadcast(Message::ReadyCheck(self.race_text())));
        actions.push(RaceAction::Notify(NetEvent::WaitingForReady(true)));
        tracing::info!("Ready check sent to {} peers", registry.len() - 1);
        actions
    }

    fn begin_countdown(&mut self, now_ms: u64, actions: &mut Vec<RaceAction>) {
        let countdown = Countdown::start(self.settings.countdown_seconds, now_ms);
        self.ready = None;
        self.countdown = Some(countdown);
        self.enter(RacePhase::Countdown, actions);
        actions.push(RaceAction::Broadcast(Message::Countdown {
            seconds: countdown.seconds(),
        }));
        actions.push(RaceAction::Notify(NetEvent::CountdownStarted {
            seconds: countdown.seconds(),
        }));
        actions.push(RaceAction::Arm(Timer::CountdownEnd, countdown.ends_at_ms()));
    }

    fn maybe_finish_ready_check(
        &mut self,
        registry: &RoomRegistry,
        now_ms: u64,
        actions: &mut Vec<RaceAction>,
    ) {
        let Some(check) = &self.ready else {
            return;
        };
        if !check.is_complete(&registry.ids()) {
            return;
        }
        tracing::info!("All players ready");
        actions.push(RaceAction::Disarm(Timer::ReadyCheckTimeout));
        actions.push(RaceAction::Notify(NetEvent::WaitingForReady(false)));
        actions.push(RaceAction::Notify(NetEvent::AllPlayersReady));
        self.begin_countdown(now_ms, actions);
    }

    /// Host: a guest answered the ready check.
    pub fn ready_response(&mut self, from: &PeerId, registry: &RoomRegistry, now_ms: u64) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.is_host || self.phase != RacePhase::ReadyCheck {
            tracing::debug!("Ignoring READY_RESPONSE from {} during {}", from, self.phase.as_str());
            return actions;
        }
        if let Some(check) = self.ready.as_mut() {
            check.mark_ready(from.clone());
            tracing::debug!(
                "{} ready ({}/{})",
                from,
                check.ready_count(),
                registry.len()
            );
        }
        self.maybe_finish_ready_check(registry, now_ms, &mut actions);
        actions
    }

    /// Host: the ready check deadline passed; go with whoever answered.
    pub fn ready_timeout(&mut self, registry: &RoomRegistry, now_ms: u64) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.is_host || self.phase != RacePhase::ReadyCheck {
            return actions;
        }
        if let Some(check) = &self.ready {
            for id in check.missing(&registry.ids()) {
                let name = registry.get(&id).map(|p| p.name.as_str()).unwrap_or("?");
                tracing::info!("Player {} did not answer the ready check", name);
            }
        }
        actions.push(RaceAction::Notify(NetEvent::WaitingForReady(false)));
        self.begin_countdown(now_ms, &mut actions);
        actions
    }

    /// Host: countdown over, start racing.
    pub fn countdown_elapsed(&mut self, registry: &RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.is_host || self.phase != RacePhase::Countdown {
            return actions;
        }
        self.start_racing(registry, &mut actions);
        actions.insert(0, RaceAction::Broadcast(Message::GameStart));
        actions
    }

    fn start_racing(&mut self, registry: &RoomRegistry, actions: &mut Vec<RaceAction>) {
        let roster = registry
            .ids()
            .into_iter()
            .filter_map(|id| registry.get(&id).map(|p| (id, p.name.clone())))
            .collect();
        self.ledger.start(roster);
        self.countdown = None;
        self.enter(RacePhase::Racing, actions);
        actions.push(RaceAction::Notify(NetEvent::RaceStarted));
        actions.push(RaceAction::StartProgress);
    }

    /// Local player crossed the end of the text. Returns the finishing
    /// position, or `None` if not racing or already finished.
    pub fn local_finish(
        &mut self,
        wpm: u32,
        accuracy: f64,
        registry: &mut RoomRegistry,
        now_ms: u64,
    ) -> Option<u32> {
        if self.phase != RacePhase::Racing {
            return None;
        }
        let local = self.local_id.clone();
        let rank = self.ledger.record_finish(&local, wpm, accuracy)?;
        registry.mark_finished(&local, wpm, accuracy, rank, now_ms);
        Some(rank)
    }

    /// A peer's `FINISH`; duplicates are ignored.
    pub fn on_finish(
        &mut self,
        from: &PeerId,
        report: FinishReport,
        registry: &mut RoomRegistry,
        now_ms: u64,
    ) -> Vec<RaceAction> {
        if self.phase != RacePhase::Racing {
            tracing::debug!("Ignoring FINISH from {} during {}", from, self.phase.as_str());
            return Vec::new();
        }
        let Some(rank) = self.ledger.record_finish(from, report.wpm, report.accuracy) else {
            tracing::debug!("Duplicate or unknown FINISH from {}", from);
            return Vec::new();
        };
        registry.mark_finished(from, report.wpm, report.accuracy, rank, now_ms);
        tracing::info!(
            "{} finished #{} ({}/{} done)",
            from,
            rank,
            self.ledger.finished_count(),
            self.ledger.roster_len()
        );
        self.check_completion(registry)
    }

    /// Host: publish results once nobody is still racing.
    pub fn check_completion(&mut self, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.is_host || self.phase != RacePhase::Racing || !self.ledger.is_complete() {
            return actions;
        }
        let rankings = self.ledger.rankings();
        actions.push(RaceAction::Broadcast(Message::RaceResults(rankings.clone())));
        self.finish_race(rankings, registry, &mut actions);
        actions
    }

    fn finish_race(
        &mut self,
        rankings: Vec<Ranking>,
        registry: &mut RoomRegistry,
        actions: &mut Vec<RaceAction>,
    ) {
        registry.apply_ranks(rankings.iter().map(|r| (&r.id, r.position)));
        self.rankings = rankings;
        self.enter(RacePhase::Results, actions);
        actions.push(RaceAction::StopProgress);
        actions.push(RaceAction::Notify(NetEvent::RaceFinished {
            rankings: self.rankings.clone(),
        }));
    }

    /// A player left the room; re-evaluate readiness and completion.
    pub fn player_removed(&mut self, id: &PeerId, registry: &mut RoomRegistry, now_ms: u64) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        match self.phase {
            RacePhase::ReadyCheck if self.is_host => {
                self.maybe_finish_ready_check(registry, now_ms, &mut actions);
            }
            RacePhase::Racing => {
                if self.ledger.depart(id) {
                    tracing::info!("{} left mid-race and ranks last", id);
                }
                actions.extend(self.check_completion(registry));
            }
            _ => {}
        }
        actions
    }

    /// Leave Results for the Lobby. The host also draws a new text.
    pub fn return_to_lobby(&mut self, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !matches!(self.phase, RacePhase::Results | RacePhase::Lobby) {
            tracing::debug!("Cannot return to lobby during {}", self.phase.as_str());
            return actions;
        }
        self.clear_race();
        self.invite_pending = false;
        registry.reset_race();
        self.enter(RacePhase::Lobby, &mut actions);
        actions.push(RaceAction::Notify(NetEvent::ReturnedToLobby));
        if self.is_host {
            actions.extend(self.refresh_text());
        }
        actions
    }

    /// Host: invite everyone to a rematch and go back to the lobby.
    pub fn send_play_again_invite(&mut self, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if !self.host_only("sendPlayAgainInvite") {
            return actions;
        }
        if self.phase != RacePhase::Results {
            tracing::debug!("Play-again invite only makes sense after a race");
            return actions;
        }
        actions.push(RaceAction::Broadcast(Message::PlayAgainInvite));
        actions.extend(self.return_to_lobby(registry));
        actions
    }

    /// Guest: accept a pending rematch invite.
    pub fn accept_play_again(&mut self, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host || !self.invite_pending {
            tracing::debug!("No play-again invite to accept");
            return actions;
        }
        self.invite_pending = false;
        actions.push(RaceAction::SendToHost(Message::PlayAgainResponse {
            accepted: true,
        }));
        if self.phase == RacePhase::Results {
            actions.extend(self.return_to_lobby(registry));
        }
        actions
    }

    /// Guest: decline a pending rematch invite, then leave.
    pub fn decline_play_again(&mut self) -> Vec<RaceAction> {
        if self.is_host || !self.invite_pending {
            tracing::debug!("No play-again invite to decline");
            return Vec::new();
        }
        self.invite_pending = false;
        vec![
            RaceAction::SendToHost(Message::PlayAgainResponse { accepted: false }),
            RaceAction::Leave,
        ]
    }

    /// Host: a guest answered the rematch invite.
    pub fn on_play_again_response(&mut self, name: &str, accepted: bool) -> Vec<RaceAction> {
        if !self.is_host {
            return Vec::new();
        }
        let event = if accepted {
            NetEvent::PlayAgainAccepted {
                name: name.to_string(),
            }
        } else {
            NetEvent::PlayAgainDeclined {
                name: name.to_string(),
            }
        };
        vec![RaceAction::Notify(event)]
    }

    /// Guest: host shared a text. Applying the same text twice is a no-op.
    pub fn on_game_text(&mut self, text: RaceText) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host {
            return actions;
        }
        if !matches!(self.phase, RacePhase::Lobby | RacePhase::Results) {
            tracing::debug!("Ignoring GAME_TEXT during {}", self.phase.as_str());
            return actions;
        }
        self.set_language_inner(text.language, &mut actions);
        self.set_text_inner(text.text, &mut actions);
        actions
    }

    /// Guest: host opened a ready check; sync the text and answer.
    pub fn on_ready_check(&mut self, text: RaceText, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host {
            return actions;
        }
        if !matches!(
            self.phase,
            RacePhase::Lobby | RacePhase::Results | RacePhase::ReadyCheck
        ) {
            tracing::debug!("Ignoring READY_CHECK during {}", self.phase.as_str());
            return actions;
        }
        self.set_language_inner(text.language, &mut actions);
        self.set_text_inner(text.text, &mut actions);
        if self.phase != RacePhase::ReadyCheck {
            self.clear_race();
            self.rankings.clear();
            self.invite_pending = false;
            registry.reset_race();
            self.enter(RacePhase::ReadyCheck, &mut actions);
        }
        actions.push(RaceAction::SendToHost(Message::ReadyResponse));
        actions
    }

    /// Guest: host started the countdown.
    pub fn on_countdown(&mut self, seconds: u32, now_ms: u64) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host || self.phase != RacePhase::ReadyCheck {
            tracing::debug!("Ignoring COUNTDOWN during {}", self.phase.as_str());
            return actions;
        }
        self.countdown = Some(Countdown::start(seconds, now_ms));
        self.enter(RacePhase::Countdown, &mut actions);
        actions.push(RaceAction::Notify(NetEvent::CountdownStarted { seconds }));
        actions
    }

    /// Guest: the race is on.
    pub fn on_game_start(&mut self, registry: &RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host || self.phase != RacePhase::Countdown {
            tracing::debug!("Ignoring GAME_START during {}", self.phase.as_str());
            return actions;
        }
        self.start_racing(registry, &mut actions);
        actions
    }

    /// Guest: the host published rankings.
    pub fn on_results(&mut self, rankings: Vec<Ranking>, registry: &mut RoomRegistry) -> Vec<RaceAction> {
        let mut actions = Vec::new();
        if self.is_host || self.phase != RacePhase::Racing {
            tracing::debug!("Ignoring RACE_RESULTS during {}", self.phase.as_str());
            return actions;
        }
        self.finish_race(rankings, registry, &mut actions);
        actions
    }

    /// Guest: host invites a rematch.
    pub fn on_play_again_invite(&mut self) -> Vec<RaceAction> {
        if self.is_host {
            return Vec::new();
        }
        self.invite_pending = true;
        vec![RaceAction::Notify(NetEvent::PlayAgainInviteReceived)]
    }
}
