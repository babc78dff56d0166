//! Local race progress reporting.
//!
//! While racing, the local typing position is broadcast at a fixed rate.
//! Finishing emits exactly one `FINISH` and silences further updates.

use super::protocol::{FinishReport, Message, ProgressUpdate};

/// Progress broadcast rate in Hz.
pub const PROGRESS_RATE_HZ: u64 = 20;

/// Progress broadcast period in milliseconds.
pub const PROGRESS_INTERVAL_MS: u64 = 1000 / PROGRESS_RATE_HZ;

/// Characters per word for WPM.
pub const CHARS_PER_WORD: f64 = 5.0;

/// Words per minute for `chars` typed over `elapsed_ms`.
pub fn words_per_minute(chars: u32, elapsed_ms: u64) -> u32 {
    if elapsed_ms == 0 {
        return 0;
    }
    let minutes = elapsed_ms as f64 / 60_000.0;
    (f64::from(chars) / CHARS_PER_WORD / minutes).round() as u32
}

/// Reporter for the local player's progress.
#[derive(Debug, Default)]
pub struct ProgressSync {
    active: bool,
    finished: bool,
    latest: ProgressUpdate,
}

impl ProgressSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh race.
    pub fn start(&mut self) {
        self.active = true;
        self.finished = false;
        self.latest = ProgressUpdate::default();
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Records the latest local progress; sent on the next tick.
    pub fn update(&mut self, position: u32, total: u32, wpm: u32) {
        if !self.active || self.finished {
            return;
        }
        self.latest = ProgressUpdate {
            position,
            total,
            wpm,
            finished: false,
        };
    }

    pub fn latest(&self) -> ProgressUpdate {
        self.latest
    }

    /// The periodic `PROGRESS_UPDATE`, or `None` once finished or stopped.
    pub fn tick(&self) -> Option<Message> {
        if !self.active || self.finished {
            return None;
        }
        Some(Message::ProgressUpdate(self.latest))
    }

    /// The single `FINISH` for this race. Later calls return `None`.
    pub fn finish(&mut self, wpm: u32, accuracy: f64, position_hint: u32) -> Option<Message> {
        if !self.active || self.finished {
            return None;
        }
        self.finished = true;
        self.latest.finished = true;
        self.latest.wpm = wpm;
        self.latest.position = self.latest.total.max(self.latest.position);
        Some(Message::Finish(FinishReport {
            wpm,
            accuracy,
            position: position_hint,
        }))
    }
}
