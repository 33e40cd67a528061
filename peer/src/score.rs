use crate::config::MatchConfig;
use log::{debug, info};
use shared::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreChange {
    /// Match not running or already ended.
    Ignored,
    Applied { scores: [u32; 2] },
    /// First crossing of the win threshold. Reported once.
    Won { winner: Slot, scores: [u32; 2] },
}

/// Per-slot score with a one-way `ended` latch.
///
/// Arithmetic methods are only called on the state authority. Other peers
/// mirror the authority through `apply_push` and `end`.
#[derive(Debug)]
pub struct ScoreArbiter {
    scores: [u32; 2],
    points_per_goal: u32,
    penalty_per_miss: u32,
    win_threshold: u32,
    started: bool,
    ended: bool,
}

impl ScoreArbiter {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            scores: [0; 2],
            points_per_goal: config.points_per_goal,
            penalty_per_miss: config.penalty_per_miss,
            win_threshold: config.win_threshold,
            started: false,
            ended: false,
        }
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    fn accepts_mutation(&self) -> bool {
        self.started && !self.ended
    }

    pub fn apply_increment(&mut self, slot: Slot) -> ScoreChange {
        if !self.accepts_mutation() {
            return ScoreChange::Ignored;
        }

        let score = &mut self.scores[slot.index()];
        *score = score.saturating_add(self.points_per_goal);
        debug!("{} scored, now {:?}", slot, self.scores);

        if self.scores[slot.index()] >= self.win_threshold {
            self.ended = true;
            info!("{} reached {} points", slot, self.win_threshold);
            ScoreChange::Won {
                winner: slot,
                scores: self.scores,
            }
        } else {
            ScoreChange::Applied {
                scores: self.scores,
            }
        }
    }

    /// Floors at zero and never checks for a win.
    pub fn apply_decrement(&mut self, slot: Slot) -> ScoreChange {
        if !self.accepts_mutation() {
            return ScoreChange::Ignored;
        }

        let score = &mut self.scores[slot.index()];
        *score = score.saturating_sub(self.penalty_per_miss);
        debug!("{} penalized, now {:?}", slot, self.scores);
        ScoreChange::Applied {
            scores: self.scores,
        }
    }

    /// Positive deltas score a goal, negative deltas a penalty, zero is ignored.
    pub fn apply_delta(&mut self, slot: Slot, delta: i32) -> ScoreChange {
        match delta.signum() {
            1 => self.apply_increment(slot),
            -1 => self.apply_decrement(slot),
            _ => ScoreChange::Ignored,
        }
    }

    /// Mirrors an authority push. Ignored once the match has ended.
    pub fn apply_push(&mut self, scores: [u32; 2]) -> bool {
        if self.ended {
            return false;
        }
        self.scores = scores;
        true
    }

    /// Applies the final scores from `EndMatch`. Only the first end counts.
    pub fn end(&mut self, scores: [u32; 2]) {
        if self.ended {
            return;
        }
        self.scores = scores;
        self.ended = true;
    }

    /// Latches `ended` for a winner by elimination and returns the final scores.
    pub fn declare_winner(&mut self, winner: Slot) -> Option<[u32; 2]> {
        if self.ended {
            return None;
        }
        self.ended = true;
        info!("{} wins by elimination", winner);
        Some(self.scores)
    }

    pub fn scores(&self) -> [u32; 2] {
        self.scores
    }

    pub fn score(&self, slot: Slot) -> u32 {
        self.scores[slot.index()]
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn win_threshold(&self) -> u32 {
        self.win_threshold
    }
}
