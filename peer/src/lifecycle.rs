//! Match phases, slot assignment and the bounded player wait
//!
//! All waits are tick-driven state machines. `advance` is called once per
//! network tick and never blocks.

use crate::bootstrap::MatchParams;
use crate::config::MatchConfig;
use crate::error::{MatchError, CODE_LEFT_BEFORE_START};
use crate::report::{MatchAbort, MatchResult, Outcome};
use log::{info, warn};
use shared::{PeerId, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    WaitingForPlayers,
    Running,
    Ended { winner: Slot },
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Pending,
    Ready,
    TimedOut,
}

/// Checks a readiness condition every `poll_interval` ticks until `deadline`.
#[derive(Debug, Clone)]
pub struct WaitForPlayers {
    deadline: u64,
    poll_interval: u64,
    next_check: u64,
}

impl WaitForPlayers {
    pub fn new(now: u64, timeout: u64, poll_interval: u64) -> Self {
        Self {
            deadline: now.saturating_add(timeout),
            poll_interval: poll_interval.max(1),
            next_check: now,
        }
    }

    pub fn advance(&mut self, now: u64, ready: impl FnOnce() -> bool) -> Poll {
        if now < self.next_check {
            return Poll::Pending;
        }
        if ready() {
            return Poll::Ready;
        }
        if now >= self.deadline {
            return Poll::TimedOut;
        }
        self.next_check = now + self.poll_interval;
        Poll::Pending
    }

    pub fn deadline(&self) -> u64 {
        self.deadline
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub match_id: String,
    slots: [Option<PeerId>; 2],
    announced: [bool; 2],
    open: bool,
}

impl Session {
    fn new(match_id: String) -> Self {
        Self {
            match_id,
            slots: [None; 2],
            announced: [false; 2],
            open: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn holder(&self, slot: Slot) -> Option<PeerId> {
        self.slots[slot.index()]
    }

    pub fn slot_of(&self, peer: PeerId) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()] == Some(peer))
    }
}

/// What a departure means for the match.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    Ignore,
    Winner(Slot),
    Abort(MatchError),
}

#[derive(Debug)]
pub struct MatchLifecycle {
    params: MatchParams,
    phase: MatchPhase,
    session: Session,
    wait: WaitForPlayers,
    result_settle_ticks: u64,
    pending_result: Option<(u64, MatchResult)>,
}

impl MatchLifecycle {
    pub fn new(params: MatchParams, config: &MatchConfig, now: u64) -> Self {
        Self {
            session: Session::new(params.match_id.clone()),
            params,
            phase: MatchPhase::WaitingForPlayers,
            wait: WaitForPlayers::new(now, config.wait_timeout_ticks, config.wait_poll_ticks),
            result_settle_ticks: config.result_settle_ticks,
            pending_result: None,
        }
    }

    /// Assigns the next free slot. Rejoining returns the slot already held.
    pub fn join(&mut self, peer: PeerId) -> Result<Slot, MatchError> {
        if let Some(slot) = self.session.slot_of(peer) {
            return Ok(slot);
        }

        let free = Slot::ALL
            .into_iter()
            .find(|slot| self.session.slots[slot.index()].is_none());
        let Some(slot) = free.filter(|_| self.session.open) else {
            warn!("Session {} full, rejecting {}", self.session.match_id, peer);
            return Err(MatchError::SessionFull { peer });
        };

        self.session.slots[slot.index()] = Some(peer);
        if self.session.slots.iter().all(Option::is_some) {
            self.session.open = false;
        }
        info!("{} joined as {}", peer, slot);
        Ok(slot)
    }

    pub fn announce(&mut self, slot: Slot) {
        self.session.announced[slot.index()] = true;
    }

    pub fn both_slots_ready(&self) -> bool {
        Slot::ALL.into_iter().all(|slot| {
            self.session.slots[slot.index()].is_some() && self.session.announced[slot.index()]
        })
    }

    /// Advances the player wait. `Ready` moves the match to `Running`.
    pub fn poll_ready(&mut self, now: u64) -> Poll {
        if self.phase != MatchPhase::WaitingForPlayers {
            return Poll::Pending;
        }

        let ready = self.both_slots_ready();
        let poll = self.wait.advance(now, || ready);
        if poll == Poll::Ready {
            self.phase = MatchPhase::Running;
            self.session.open = false;
            info!("Both players ready, match {} running", self.session.match_id);
        }
        poll
    }

    /// Decides the consequence of departures given the peers still active.
    pub fn on_peers_left(&self, remaining: &[PeerId]) -> LeaveOutcome {
        match self.phase {
            MatchPhase::Ended { .. } | MatchPhase::Aborted => LeaveOutcome::Ignore,
            MatchPhase::WaitingForPlayers => LeaveOutcome::Abort(MatchError::setup(
                "Player left before the match started",
                CODE_LEFT_BEFORE_START,
            )),
            MatchPhase::Running => match remaining {
                [survivor] => match self.session.slot_of(*survivor) {
                    Some(slot) => LeaveOutcome::Winner(slot),
                    None => LeaveOutcome::Abort(MatchError::UnexpectedPeerCount { remaining: 1 }),
                },
                _ => LeaveOutcome::Abort(MatchError::UnexpectedPeerCount {
                    remaining: remaining.len(),
                }),
            },
        }
    }

    /// One-shot end-of-match transition. Schedules the result report.
    pub fn finish(&mut self, winner: Slot, scores: [u32; 2], local: Slot, now: u64) -> bool {
        if matches!(self.phase, MatchPhase::Ended { .. } | MatchPhase::Aborted) {
            return false;
        }

        self.phase = MatchPhase::Ended { winner };
        let result = MatchResult {
            match_id: self.params.match_id.clone(),
            player_id: self.params.player_id.clone(),
            opponent_id: self.params.opponent_id.clone(),
            outcome: if winner == local {
                Outcome::Won
            } else {
                Outcome::Lost
            },
            local_score: scores[local.index()],
            opponent_score: scores[local.opponent().index()],
        };
        info!(
            "Match {} ended, {} wins {:?}",
            self.session.match_id, winner, scores
        );
        self.pending_result = Some((now.saturating_add(self.result_settle_ticks), result));
        true
    }

    /// Halts the match. Only the first fatal error produces an abort report.
    pub fn abort(&mut self, err: &MatchError) -> Option<MatchAbort> {
        if matches!(self.phase, MatchPhase::Ended { .. } | MatchPhase::Aborted) {
            warn!("Ignoring {} after the match already finished", err);
            return None;
        }
        self.phase = MatchPhase::Aborted;
        self.pending_result = None;
        Some(MatchAbort::from(err))
    }

    pub fn take_due_result(&mut self, now: u64) -> Option<MatchResult> {
        match &self.pending_result {
            Some((due, _)) if now >= *due => self.pending_result.take().map(|(_, r)| r),
            _ => None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn wait_deadline(&self) -> u64 {
        self.wait.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CODE_TIMEOUT, CODE_UNEXPECTED_PEER_COUNT};

    fn params() -> MatchParams {
        MatchParams {
            match_id: "m1".into(),
            player_id: "alice".into(),
            opponent_id: "bob".into(),
        }
    }

    fn lifecycle() -> MatchLifecycle {
        MatchLifecycle::new(params(), &MatchConfig::default(), 0)
    }

    fn running() -> MatchLifecycle {
        let mut lifecycle = lifecycle();
        for peer in [PeerId(1), PeerId(2)] {
            let slot = lifecycle.join(peer).unwrap();
            lifecycle.announce(slot);
        }
        assert_eq!(lifecycle.poll_ready(0), Poll::Ready);
        lifecycle
    }

    #[test]
    fn test_join_order_assigns_slots() {
        let mut lifecycle = lifecycle();
        assert_eq!(lifecycle.join(PeerId(1)), Ok(Slot::Player1));
        assert!(lifecycle.session().is_open());
        assert_eq!(lifecycle.join(PeerId(2)), Ok(Slot::Player2));
        assert!(!lifecycle.session().is_open());
        assert_eq!(
            lifecycle.join(PeerId(3)),
            Err(MatchError::SessionFull { peer: PeerId(3) })
        );
        assert_eq!(lifecycle.join(PeerId(1)), Ok(Slot::Player1));
    }

    #[test]
    fn test_wait_polls_on_interval() {
        let mut wait = WaitForPlayers::new(0, 100, 30);
        let mut checks = 0;

        for now in 0..90 {
            wait.advance(now, || {
                checks += 1;
                false
            });
        }
        assert_eq!(checks, 3);
        assert_eq!(wait.advance(90, || true), Poll::Ready);
    }

    #[test]
    fn test_wait_times_out_after_deadline() {
        let mut wait = WaitForPlayers::new(0, 60, 30);
        assert_eq!(wait.advance(0, || false), Poll::Pending);
        assert_eq!(wait.advance(30, || false), Poll::Pending);
        assert_eq!(wait.advance(59, || false), Poll::Pending);
        assert_eq!(wait.advance(60, || false), Poll::TimedOut);
    }

    #[test]
    fn test_ready_needs_announcement() {
        let mut lifecycle = lifecycle();
        lifecycle.join(PeerId(1)).unwrap();
        lifecycle.join(PeerId(2)).unwrap();
        lifecycle.announce(Slot::Player1);
        assert_eq!(lifecycle.poll_ready(0), Poll::Pending);

        lifecycle.announce(Slot::Player2);
        assert_eq!(lifecycle.poll_ready(30), Poll::Ready);
        assert!(lifecycle.is_running());
    }

    #[test]
    fn test_leave_with_survivor_names_winner() {
        let lifecycle = running();
        assert_eq!(
            lifecycle.on_peers_left(&[PeerId(2)]),
            LeaveOutcome::Winner(Slot::Player2)
        );
    }

    #[test]
    fn test_leave_with_nobody_left_aborts() {
        let lifecycle = running();
        match lifecycle.on_peers_left(&[]) {
            LeaveOutcome::Abort(err) => assert_eq!(err.error_code(), CODE_UNEXPECTED_PEER_COUNT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leave_before_start_is_setup_failure() {
        let mut lifecycle = lifecycle();
        lifecycle.join(PeerId(1)).unwrap();
        match lifecycle.on_peers_left(&[PeerId(1)]) {
            LeaveOutcome::Abort(err) => assert_eq!(err.error_code(), CODE_LEFT_BEFORE_START),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_finish_is_one_shot_and_settles() {
        let mut lifecycle = running();
        assert!(lifecycle.finish(Slot::Player1, [50, 8], Slot::Player2, 10));
        assert!(!lifecycle.finish(Slot::Player1, [50, 8], Slot::Player2, 11));
        assert_eq!(lifecycle.on_peers_left(&[]), LeaveOutcome::Ignore);

        assert!(lifecycle.take_due_result(309).is_none());
        let result = lifecycle.take_due_result(310).unwrap();
        assert_eq!(result.outcome, Outcome::Lost);
        assert_eq!(result.local_score, 8);
        assert_eq!(result.opponent_score, 50);
        assert_eq!(result.player_id, "alice");
        assert!(lifecycle.take_due_result(400).is_none());
    }

    #[test]
    fn test_abort_once() {
        let mut lifecycle = lifecycle();
        let err = MatchError::Timeout {
            waiting_for: "players",
            ticks: 12_000,
        };
        let abort = lifecycle.abort(&err).unwrap();
        assert_eq!(abort.error_code, CODE_TIMEOUT);
        assert!(lifecycle.abort(&err).is_none());
        assert_eq!(lifecycle.phase(), MatchPhase::Aborted);
        assert!(!lifecycle.finish(Slot::Player1, [0, 0], Slot::Player1, 0));
    }
}
