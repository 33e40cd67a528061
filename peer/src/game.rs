use crate::authority::{AuthorityResolver, Route};
use crate::bootstrap::MatchParams;
use crate::config::MatchConfig;
use crate::error::{MatchError, CODE_MISSING_COMPONENTS};
use crate::lifecycle::{LeaveOutcome, MatchLifecycle, MatchPhase, Poll};
use crate::random_sync::DeterministicRandomSync;
use crate::replicator::{EntityStateReplicator, Transform};
use crate::report::{Report, ReportSink};
use crate::rpc::RpcChannel;
use crate::score::{ScoreArbiter, ScoreChange};
use log::{debug, error, info, warn};
use shared::{EntityRef, PeerId, RpcKind, RpcMessage, Slot};

/// One peer's view of a match.
///
/// Owns every replication component and is stepped once per network tick.
/// The transport feeds it with `receive`, `join` and `on_peers_left` and
/// ships whatever `drain_outbox` returns.
#[derive(Debug)]
pub struct MatchPeer {
    config: MatchConfig,
    resolver: AuthorityResolver,
    channel: RpcChannel,
    random: DeterministicRandomSync,
    replicator: EntityStateReplicator,
    score: ScoreArbiter,
    lifecycle: MatchLifecycle,
    tick: u64,
    reports: Vec<Report>,
    delivered: usize,
    halted: bool,
}

impl MatchPeer {
    pub fn new(
        params: MatchParams,
        config: MatchConfig,
        local: PeerId,
        state_authority: PeerId,
    ) -> Self {
        Self {
            resolver: AuthorityResolver::new(local, state_authority),
            channel: RpcChannel::new(),
            random: DeterministicRandomSync::new(),
            replicator: EntityStateReplicator::new(&config),
            score: ScoreArbiter::new(&config),
            lifecycle: MatchLifecycle::new(params, &config, 0),
            config,
            tick: 0,
            reports: Vec::new(),
            delivered: 0,
            halted: false,
        }
    }

    pub fn with_random_sync(mut self, random: DeterministicRandomSync) -> Self {
        self.random = random;
        self
    }

    /// Admits a peer in transport admission order and spawns its slot.
    ///
    /// The local slot is announced again on every join so a late joiner
    /// hears it even if the earlier announcement went to nobody.
    pub fn join(&mut self, peer: PeerId) -> Result<Slot, MatchError> {
        let slot = self.lifecycle.join(peer)?;
        self.resolver.assign_slot(peer, slot);

        for platform in self.replicator.spawn(slot) {
            self.random.register(platform);
        }

        self.announce_local_slot();
        Ok(slot)
    }

    pub fn on_authority_changed(&mut self, peer: PeerId) {
        if self.halted {
            return;
        }
        self.resolver.set_state_authority(peer);
    }

    pub fn on_peers_left(&mut self, peers: &[PeerId]) {
        if self.halted {
            return;
        }

        let mut changed = false;
        for &peer in peers {
            if self.resolver.mark_left(peer) {
                info!("{} left the match", peer);
                changed = true;
            }
        }
        if !changed {
            return;
        }

        let remaining = self.resolver.active_peers();
        match self.lifecycle.on_peers_left(&remaining) {
            LeaveOutcome::Ignore => {}
            LeaveOutcome::Winner(slot) => {
                // The survivor is promoted whether or not the transport said so yet.
                if !self.resolver.is_state_authority(remaining[0]) {
                    self.resolver.set_state_authority(remaining[0]);
                }
                if let Some(scores) = self.score.declare_winner(slot) {
                    self.broadcast(RpcMessage::EndMatch {
                        winner: slot,
                        scores,
                    });
                }
            }
            LeaveOutcome::Abort(err) => self.fail(err),
        }
    }

    pub fn receive(&mut self, sender: PeerId, message: RpcMessage) {
        if !self.halted {
            self.channel.receive(sender, message);
        }
    }

    /// Local control input for the local slot's tower.
    pub fn submit_input(&mut self, rotation_delta: f32) {
        let Some(slot) = self.gameplay_slot("input") else {
            return;
        };
        match self.resolver.route() {
            Route::Apply => self.rotate_as_authority(self.resolver.local(), slot, rotation_delta),
            Route::Request => {
                let seq = self.channel.next_request_seq(RpcKind::SubmitInput);
                self.send(RpcMessage::SubmitInput {
                    slot,
                    rotation_delta,
                    seq,
                })
            }
        }
    }

    pub fn score_goal(&mut self, slot: Slot) {
        self.request_score(slot, 1);
    }

    pub fn penalize(&mut self, slot: Slot) {
        self.request_score(slot, -1);
    }

    /// The slot's ball hit its tower's repositioning trigger.
    pub fn tower_contact(&mut self, slot: Slot) {
        if self.gameplay_slot("reposition").is_none() {
            return;
        }
        let delta_y = self.config.reposition_offset;
        match self.resolver.route() {
            Route::Apply => self.reposition_as_authority(self.resolver.local(), slot, delta_y),
            Route::Request => {
                let seq = self.channel.next_request_seq(RpcKind::RequestReposition);
                self.send(RpcMessage::RequestReposition { slot, delta_y, seq })
            }
        }
    }

    /// The slot's ball fell past platform `index`. Only the authority acts on it.
    pub fn platform_passed(&mut self, slot: Slot, index: u8) {
        if !self.gameplay_active() || self.resolver.route() == Route::Request {
            return;
        }
        if let Some(push) = self.replicator.advance_platform(slot, index) {
            self.broadcast(push);
        }
    }

    /// The slot's ball touched ground. Only the authority acts on it; the
    /// jump is applied on its next tick.
    pub fn ground_contact(&mut self, slot: Slot) {
        if !self.gameplay_active() || self.resolver.route() == Route::Request {
            return;
        }
        self.replicator.request_jump(slot);
    }

    pub fn reseed(&mut self, slot: Slot) -> Result<(), MatchError> {
        self.resolver.ensure_state_authority("reseed")?;
        let seed = self.random.draw_seed();
        self.reseed_with(slot, seed)
    }

    pub fn reseed_with(&mut self, slot: Slot, seed: i32) -> Result<(), MatchError> {
        self.resolver.ensure_state_authority("reseed")?;
        let derived = self.random.apply(slot, seed);
        self.replicator.apply_derived(&derived);
        self.broadcast(RpcMessage::ReseedRandom { slot, seed });
        Ok(())
    }

    /// Advances one network tick: inbound dispatch, the player wait, and the
    /// settle timer for the result report.
    pub fn tick(&mut self) {
        if self.halted {
            return;
        }
        self.tick += 1;

        self.process_inbound();
        self.advance_wait();
        self.advance_balls();
        self.process_inbound();

        if let Some(result) = self.lifecycle.take_due_result(self.tick) {
            info!("Reporting result for match {}", result.match_id);
            self.reports.push(Report::Result(result));
        }
    }

    pub fn drain_outbox(&mut self) -> Vec<RpcMessage> {
        self.channel.drain_outbox()
    }

    pub fn flush_reports(&mut self, sink: &mut dyn ReportSink) {
        for report in self.reports.drain(..) {
            sink.deliver(&report);
            self.delivered += 1;
        }
    }

    /// True once the single outward report for this match has been delivered.
    pub fn is_finished(&self) -> bool {
        self.delivered > 0
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn local(&self) -> PeerId {
        self.resolver.local()
    }

    pub fn local_slot(&self) -> Option<Slot> {
        self.resolver.local_slot()
    }

    pub fn is_state_authority(&self) -> bool {
        self.resolver.local_is_authority()
    }

    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    pub fn scores(&self) -> [u32; 2] {
        self.score.scores()
    }

    pub fn is_ended(&self) -> bool {
        self.score.is_ended()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn transform(&self, entity: EntityRef) -> Option<Transform> {
        self.replicator.transform(entity)
    }

    pub fn replicator(&self) -> &EntityStateReplicator {
        &self.replicator
    }

    pub fn random(&self) -> &DeterministicRandomSync {
        &self.random
    }

    pub fn resolver(&self) -> &AuthorityResolver {
        &self.resolver
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    fn process_inbound(&mut self) {
        while let Some(next) = self.channel.next_inbound(&self.resolver) {
            match next {
                Ok((sender, message)) => self.dispatch(sender, message),
                Err(err) => warn!("{}", err),
            }
        }
    }

    fn dispatch(&mut self, sender: PeerId, message: RpcMessage) {
        debug!("Applying {:?} from {}", message, sender);
        match message {
            RpcMessage::ReseedRandom { slot, seed } => {
                let derived = self.random.apply(slot, seed);
                self.replicator.apply_derived(&derived);
            }
            RpcMessage::RequestReposition { slot, delta_y, .. } => {
                self.reposition_as_authority(sender, slot, delta_y)
            }
            RpcMessage::PushEntityPosition {
                entity,
                position,
                rotation,
            } => {
                self.replicator.apply_push(entity, position, rotation);
            }
            RpcMessage::SetPlayerSlot { slot } => self.on_slot_announced(sender, slot),
            RpcMessage::RequestScoreDelta { slot, delta, .. } => {
                self.score_as_authority(sender, slot, delta)
            }
            RpcMessage::EndMatch { winner, scores } => self.on_end_match(winner, scores),
            RpcMessage::PushScore { scores } => {
                self.score.apply_push(scores);
            }
            RpcMessage::SubmitInput {
                slot,
                rotation_delta,
                ..
            } => self.rotate_as_authority(sender, slot, rotation_delta),
        }
    }

    fn advance_wait(&mut self) {
        if self.lifecycle.phase() != MatchPhase::WaitingForPlayers {
            return;
        }

        // Announcements are re-sent until the wait resolves; receivers are idempotent.
        if self.tick % self.config.wait_poll_ticks.max(1) == 0 {
            self.announce_local_slot();
        }

        match self.lifecycle.poll_ready(self.tick) {
            Poll::Pending => {}
            Poll::Ready => self.start_match(),
            Poll::TimedOut => self.fail(MatchError::Timeout {
                waiting_for: "players",
                ticks: self.config.wait_timeout_ticks,
            }),
        }
    }

    fn advance_balls(&mut self) {
        if !self.gameplay_active() || !self.resolver.local_is_authority() {
            return;
        }
        let dt = self.config.tick_seconds();
        for push in self.replicator.step_balls(dt) {
            self.broadcast(push);
        }
    }

    fn start_match(&mut self) {
        if let Some(slot) = Slot::ALL
            .into_iter()
            .find(|slot| !self.replicator.is_spawned(*slot))
        {
            self.fail(MatchError::setup(
                format!("{} has no spawned tower", slot),
                CODE_MISSING_COMPONENTS,
            ));
            return;
        }

        self.score.start();
        if self.resolver.local_is_authority() {
            for slot in Slot::ALL {
                if let Err(e) = self.reseed(slot) {
                    error!("Initial reseed of {} failed: {}", slot, e);
                }
            }
        }
    }

    fn announce_local_slot(&mut self) {
        if let Some(slot) = self.resolver.local_slot() {
            self.send(RpcMessage::SetPlayerSlot { slot });
        }
    }

    fn on_slot_announced(&mut self, sender: PeerId, slot: Slot) {
        match self.lifecycle.session().holder(slot) {
            Some(holder) if holder == sender => {
                self.resolver.assign_slot(sender, slot);
                self.lifecycle.announce(slot);
            }
            holder => warn!(
                "{} announced {} but the session has {:?}",
                sender, slot, holder
            ),
        }
    }

    fn on_end_match(&mut self, winner: Slot, scores: [u32; 2]) {
        self.score.end(scores);
        let Some(local) = self.resolver.local_slot() else {
            warn!("Match ended before a local slot was assigned");
            return;
        };
        self.lifecycle.finish(winner, scores, local, self.tick);
    }

    fn request_score(&mut self, slot: Slot, delta: i32) {
        if self.gameplay_slot("score").is_none() {
            return;
        }
        match self.resolver.route() {
            Route::Apply => self.score_as_authority(self.resolver.local(), slot, delta),
            Route::Request => {
                let seq = self.channel.next_request_seq(RpcKind::RequestScoreDelta);
                self.send(RpcMessage::RequestScoreDelta { slot, delta, seq })
            }
        }
    }

    fn score_as_authority(&mut self, sender: PeerId, slot: Slot, delta: i32) {
        if !self.authority_may_mutate("score", sender, slot) {
            return;
        }

        match self.score.apply_delta(slot, delta) {
            ScoreChange::Ignored => {}
            ScoreChange::Applied { scores } => self.broadcast(RpcMessage::PushScore { scores }),
            ScoreChange::Won { winner, scores } => {
                self.broadcast(RpcMessage::PushScore { scores });
                self.broadcast(RpcMessage::EndMatch { winner, scores });
            }
        }
    }

    fn reposition_as_authority(&mut self, sender: PeerId, slot: Slot, delta_y: f32) {
        if !self.authority_may_mutate("reposition", sender, slot) {
            return;
        }
        if !self.replicator.accept_trigger(slot, self.tick) {
            return;
        }

        for push in self.replicator.reposition(slot, delta_y) {
            self.broadcast(push);
        }
        if let Err(e) = self.reseed(slot) {
            error!("Reseed after reposition failed: {}", e);
        }
    }

    fn rotate_as_authority(&mut self, sender: PeerId, slot: Slot, rotation_delta: f32) {
        if !self.authority_may_mutate("rotate", sender, slot) {
            return;
        }
        let dt = self.config.tick_seconds();
        if let Some(push) = self.replicator.rotate(slot, rotation_delta, dt) {
            self.broadcast(push);
        }
    }

    /// Authority-side validation shared by every request handler.
    fn authority_may_mutate(&self, operation: &'static str, sender: PeerId, slot: Slot) -> bool {
        if !self.gameplay_active() {
            debug!("Dropping {} for {}: match not running", operation, slot);
            return false;
        }
        if self.resolver.ensure_state_authority(operation).is_err() {
            return false;
        }
        if !self.resolver.is_state_authority(sender) && !self.resolver.is_input_authority(sender, slot)
        {
            warn!("{} may not {} for {}", sender, operation, slot);
            return false;
        }
        true
    }

    fn gameplay_active(&self) -> bool {
        !self.halted && self.lifecycle.is_running() && !self.score.is_ended()
    }

    /// Local slot, if local gameplay input is currently accepted.
    fn gameplay_slot(&self, operation: &str) -> Option<Slot> {
        if !self.gameplay_active() {
            debug!("Ignoring local {}: match not running", operation);
            return None;
        }
        self.resolver.local_slot()
    }

    fn send(&mut self, message: RpcMessage) {
        if let Err(e) = self.channel.send(&self.resolver, message) {
            warn!("Send failed: {}", e);
        }
    }

    fn broadcast(&mut self, message: RpcMessage) {
        if let Err(e) = self.channel.send(&self.resolver, message) {
            error!("Broadcast failed: {}", e);
        }
    }

    fn fail(&mut self, err: MatchError) {
        if let Some(abort) = self.lifecycle.abort(&err) {
            error!("Match aborted: {}", err);
            self.reports.push(Report::Abort(abort));
        }
        self.halted = true;
        self.channel.clear();
    }
}
