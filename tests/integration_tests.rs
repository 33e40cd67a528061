//! Integration tests for the match peer and relay
//!
//! Match scenarios run two `MatchPeer`s against an in-memory transport that
//! routes frames the way the relay does. Relay tests use real UDP sockets.

use bincode::{deserialize, serialize};
use peer::bootstrap::MatchParams;
use peer::config::MatchConfig;
use peer::game::MatchPeer;
use peer::lifecycle::MatchPhase;
use peer::random_sync::{derive, DeterministicRandomSync};
use peer::report::{Outcome, RecordingSink, Report};
use relay::network::{forward_target, Forward, Server};
use shared::{
    EntityRef, Packet, PeerId, RpcKind, RpcMessage, Slot, BALL_SPAWN_HEIGHT, PROTOCOL_VERSION,
};
use std::time::Duration;

const AUTHORITY: PeerId = PeerId(1);
const GUEST: PeerId = PeerId(2);

fn params(player: &str, opponent: &str) -> MatchParams {
    MatchParams {
        match_id: "Room01".to_string(),
        player_id: player.to_string(),
        opponent_id: opponent.to_string(),
    }
}

/// Two peers wired through an in-memory relay.
///
/// With `duplicate` set every frame is delivered twice. With `reorder` set
/// each batch is delivered with its kinds in reverse order of first
/// appearance; frames of one kind keep their send order.
struct Harness {
    peers: [MatchPeer; 2],
    sinks: [RecordingSink; 2],
    connected: [bool; 2],
    authority: Option<PeerId>,
    duplicate: bool,
    reorder: bool,
}

impl Harness {
    fn new(config: MatchConfig) -> Self {
        let mut authority = MatchPeer::new(params("alice", "bob"), config.clone(), AUTHORITY, AUTHORITY)
            .with_random_sync(DeterministicRandomSync::with_entropy_seed(11));
        let mut guest = MatchPeer::new(params("bob", "alice"), config, GUEST, AUTHORITY)
            .with_random_sync(DeterministicRandomSync::with_entropy_seed(22));

        for peer in [&mut authority, &mut guest] {
            assert_eq!(peer.join(AUTHORITY), Ok(Slot::Player1));
            assert_eq!(peer.join(GUEST), Ok(Slot::Player2));
        }

        Self {
            peers: [authority, guest],
            sinks: [RecordingSink::default(), RecordingSink::default()],
            connected: [true, true],
            authority: Some(AUTHORITY),
            duplicate: false,
            reorder: false,
        }
    }

    fn authority(&mut self) -> &mut MatchPeer {
        &mut self.peers[0]
    }

    fn guest(&mut self) -> &mut MatchPeer {
        &mut self.peers[1]
    }

    fn step(&mut self) {
        for i in 0..2 {
            if !self.connected[i] {
                continue;
            }
            self.peers[i].tick();
            self.peers[i].flush_reports(&mut self.sinks[i]);

            let sender = self.peers[i].local();
            let mut batch = self.peers[i].drain_outbox();
            if self.reorder {
                batch = reorder_across_kinds(batch);
            }
            for message in batch {
                self.route(sender, message);
            }
        }
    }

    fn route(&mut self, sender: PeerId, message: RpcMessage) {
        let copies = if self.duplicate { 2 } else { 1 };
        let recipient = match forward_target(&message, sender, self.authority) {
            Forward::Others => {
                if sender == AUTHORITY {
                    GUEST
                } else {
                    AUTHORITY
                }
            }
            Forward::To(peer) => peer,
            Forward::Drop => return,
        };

        let index = (recipient.0 - 1) as usize;
        if !self.connected[index] {
            return;
        }
        for _ in 0..copies {
            self.peers[index].receive(sender, message.clone());
        }
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    fn run_until(&mut self, ticks: usize, done: impl Fn(&Harness) -> bool) {
        for _ in 0..ticks {
            if done(self) {
                return;
            }
            self.step();
        }
        assert!(done(self), "condition not reached within {} ticks", ticks);
    }

    fn start(&mut self) {
        self.run_until(100, |h| {
            h.peers.iter().all(|p| p.phase() == MatchPhase::Running)
                && h.peers[1].random().seed(Slot::Player2).is_some()
        });
    }

    /// The peer at `index` drops off the relay.
    fn disconnect(&mut self, index: usize) {
        self.connected[index] = false;
        let left = self.peers[index].local();
        let survivor = 1 - index;

        if self.authority == Some(left) {
            let promoted = self.peers[survivor].local();
            self.authority = Some(promoted);
            self.peers[survivor].on_authority_changed(promoted);
        }
        self.peers[survivor].on_peers_left(&[left]);
    }
}

fn reorder_across_kinds(batch: Vec<RpcMessage>) -> Vec<RpcMessage> {
    let mut kinds: Vec<RpcKind> = Vec::new();
    for message in &batch {
        if !kinds.contains(&message.kind()) {
            kinds.push(message.kind());
        }
    }
    kinds
        .iter()
        .rev()
        .flat_map(|kind| batch.iter().filter(move |m| m.kind() == *kind).cloned())
        .collect()
}

fn entities() -> Vec<EntityRef> {
    Slot::ALL
        .into_iter()
        .flat_map(|slot| {
            [
                EntityRef::tower(slot),
                EntityRef::platform(slot, 0),
                EntityRef::platform(slot, 1),
                EntityRef::ball(slot),
            ]
        })
        .collect()
}

fn assert_converged(a: &MatchPeer, b: &MatchPeer) {
    for entity in entities() {
        assert_eq!(a.transform(entity), b.transform(entity), "{}", entity);
        assert_eq!(
            a.replicator().layout(entity),
            b.replicator().layout(entity),
            "{}",
            entity
        );
    }
    assert_eq!(a.scores(), b.scores());
}

/// END-TO-END MATCH TESTS
mod match_tests {
    use super::*;

    #[test]
    fn seeded_match_converges_and_reports_once() {
        let mut h = Harness::new(MatchConfig::default());
        h.duplicate = true;
        h.start();

        h.authority().reseed_with(Slot::Player1, 42).unwrap();
        h.run(2);

        let expected = derive(
            42,
            &[
                EntityRef::platform(Slot::Player1, 0),
                EntityRef::platform(Slot::Player1, 1),
            ],
        );
        for (i, derived) in expected.iter().enumerate() {
            let entity = EntityRef::platform(Slot::Player1, i as u8);
            for peer in &h.peers {
                let rotation = peer.transform(entity).unwrap().rotation;
                assert_eq!(rotation, f32::from(derived.rotation));
            }
        }
        assert_converged(&h.peers[0], &h.peers[1]);

        for _ in 0..3 {
            h.guest().score_goal(Slot::Player2);
            h.run(2);
        }
        for _ in 0..25 {
            h.authority().score_goal(Slot::Player1);
            h.guest().submit_input(0.5);
            h.run(2);
        }

        assert!(h.peers.iter().all(|p| p.is_ended()));
        assert_eq!(h.peers[0].scores(), [50, 6]);

        // Nothing moves the score after the end.
        h.authority().score_goal(Slot::Player1);
        h.guest().score_goal(Slot::Player2);
        h.run(400);

        assert_converged(&h.peers[0], &h.peers[1]);
        for peer in &h.peers {
            assert_eq!(
                peer.phase(),
                MatchPhase::Ended {
                    winner: Slot::Player1
                }
            );
            assert_eq!(peer.scores(), [50, 6]);
        }

        match h.sinks[0].reports.as_slice() {
            [Report::Result(result)] => {
                assert_eq!(result.outcome, Outcome::Won);
                assert_eq!(result.player_id, "alice");
                assert_eq!((result.local_score, result.opponent_score), (50, 6));
            }
            other => panic!("authority reports: {:?}", other),
        }
        match h.sinks[1].reports.as_slice() {
            [Report::Result(result)] => {
                assert_eq!(result.outcome, Outcome::Lost);
                assert_eq!(result.player_id, "bob");
                assert_eq!((result.local_score, result.opponent_score), (6, 50));
            }
            other => panic!("guest reports: {:?}", other),
        }
    }

    #[test]
    fn guest_changes_state_only_after_push() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();

        let tower = EntityRef::tower(Slot::Player2);
        let before = h.peers[1].transform(tower).unwrap();

        h.guest().score_goal(Slot::Player2);
        h.guest().tower_contact(Slot::Player2);
        assert_eq!(h.peers[1].scores(), [0, 0]);
        assert_eq!(h.peers[1].transform(tower), Some(before));

        // First step carries the requests to the authority.
        h.step();
        assert_eq!(h.peers[1].scores(), [0, 0]);
        assert_eq!(h.peers[1].transform(tower), Some(before));

        h.step();
        assert_eq!(h.peers[1].scores(), [0, 2]);
        let after = h.peers[1].transform(tower).unwrap();
        assert_eq!(after.position.y, before.position.y - 32.0);
        assert_converged(&h.peers[0], &h.peers[1]);
    }

    #[test]
    fn repeated_reposition_triggers_inside_cooldown_apply_once() {
        let mut h = Harness::new(MatchConfig::default());
        h.duplicate = true;
        h.start();

        for _ in 0..3 {
            h.guest().tower_contact(Slot::Player2);
        }
        h.run(2);
        h.guest().tower_contact(Slot::Player2);
        h.run(2);

        for peer in &h.peers {
            let tower = peer.transform(EntityRef::tower(Slot::Player2)).unwrap();
            assert_eq!(tower.position.y, -32.0);
        }

        // Past the cooldown a new trigger moves the tower again.
        h.run(30);
        h.guest().tower_contact(Slot::Player2);
        h.run(2);
        for peer in &h.peers {
            let tower = peer.transform(EntityRef::tower(Slot::Player2)).unwrap();
            assert_eq!(tower.position.y, -64.0);
        }
        assert_converged(&h.peers[0], &h.peers[1]);
    }

    #[test]
    fn reposition_reseeds_and_platform_advance_replicates() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();
        let seed_before = h.peers[1].random().seed(Slot::Player1);

        h.authority().tower_contact(Slot::Player1);
        h.authority().platform_passed(Slot::Player1, 0);
        h.guest().platform_passed(Slot::Player2, 0);
        h.run(2);

        let seed_after = h.peers[1].random().seed(Slot::Player1);
        assert!(seed_after.is_some());
        assert_eq!(seed_after, h.peers[0].random().seed(Slot::Player1));
        assert_ne!(seed_after, seed_before);

        // Tower moved to -32, so the next platform depth is -56.
        let platform = h.peers[1]
            .transform(EntityRef::platform(Slot::Player1, 1))
            .unwrap();
        assert_eq!(platform.position.y, -56.0);

        // The guest's own report of a platform pass is left to the authority.
        let untouched = h.peers[1]
            .transform(EntityRef::platform(Slot::Player2, 1))
            .unwrap();
        assert_eq!(untouched.position.y, 0.0);
        assert_converged(&h.peers[0], &h.peers[1]);
    }

    #[test]
    fn redelivered_requests_apply_once() {
        let mut h = Harness::new(MatchConfig::default());
        h.duplicate = true;
        h.start();

        h.guest().score_goal(Slot::Player2);
        h.guest().submit_input(1.0);
        h.run(2);

        assert_eq!(h.peers[1].scores(), [0, 2]);
        let tower = h.peers[1]
            .transform(EntityRef::tower(Slot::Player2))
            .unwrap();
        let expected = (-100.0f32 / 60.0).rem_euclid(360.0);
        assert!((tower.rotation - expected).abs() < 1e-3);

        h.guest().score_goal(Slot::Player2);
        h.run(2);
        assert_eq!(h.peers[1].scores(), [0, 4]);
        assert_converged(&h.peers[0], &h.peers[1]);
    }

    #[test]
    fn guest_ball_moves_only_on_authority_push() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();
        let ball = EntityRef::ball(Slot::Player2);

        // The guest's own physics report is left to the authority.
        h.guest().ground_contact(Slot::Player2);
        h.run(3);
        for peer in &h.peers {
            let position = peer.transform(ball).unwrap().position;
            assert_eq!(position.y, BALL_SPAWN_HEIGHT);
        }

        h.authority().ground_contact(Slot::Player2);
        assert_eq!(
            h.peers[1].transform(ball).unwrap().position.y,
            BALL_SPAWN_HEIGHT
        );

        h.step();
        let airborne = h.peers[1].transform(ball).unwrap().position.y;
        assert!(airborne > BALL_SPAWN_HEIGHT);
        assert_converged(&h.peers[0], &h.peers[1]);

        h.run(10);
        assert!(h.peers[1].transform(ball).unwrap().position.y > airborne);
        assert_converged(&h.peers[0], &h.peers[1]);
    }

    #[test]
    fn cross_kind_reordering_converges_to_one_result() {
        let config = MatchConfig {
            win_threshold: 6,
            ..MatchConfig::default()
        };
        let mut h = Harness::new(config);
        h.duplicate = true;
        h.reorder = true;
        h.start();

        // Tower and platform pushes arrive after the reseed they came with.
        h.authority().tower_contact(Slot::Player1);
        h.authority().platform_passed(Slot::Player1, 0);
        h.guest().tower_contact(Slot::Player2);
        h.run(3);
        assert_converged(&h.peers[0], &h.peers[1]);
        let platform = h.peers[1]
            .transform(EntityRef::platform(Slot::Player1, 1))
            .unwrap();
        assert_eq!(platform.position.y, -56.0);

        h.guest().score_goal(Slot::Player2);
        h.run(2);
        for _ in 0..3 {
            h.authority().score_goal(Slot::Player1);
            h.run(2);
        }

        // EndMatch reached the guest ahead of the final PushScore.
        h.run(400);
        assert_converged(&h.peers[0], &h.peers[1]);
        for peer in &h.peers {
            assert_eq!(peer.scores(), [6, 2]);
            assert_eq!(
                peer.phase(),
                MatchPhase::Ended {
                    winner: Slot::Player1
                }
            );
        }
        match h.sinks[1].reports.as_slice() {
            [Report::Result(result)] => {
                assert_eq!(result.outcome, Outcome::Lost);
                assert_eq!((result.local_score, result.opponent_score), (2, 6));
            }
            other => panic!("guest reports: {:?}", other),
        }
        assert_eq!(h.sinks[0].reports.len(), 1);
    }

    #[test]
    fn authority_leaving_mid_match_hands_win_to_survivor() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();

        h.guest().score_goal(Slot::Player2);
        h.run(2);
        h.disconnect(0);

        assert!(h.peers[1].is_state_authority());
        assert!(h.peers[1].is_ended());
        h.run(400);

        assert_eq!(
            h.peers[1].phase(),
            MatchPhase::Ended {
                winner: Slot::Player2
            }
        );
        match h.sinks[1].reports.as_slice() {
            [Report::Result(result)] => {
                assert_eq!(result.outcome, Outcome::Won);
                assert_eq!(result.local_score, 2);
            }
            other => panic!("survivor reports: {:?}", other),
        }
    }

    #[test]
    fn guest_leaving_mid_match_hands_win_to_authority() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();

        h.disconnect(1);
        // A second leave notification changes nothing.
        h.authority().on_peers_left(&[GUEST]);
        h.run(400);

        match h.sinks[0].reports.as_slice() {
            [Report::Result(result)] => assert_eq!(result.outcome, Outcome::Won),
            other => panic!("authority reports: {:?}", other),
        }
    }

    #[test]
    fn nobody_left_aborts_without_winner() {
        let mut h = Harness::new(MatchConfig::default());
        h.start();

        h.guest().on_peers_left(&[AUTHORITY, GUEST]);
        h.run(400);

        match h.sinks[1].reports.as_slice() {
            [Report::Abort(abort)] => assert_eq!(abort.error_code, "1019"),
            other => panic!("guest reports: {:?}", other),
        }
        assert_eq!(h.peers[1].phase(), MatchPhase::Aborted);
        assert!(!h.peers[1].is_ended());
    }

    #[test]
    fn leave_before_start_is_setup_failure() {
        let mut h = Harness::new(MatchConfig::default());
        h.authority().on_peers_left(&[GUEST]);
        h.run(1);

        match h.sinks[0].reports.as_slice() {
            [Report::Abort(abort)] => assert_eq!(abort.error_code, "1018"),
            other => panic!("authority reports: {:?}", other),
        }
    }

    #[test]
    fn lone_peer_times_out() {
        let config = MatchConfig {
            wait_timeout_ticks: 90,
            ..MatchConfig::default()
        };
        let mut lone = MatchPeer::new(params("alice", "bob"), config, AUTHORITY, AUTHORITY);
        lone.join(AUTHORITY).unwrap();

        let mut sink = RecordingSink::default();
        for _ in 0..200 {
            lone.tick();
            lone.flush_reports(&mut sink);
        }

        match sink.reports.as_slice() {
            [Report::Abort(abort)] => assert_eq!(abort.error_code, "1011"),
            other => panic!("reports: {:?}", other),
        }
    }
}

/// RELAY INTEGRATION TESTS
mod relay_tests {
    use super::*;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    async fn recv(socket: &UdpSocket) -> Packet {
        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for relay")
            .unwrap();
        deserialize(&buf[..len]).unwrap()
    }

    async fn send(socket: &UdpSocket, relay: std::net::SocketAddr, packet: &Packet) {
        socket.send_to(&serialize(packet).unwrap(), relay).await.unwrap();
    }

    fn connect(player_id: &str) -> Packet {
        Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_id: player_id.to_string(),
        }
    }

    #[tokio::test]
    async fn relay_seats_two_peers_and_forwards_by_role() {
        let mut server = Server::new("127.0.0.1:0", 2, Duration::from_secs(30))
            .await
            .unwrap();
        let relay = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let alice = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bob = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let carol = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(&alice, relay, &connect("alice")).await;
        match recv(&alice).await {
            Packet::Connected {
                peer_id,
                state_authority,
                peers,
            } => {
                assert_eq!(peer_id, PeerId(1));
                assert_eq!(state_authority, PeerId(1));
                assert_eq!(peers, vec![PeerId(1)]);
            }
            other => panic!("unexpected {:?}", other),
        }

        send(&bob, relay, &connect("bob")).await;
        match recv(&bob).await {
            Packet::Connected {
                peer_id,
                state_authority,
                peers,
            } => {
                assert_eq!(peer_id, PeerId(2));
                assert_eq!(state_authority, PeerId(1));
                assert_eq!(peers, vec![PeerId(1), PeerId(2)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match recv(&alice).await {
            Packet::PeerJoined { peer_id } => assert_eq!(peer_id, PeerId(2)),
            other => panic!("unexpected {:?}", other),
        }

        send(&carol, relay, &connect("carol")).await;
        assert!(matches!(recv(&carol).await, Packet::Disconnected { .. }));

        // A request reaches the authority with the real sender stamped on it.
        let request = RpcMessage::RequestScoreDelta {
            slot: Slot::Player2,
            delta: 1,
            seq: 1,
        };
        send(
            &bob,
            relay,
            &Packet::Rpc {
                sender: PeerId(99),
                message: request.clone(),
            },
        )
        .await;
        match recv(&alice).await {
            Packet::Rpc { sender, message } => {
                assert_eq!(sender, PeerId(2));
                assert_eq!(message, request);
            }
            other => panic!("unexpected {:?}", other),
        }

        let push = RpcMessage::PushScore { scores: [0, 2] };
        send(
            &alice,
            relay,
            &Packet::Rpc {
                sender: PeerId(1),
                message: push.clone(),
            },
        )
        .await;
        match recv(&bob).await {
            Packet::Rpc { sender, message } => {
                assert_eq!(sender, PeerId(1));
                assert_eq!(message, push);
            }
            other => panic!("unexpected {:?}", other),
        }

        // The authority leaving promotes the survivor before the leave notice.
        send(&alice, relay, &Packet::Disconnect).await;
        match recv(&bob).await {
            Packet::AuthorityChanged { peer_id } => assert_eq!(peer_id, PeerId(2)),
            other => panic!("unexpected {:?}", other),
        }
        match recv(&bob).await {
            Packet::PeersLeft { peer_ids } => assert_eq!(peer_ids, vec![PeerId(1)]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn packet_serialization_roundtrip() {
        let packets = vec![
            connect("alice"),
            Packet::Heartbeat { timestamp: 123456789 },
            Packet::AuthorityChanged { peer_id: PeerId(2) },
            Packet::Rpc {
                sender: PeerId(1),
                message: RpcMessage::EndMatch {
                    winner: Slot::Player1,
                    scores: [50, 6],
                },
            },
            Packet::Disconnected {
                reason: "Session full".to_string(),
            },
        ];

        for packet in packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();

            match (&packet, &deserialized) {
                (Packet::Connect { .. }, Packet::Connect { .. }) => {}
                (Packet::Heartbeat { .. }, Packet::Heartbeat { .. }) => {}
                (Packet::AuthorityChanged { .. }, Packet::AuthorityChanged { .. }) => {}
                (Packet::Rpc { .. }, Packet::Rpc { .. }) => {}
                (Packet::Disconnected { .. }, Packet::Disconnected { .. }) => {}
                _ => panic!("Packet type mismatch after serialization"),
            }
        }
    }
}
