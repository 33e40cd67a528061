//! Peer admission, state authority designation and timeout tracking
//!
//! The relay seats at most two peers per match. The first admitted peer is
//! designated state authority; if it goes away while another peer remains,
//! the earliest-admitted survivor is promoted. Once both seats have been
//! filled the session is closed and later connection attempts are refused.

use log::info;
use shared::PeerId;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A peer seated on the relay
#[derive(Debug)]
pub struct RelayPeer {
    /// Identifier assigned at admission, increasing in admission order
    pub id: PeerId,
    /// Network address for forwarding
    pub addr: SocketAddr,
    /// Player identity the peer presented when connecting
    pub player_id: String,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl RelayPeer {
    pub fn new(id: PeerId, addr: SocketAddr, player_id: String) -> Self {
        Self {
            id,
            addr,
            player_id,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing has been heard from this peer within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Result of removing one or more peers
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Departure {
    pub left: Vec<PeerId>,
    /// Set when state authority moved to a survivor
    pub promoted: Option<PeerId>,
}

impl Departure {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

pub struct PeerManager {
    /// Seated peers; ids are assigned in admission order
    peers: BTreeMap<PeerId, RelayPeer>,
    next_peer_id: u32,
    max_peers: usize,
    timeout: Duration,
    state_authority: Option<PeerId>,
}

impl PeerManager {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers: BTreeMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
            state_authority: None,
        }
    }

    /// Seats a new peer.
    ///
    /// Returns None once every seat of the session has been handed out, even
    /// if some of those peers have since left.
    pub fn add_peer(&mut self, addr: SocketAddr, player_id: String) -> Option<PeerId> {
        if self.is_closed() {
            return None;
        }

        let id = PeerId(self.next_peer_id);
        self.next_peer_id += 1;

        info!("{} ({}) connected from {}", id, player_id, addr);
        self.peers.insert(id, RelayPeer::new(id, addr, player_id));

        if self.state_authority.is_none() {
            info!("{} holds state authority", id);
            self.state_authority = Some(id);
        }
        Some(id)
    }

    /// True once every seat has been handed out.
    pub fn is_closed(&self) -> bool {
        (self.next_peer_id as usize) > self.max_peers
    }

    pub fn remove_peer(&mut self, id: PeerId) -> Departure {
        self.remove_peers(&[id])
    }

    /// Removes the given peers and promotes a survivor if the authority left.
    pub fn remove_peers(&mut self, ids: &[PeerId]) -> Departure {
        let mut departure = Departure::default();
        for id in ids {
            if let Some(peer) = self.peers.remove(id) {
                info!("{} disconnected", peer.id);
                departure.left.push(peer.id);
            }
        }

        let authority_left = self
            .state_authority
            .map_or(false, |authority| departure.left.contains(&authority));
        if authority_left {
            self.state_authority = self.peers.keys().next().copied();
            departure.promoted = self.state_authority;
            if let Some(promoted) = departure.promoted {
                info!("State authority moved to {}", promoted);
            }
        }
        departure
    }

    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.peers
            .values()
            .find(|peer| peer.addr == addr)
            .map(|peer| peer.id)
    }

    /// Records activity from a peer
    pub fn touch(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Removes peers that have been silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Departure {
        let timed_out: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(self.timeout))
            .map(|peer| peer.id)
            .collect();

        self.remove_peers(&timed_out)
    }

    pub fn state_authority(&self) -> Option<PeerId> {
        self.state_authority
    }

    /// Seated peer ids in admission order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_addr(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&id).map(|peer| peer.addr)
    }

    pub fn peer_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.peers
            .values()
            .map(|peer| (peer.id, peer.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
