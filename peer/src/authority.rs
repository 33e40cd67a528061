//! Per-peer role tracking
//!
//! Every peer carries three independent role bits: state authority (may
//! mutate shared match state), input authority (owns a slot's control
//! input) and local (this process). State authority is match-global and is
//! decided by the transport at admission; the resolver only records it.

use crate::error::MatchError;
use log::{error, info};
use shared::{PeerId, Slot};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Left,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Roles {
    pub state_authority: bool,
    pub input_authority: bool,
    pub local: bool,
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub roles: Roles,
    pub status: ConnectionStatus,
    pub slot: Option<Slot>,
}

impl Peer {
    fn new(id: PeerId, local: bool) -> Self {
        Self {
            id,
            roles: Roles {
                local,
                ..Roles::default()
            },
            status: ConnectionStatus::Active,
            slot: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }
}

/// Where a mutation must go from this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Local peer holds state authority: compute and apply here.
    Apply,
    /// Forward a request to the authority and wait for its push.
    Request,
}

#[derive(Debug)]
pub struct AuthorityResolver {
    local: PeerId,
    peers: BTreeMap<PeerId, Peer>,
}

impl AuthorityResolver {
    pub fn new(local: PeerId, state_authority: PeerId) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(local, Peer::new(local, true));

        let mut resolver = Self { local, peers };
        resolver.set_state_authority(state_authority);
        resolver
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn local_slot(&self) -> Option<Slot> {
        self.peers.get(&self.local).and_then(|p| p.slot)
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    /// Registers a remote peer. Re-adding a known peer is a no-op.
    pub fn add_peer(&mut self, id: PeerId) {
        self.peers.entry(id).or_insert_with(|| Peer::new(id, false));
    }

    /// Moves state authority to `id`. Exactly one peer holds it afterwards.
    pub fn set_state_authority(&mut self, id: PeerId) {
        self.add_peer(id);
        for peer in self.peers.values_mut() {
            peer.roles.state_authority = peer.id == id;
        }
        info!(
            "State authority: {}{}",
            id,
            if id == self.local { " (local)" } else { "" }
        );
    }

    /// Binds `id` to `slot` and grants it input authority over that slot.
    pub fn assign_slot(&mut self, id: PeerId, slot: Slot) {
        self.add_peer(id);
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.slot = Some(slot);
            peer.roles.input_authority = true;
        }
    }

    /// Returns true if the peer was active and is now marked as left.
    pub fn mark_left(&mut self, id: PeerId) -> bool {
        match self.peers.get_mut(&id) {
            Some(peer) if peer.is_active() => {
                peer.status = ConnectionStatus::Left;
                peer.roles.input_authority = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_state_authority(&self, id: PeerId) -> bool {
        self.peers
            .get(&id)
            .map_or(false, |p| p.is_active() && p.roles.state_authority)
    }

    pub fn is_input_authority(&self, id: PeerId, slot: Slot) -> bool {
        self.peers
            .get(&id)
            .map_or(false, |p| p.is_active() && p.roles.input_authority && p.slot == Some(slot))
    }

    pub fn is_active(&self, id: PeerId) -> bool {
        self.peers.get(&id).map_or(false, Peer::is_active)
    }

    pub fn local_is_authority(&self) -> bool {
        self.is_state_authority(self.local)
    }

    pub fn state_authority(&self) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| p.roles.state_authority)
            .map(|p| p.id)
    }

    pub fn slot_holder(&self, slot: Slot) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| p.is_active() && p.slot == Some(slot))
            .map(|p| p.id)
    }

    pub fn active_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id)
            .collect()
    }

    pub fn route(&self) -> Route {
        if self.local_is_authority() {
            Route::Apply
        } else {
            Route::Request
        }
    }

    /// Guard for direct writes to canonical state.
    pub fn ensure_state_authority(&self, operation: &'static str) -> Result<(), MatchError> {
        if self.local_is_authority() {
            Ok(())
        } else {
            let err = MatchError::AuthorityViolation {
                peer: self.local,
                operation,
            };
            error!("{}", err);
            Err(err)
        }
    }
}
