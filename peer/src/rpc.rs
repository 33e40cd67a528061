//! Role-filtered RPC channel
//!
//! Outbound messages go to the transport outbox. A message whose target set
//! contains the local peer is looped back into the local inbox as well, so
//! the sender applies its own broadcasts through the same handlers as
//! everyone else. Inbound messages are checked against the kind's allowed
//! source and target before they reach dispatch.
//!
//! Requests are numbered per sender and kind. Delivery is ordered within a
//! kind, so a request whose number is not above the last one accepted from
//! that sender is a redelivery and is dropped.

use crate::authority::AuthorityResolver;
use crate::error::MatchError;
use log::{debug, warn};
use shared::{PeerId, RpcKind, RpcMessage, SourceRole, TargetRole};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct RpcChannel {
    outbox: Vec<RpcMessage>,
    inbox: VecDeque<(PeerId, RpcMessage)>,
    next_seq: HashMap<RpcKind, u32>,
    accepted_seq: HashMap<(PeerId, RpcKind), u32>,
}

impl RpcChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget send from the local peer.
    ///
    /// Fails with `AuthorityViolation` if the local peer does not hold the
    /// role the kind requires; nothing is queued in that case.
    pub fn send(
        &mut self,
        resolver: &AuthorityResolver,
        message: RpcMessage,
    ) -> Result<(), MatchError> {
        let local = resolver.local();
        let kind = message.kind();

        if let Err(reason) = check_source(resolver, local, &message) {
            warn!("Refusing to send {:?}: {}", kind, reason);
            return Err(MatchError::AuthorityViolation {
                peer: local,
                operation: "send",
            });
        }

        debug!("Sending {:?}", message);
        match kind.target() {
            TargetRole::All => {
                self.outbox.push(message.clone());
                self.inbox.push_back((local, message));
            }
            TargetRole::StateAuthorityOnly => {
                if resolver.local_is_authority() {
                    self.inbox.push_back((local, message));
                } else {
                    self.outbox.push(message);
                }
            }
        }
        Ok(())
    }

    /// Allocates the sequence number for the next outgoing request of `kind`.
    pub fn next_request_seq(&mut self, kind: RpcKind) -> u32 {
        let seq = self.next_seq.entry(kind).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Queues a message delivered by the transport.
    pub fn receive(&mut self, sender: PeerId, message: RpcMessage) {
        self.inbox.push_back((sender, message));
    }

    /// Pops the next inbound message, validated against the current roles.
    pub fn next_inbound(
        &mut self,
        resolver: &AuthorityResolver,
    ) -> Option<Result<(PeerId, RpcMessage), MatchError>> {
        loop {
            let (sender, message) = self.inbox.pop_front()?;
            let kind = message.kind();

            let verdict = check_source(resolver, sender, &message)
                .and_then(|_| check_target(resolver, &message));

            match verdict {
                Ok(()) if self.is_redelivery(sender, &message) => {
                    debug!("Dropping redelivered {:?} from {}", kind, sender);
                }
                Ok(()) => return Some(Ok((sender, message))),
                Err(reason) => {
                    return Some(Err(MatchError::SourceRejected {
                        sender,
                        kind,
                        reason,
                    }))
                }
            }
        }
    }

    /// Records an accepted request number; true if it was seen before.
    fn is_redelivery(&mut self, sender: PeerId, message: &RpcMessage) -> bool {
        let Some(seq) = message.request_seq() else {
            return false;
        };
        let last = self.accepted_seq.entry((sender, message.kind())).or_insert(0);
        if seq <= *last {
            return true;
        }
        *last = seq;
        false
    }

    pub fn drain_outbox(&mut self) -> Vec<RpcMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn has_inbound(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Drops everything still queued. Used once the match is halted.
    pub fn clear(&mut self) {
        self.outbox.clear();
        self.inbox.clear();
    }
}

fn check_source(
    resolver: &AuthorityResolver,
    sender: PeerId,
    message: &RpcMessage,
) -> Result<(), &'static str> {
    if !resolver.is_active(sender) {
        return Err("sender is not an active peer");
    }

    match message.kind().source() {
        SourceRole::All => Ok(()),
        SourceRole::StateAuthority => {
            if resolver.is_state_authority(sender) {
                Ok(())
            } else {
                Err("sender lacks state authority")
            }
        }
        SourceRole::InputAuthority => {
            let Some(slot) = message.input_slot() else {
                return Err("message names no slot");
            };
            match (message, resolver.slot_holder(slot)) {
                // A slot announcement is how input authority is established.
                (RpcMessage::SetPlayerSlot { .. }, None) => Ok(()),
                (_, Some(holder)) if holder == sender => Ok(()),
                _ => Err("sender lacks input authority for slot"),
            }
        }
    }
}

fn check_target(resolver: &AuthorityResolver, message: &RpcMessage) -> Result<(), &'static str> {
    match message.kind().target() {
        TargetRole::All => Ok(()),
        TargetRole::StateAuthorityOnly if resolver.local_is_authority() => Ok(()),
        TargetRole::StateAuthorityOnly => Err("addressed to the state authority"),
    }
}
