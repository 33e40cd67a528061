use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PEERS: usize = 2;
pub const PLATFORMS_PER_TOWER: u8 = 2;
pub const PIECE_ANGLES: [u16; 8] = [0, 45, 90, 135, 180, 225, 270, 315];
pub const ROTATION_SPEED: f32 = 100.0;
pub const REPOSITION_OFFSET: f32 = -32.0;
pub const PLATFORM_SPACING: f32 = 24.0;
pub const BALL_SPAWN_HEIGHT: f32 = 4.0;
pub const PLAYER1_SPAWN: Vec3 = Vec3::new(-10.0, 0.0, 0.0);
pub const PLAYER2_SPAWN: Vec3 = Vec3::new(10.0, 0.0, 0.0);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Stable per-match identity of a competitor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Player1,
    Player2,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Player1, Slot::Player2];

    pub fn index(self) -> usize {
        match self {
            Slot::Player1 => 0,
            Slot::Player2 => 1,
        }
    }

    pub fn opponent(self) -> Slot {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }

    pub fn spawn_position(self) -> Vec3 {
        match self {
            Slot::Player1 => PLAYER1_SPAWN,
            Slot::Player2 => PLAYER2_SPAWN,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Player1 => write!(f, "Player1"),
            Slot::Player2 => write!(f, "Player2"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn offset_y(self, dy: f32) -> Self {
        Self {
            y: self.y + dy,
            ..self
        }
    }

    pub fn with_y(self, y: f32) -> Self {
        Self { y, ..self }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// The rotating ring column a player steers.
    Tower,
    /// One of the two leap-frogging platforms below a tower.
    Platform(u8),
    /// The ball bouncing down a tower.
    Ball,
}

/// Typed reference to a replicated entity. Every reference carries its owning slot.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub slot: Slot,
    pub kind: EntityKind,
}

impl EntityRef {
    pub fn tower(slot: Slot) -> Self {
        Self {
            slot,
            kind: EntityKind::Tower,
        }
    }

    pub fn platform(slot: Slot, index: u8) -> Self {
        Self {
            slot,
            kind: EntityKind::Platform(index),
        }
    }

    pub fn ball(slot: Slot) -> Self {
        Self {
            slot,
            kind: EntityKind::Ball,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntityKind::Tower => write!(f, "{}/tower", self.slot),
            EntityKind::Platform(index) => write!(f, "{}/platform{}", self.slot, index),
            EntityKind::Ball => write!(f, "{}/ball", self.slot),
        }
    }
}

/// Which peers may originate a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    StateAuthority,
    InputAuthority,
    All,
}

/// Which peers a message kind is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    All,
    StateAuthorityOnly,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcKind {
    ReseedRandom,
    RequestReposition,
    PushEntityPosition,
    SetPlayerSlot,
    RequestScoreDelta,
    EndMatch,
    PushScore,
    SubmitInput,
}

impl RpcKind {
    pub const ALL: [RpcKind; 8] = [
        RpcKind::ReseedRandom,
        RpcKind::RequestReposition,
        RpcKind::PushEntityPosition,
        RpcKind::SetPlayerSlot,
        RpcKind::RequestScoreDelta,
        RpcKind::EndMatch,
        RpcKind::PushScore,
        RpcKind::SubmitInput,
    ];

    /// Allowed source and target for each kind.
    pub const fn route(self) -> (SourceRole, TargetRole) {
        match self {
            RpcKind::ReseedRandom => (SourceRole::StateAuthority, TargetRole::All),
            RpcKind::RequestReposition => (SourceRole::All, TargetRole::StateAuthorityOnly),
            RpcKind::PushEntityPosition => (SourceRole::StateAuthority, TargetRole::All),
            RpcKind::SetPlayerSlot => (SourceRole::InputAuthority, TargetRole::All),
            RpcKind::RequestScoreDelta => (SourceRole::All, TargetRole::StateAuthorityOnly),
            RpcKind::EndMatch => (SourceRole::StateAuthority, TargetRole::All),
            RpcKind::PushScore => (SourceRole::StateAuthority, TargetRole::All),
            RpcKind::SubmitInput => (SourceRole::InputAuthority, TargetRole::StateAuthorityOnly),
        }
    }

    pub const fn source(self) -> SourceRole {
        self.route().0
    }

    pub const fn target(self) -> TargetRole {
        self.route().1
    }
}

/// Remote procedure calls exchanged between the two peers of a match.
///
/// Requests carry `seq`, numbered per sender and kind from 1, so the
/// authority can drop redelivered copies.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum RpcMessage {
    ReseedRandom {
        slot: Slot,
        seed: i32,
    },
    RequestReposition {
        slot: Slot,
        delta_y: f32,
        seq: u32,
    },
    PushEntityPosition {
        entity: EntityRef,
        position: Vec3,
        rotation: f32,
    },
    SetPlayerSlot {
        slot: Slot,
    },
    RequestScoreDelta {
        slot: Slot,
        delta: i32,
        seq: u32,
    },
    EndMatch {
        winner: Slot,
        scores: [u32; 2],
    },
    PushScore {
        scores: [u32; 2],
    },
    SubmitInput {
        slot: Slot,
        rotation_delta: f32,
        seq: u32,
    },
}

impl RpcMessage {
    pub fn kind(&self) -> RpcKind {
        match self {
            RpcMessage::ReseedRandom { .. } => RpcKind::ReseedRandom,
            RpcMessage::RequestReposition { .. } => RpcKind::RequestReposition,
            RpcMessage::PushEntityPosition { .. } => RpcKind::PushEntityPosition,
            RpcMessage::SetPlayerSlot { .. } => RpcKind::SetPlayerSlot,
            RpcMessage::RequestScoreDelta { .. } => RpcKind::RequestScoreDelta,
            RpcMessage::EndMatch { .. } => RpcKind::EndMatch,
            RpcMessage::PushScore { .. } => RpcKind::PushScore,
            RpcMessage::SubmitInput { .. } => RpcKind::SubmitInput,
        }
    }

    /// The slot an InputAuthority-sourced message speaks for.
    pub fn input_slot(&self) -> Option<Slot> {
        match self {
            RpcMessage::SetPlayerSlot { slot } | RpcMessage::SubmitInput { slot, .. } => {
                Some(*slot)
            }
            _ => None,
        }
    }

    /// Sequence number of a request kind.
    pub fn request_seq(&self) -> Option<u32> {
        match self {
            RpcMessage::RequestReposition { seq, .. }
            | RpcMessage::RequestScoreDelta { seq, .. }
            | RpcMessage::SubmitInput { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

/// Frames exchanged between a peer and the relay.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        player_id: String,
    },
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,

    /// `peers` lists every admitted peer in admission order, the receiver included.
    Connected {
        peer_id: PeerId,
        state_authority: PeerId,
        peers: Vec<PeerId>,
    },
    PeerJoined {
        peer_id: PeerId,
    },
    PeersLeft {
        peer_ids: Vec<PeerId>,
    },
    AuthorityChanged {
        peer_id: PeerId,
    },
    Rpc {
        sender: PeerId,
        message: RpcMessage,
    },
    Disconnected {
        reason: String,
    },
}
