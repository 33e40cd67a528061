//! # Match Peer Library
//!
//! Peer-side implementation of a two-player authority-replicated match. One
//! peer holds state authority and computes every canonical change; the other
//! forwards requests and mirrors what the authority pushes. Both end up with
//! the same visible world and the same single outcome.
//!
//! ## Architecture Overview
//!
//! ### Authority Routing
//! Every mutation entry point asks the `AuthorityResolver` where it must go.
//! The authority applies the change and broadcasts the absolute result; any
//! other peer sends a request and changes nothing until the push arrives.
//!
//! ### Role-Filtered RPC
//! Each message kind has a fixed allowed source and target. Broadcasts loop
//! back to the sender, so the authority applies its own pushes through the
//! same handlers as everybody else. Handlers are idempotent, which makes
//! duplicate delivery harmless.
//!
//! ### Seed Replication
//! Platform rotations and piece layouts look random but are derived from a
//! seed the authority broadcasts. Each peer replays the same draws against
//! the seed in registration order.
//!
//! ### One-Shot Match End
//! The win threshold latches an `ended` flag on the authority, which then
//! broadcasts `EndMatch` with the final scores. The first applied `EndMatch`
//! moves the lifecycle to `Ended` and schedules exactly one result report.
//!
//! ## Module Organization
//!
//! - `authority`: per-peer role bits and mutation routing
//! - `rpc`: outbox, loopback inbox and source/target validation
//! - `random_sync`: seeded derivation of platform rotations and layouts
//! - `replicator`: tower and platform transforms, cooldowns, pushes
//! - `score`: score arithmetic and the win latch
//! - `lifecycle`: slot assignment, player wait, leave handling, reports
//! - `game`: the `MatchPeer` context object tying the above together
//! - `bootstrap`, `config`, `error`, `report`: match identity, tunables,
//!   failure taxonomy and outward reports
//! - `network`: the tokio UDP loop against the relay
//!
//! ## Usage Example
//!
//! ```rust
//! use peer::bootstrap::MatchParams;
//! use peer::config::MatchConfig;
//! use peer::game::MatchPeer;
//! use shared::PeerId;
//!
//! let params = MatchParams::from_query("?matchId=m1&playerId=alice&opponentId=bob").unwrap();
//! let mut peer = MatchPeer::new(params, MatchConfig::default(), PeerId(1), PeerId(1));
//! peer.join(PeerId(1)).unwrap();
//! peer.tick();
//! for message in peer.drain_outbox() {
//!     // hand to the transport
//!     let _ = message;
//! }
//! ```

pub mod authority;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod game;
pub mod lifecycle;
pub mod network;
pub mod random_sync;
pub mod replicator;
pub mod report;
pub mod rpc;
pub mod score;
