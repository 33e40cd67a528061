//! # Match Relay Library
//!
//! A minimal UDP relay that seats the two peers of one match and forwards
//! their RPC frames. It runs no game logic: all match state lives on the
//! peers, and the relay only supplies what a transport must.
//!
//! ## Responsibilities
//!
//! ### Admission
//! At most two peers are seated. The first admitted peer is designated state
//! authority and every `Connected` reply names it. A third connection attempt
//! is refused with `Disconnected`.
//!
//! ### Forwarding
//! Broadcast kinds go to every other seated peer. Kinds addressed to the state
//! authority go to the authority only. The relay stamps the sender id itself.
//!
//! ### Departure
//! Explicit `Disconnect` packets and heartbeat timeouts remove peers. The
//! survivors hear `PeersLeft`, preceded by `AuthorityChanged` when the
//! authority was among those who left.
//!
//! ## Module Organization
//!
//! - `peer_manager`: seats, authority designation, timeouts
//! - `network`: the tokio event loop with receiver, sender and timeout tasks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use relay::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", 2, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod peer_manager;
