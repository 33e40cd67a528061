//! Relay network layer: UDP admission and RPC forwarding between two peers

use crate::peer_manager::{Departure, PeerManager};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PeerId, RpcMessage, TargetRole, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum RelayEvent {
    PacketReceived { packet: Packet, addr: SocketAddr },
    PeersTimedOut { departure: Departure },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the relay loop to the sender task
#[derive(Debug)]
pub enum Outgoing {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<PeerId>,
    },
}

/// Where a forwarded RPC goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    /// Every seated peer except the sender
    Others,
    /// Only the state authority
    To(PeerId),
    /// Nobody: the sender is the only addressee
    Drop,
}

/// Picks recipients for an RPC from `sender`.
pub fn forward_target(
    message: &RpcMessage,
    sender: PeerId,
    state_authority: Option<PeerId>,
) -> Forward {
    match (message.kind().target(), state_authority) {
        (TargetRole::All, _) => Forward::Others,
        (TargetRole::StateAuthorityOnly, Some(authority)) if authority != sender => {
            Forward::To(authority)
        }
        (TargetRole::StateAuthorityOnly, _) => Forward::Drop,
    }
}

pub struct Server {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerManager>>,

    // Communication channels
    event_tx: mpsc::UnboundedSender<RelayEvent>,
    event_rx: mpsc::UnboundedReceiver<RelayEvent>,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    out_rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_peers: usize,
        peer_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            peers: Arc::new(RwLock::new(PeerManager::new(max_peers, peer_timeout))),
            event_tx,
            event_rx,
            out_tx,
            out_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) = event_tx.send(RelayEvent::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    Outgoing::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    Outgoing::BroadcastPacket { packet, exclude } => {
                        let addrs = {
                            let peers_guard = peers.read().await;
                            peers_guard.peer_addrs()
                        };

                        for (peer_id, addr) in addrs {
                            if Some(peer_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to {}: {}", peer_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors peer timeouts
    fn spawn_timeout_checker(&self) {
        let peers = Arc::clone(&self.peers);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let departure = {
                    let mut peers_guard = peers.write().await;
                    peers_guard.check_timeouts()
                };

                if departure.is_empty() {
                    continue;
                }
                if let Err(e) = event_tx.send(RelayEvent::PeersTimedOut { departure }) {
                    error!("Failed to send timeout message: {}", e);
                    break;
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(Outgoing::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<PeerId>) {
        if let Err(e) = self.out_tx.send(Outgoing::BroadcastPacket { packet, exclude }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Tells the remaining peers who left and, if it moved, who holds authority now.
    fn announce_departure(&self, departure: Departure) {
        if departure.is_empty() {
            return;
        }
        if let Some(peer_id) = departure.promoted {
            self.broadcast_packet(Packet::AuthorityChanged { peer_id }, None);
        }
        self.broadcast_packet(
            Packet::PeersLeft {
                peer_ids: departure.left,
            },
            None,
        );
    }

    async fn handle_connect(&mut self, client_version: u32, player_id: String, addr: SocketAddr) {
        info!(
            "Peer connecting from {} (version: {}, player: {})",
            addr, client_version, player_id
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: format!("Protocol version {} unsupported", client_version),
                },
                addr,
            );
            return;
        }

        let (admitted, state_authority, peers) = {
            let mut peers = self.peers.write().await;
            // A repeated Connect from a seated address only re-sends the welcome.
            let admitted = match peers.find_peer_by_addr(addr) {
                Some(existing) => Some((existing, false)),
                None => peers.add_peer(addr, player_id).map(|id| (id, true)),
            };
            (admitted, peers.state_authority(), peers.peer_ids())
        };

        match (admitted, state_authority) {
            (Some((peer_id, is_new)), Some(state_authority)) => {
                self.send_packet(
                    Packet::Connected {
                        peer_id,
                        state_authority,
                        peers,
                    },
                    addr,
                );
                if is_new {
                    self.broadcast_packet(Packet::PeerJoined { peer_id }, Some(peer_id));
                }
            }
            _ => {
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Session full".to_string(),
                    },
                    addr,
                );
            }
        }
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                player_id,
            } => self.handle_connect(client_version, player_id, addr).await,

            Packet::Heartbeat { .. } => {
                let mut peers = self.peers.write().await;
                if let Some(peer_id) = peers.find_peer_by_addr(addr) {
                    peers.touch(peer_id);
                }
            }

            Packet::Rpc { message, .. } => {
                let (sender, state_authority) = {
                    let mut peers = self.peers.write().await;
                    let sender = peers.find_peer_by_addr(addr);
                    if let Some(sender) = sender {
                        peers.touch(sender);
                    }
                    (sender, peers.state_authority())
                };

                let Some(sender) = sender else {
                    debug!("RPC from unseated address {}, dropping", addr);
                    return;
                };

                // The sender field is rewritten so peers cannot speak for each other.
                match forward_target(&message, sender, state_authority) {
                    Forward::Others => {
                        self.broadcast_packet(Packet::Rpc { sender, message }, Some(sender))
                    }
                    Forward::To(authority) => {
                        let target = self.peers.read().await.peer_addr(authority);
                        if let Some(target) = target {
                            self.send_packet(Packet::Rpc { sender, message }, target);
                        }
                    }
                    Forward::Drop => debug!("{:?} from {} has no recipient", message.kind(), sender),
                }
            }

            Packet::Disconnect => {
                let departure = {
                    let mut peers = self.peers.write().await;
                    match peers.find_peer_by_addr(addr) {
                        Some(peer_id) => peers.remove_peer(peer_id),
                        None => Departure::default(),
                    }
                };
                self.announce_departure(departure);
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Relay started successfully");

        loop {
            match self.event_rx.recv().await {
                Some(RelayEvent::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(RelayEvent::PeersTimedOut { departure }) => {
                    self.announce_departure(departure);
                }
                Some(RelayEvent::Shutdown) | None => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
