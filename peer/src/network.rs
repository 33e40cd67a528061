use crate::bootstrap::MatchParams;
use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::game::MatchPeer;
use crate::report::{MatchAbort, Report, ReportSink};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::interval;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Scripted local play for headless runs: every `goal_every` ticks the local
/// player steers a little and scores.
#[derive(Debug, Clone, Copy)]
pub struct DemoDriver {
    pub goal_every: u64,
    pub rotation_delta: f32,
}

/// UDP front end of a `MatchPeer`, talking to the relay.
pub struct PeerClient<S: ReportSink> {
    socket: UdpSocket,
    relay_addr: SocketAddr,
    params: MatchParams,
    config: MatchConfig,
    demo: Option<DemoDriver>,
    sink: S,
    session: Option<MatchPeer>,
    ticks_unconnected: u64,
}

impl<S: ReportSink> PeerClient<S> {
    pub async fn new(
        relay_addr: &str,
        params: MatchParams,
        config: MatchConfig,
        sink: S,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let relay_addr = relay_addr.parse()?;

        Ok(PeerClient {
            socket,
            relay_addr,
            params,
            config,
            demo: None,
            sink,
            session: None,
            ticks_unconnected: 0,
        })
    }

    pub fn with_demo(mut self, demo: DemoDriver) -> Self {
        self.demo = Some(demo);
        self
    }

    pub fn session(&self) -> Option<&MatchPeer> {
        self.session.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.relay_addr).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to relay at {}...", self.relay_addr);
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            player_id: self.params.player_id.clone(),
        };
        self.send_packet(&packet).await
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        match packet {
            Packet::Connected {
                peer_id,
                state_authority,
                peers,
            } => {
                if self.session.is_some() {
                    debug!("Duplicate Connected ignored");
                    return Ok(());
                }
                info!(
                    "Connected as {} (state authority: {})",
                    peer_id, state_authority
                );

                let mut session = MatchPeer::new(
                    self.params.clone(),
                    self.config.clone(),
                    peer_id,
                    state_authority,
                );
                for peer in peers {
                    if let Err(e) = session.join(peer) {
                        warn!("Could not seat {}: {}", peer, e);
                    }
                }
                self.session = Some(session);
            }

            Packet::PeerJoined { peer_id } => {
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.join(peer_id) {
                        warn!("Could not seat {}: {}", peer_id, e);
                    }
                }
            }

            Packet::PeersLeft { peer_ids } => {
                if let Some(session) = self.session.as_mut() {
                    session.on_peers_left(&peer_ids);
                }
            }

            Packet::AuthorityChanged { peer_id } => {
                if let Some(session) = self.session.as_mut() {
                    session.on_authority_changed(peer_id);
                }
            }

            Packet::Rpc { sender, message } => match self.session.as_mut() {
                Some(session) => session.receive(sender, message),
                None => debug!("RPC from {} before Connected, dropping", sender),
            },

            Packet::Disconnected { reason } => {
                warn!("Disconnected by relay: {}", reason);
                return Err(format!("disconnected by relay: {}", reason).into());
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        Ok(())
    }

    fn drive_demo(&mut self) {
        let (Some(demo), Some(session)) = (self.demo, self.session.as_mut()) else {
            return;
        };
        let Some(slot) = session.local_slot() else {
            return;
        };

        session.submit_input(demo.rotation_delta);
        let tick = session.current_tick();
        if demo.goal_every > 0 && tick > 0 && tick % demo.goal_every == 0 {
            session.score_goal(slot);
        }
    }

    /// Steps the match and ships its output. Returns true once the match report is out.
    async fn step(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        let Some(session) = self.session.as_mut() else {
            self.ticks_unconnected += 1;
            if self.ticks_unconnected >= self.config.wait_timeout_ticks {
                let err = MatchError::Timeout {
                    waiting_for: "relay",
                    ticks: self.ticks_unconnected,
                };
                error!("{}", err);
                self.sink.deliver(&Report::Abort(MatchAbort::from(&err)));
                return Ok(true);
            }
            return Ok(false);
        };

        session.tick();
        let local = session.local();
        let outbox = session.drain_outbox();
        session.flush_reports(&mut self.sink);
        let finished = session.is_finished();

        for message in outbox {
            self.send_packet(&Packet::Rpc {
                sender: local,
                message,
            })
            .await?;
        }
        self.drive_demo();

        Ok(finished)
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let tick_period = Duration::from_secs_f32(self.config.tick_seconds());
        let mut tick_interval = interval(tick_period);
        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);

        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                self.handle_packet(packet)?;
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    if self.step().await? {
                        break;
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.session.is_none() {
                        self.connect().await?;
                        continue;
                    }
                    let timestamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or(Duration::from_secs(0))
                        .as_millis() as u64;
                    if let Err(e) = self.send_packet(&Packet::Heartbeat { timestamp }).await {
                        error!("Error sending heartbeat: {}", e);
                    }
                },
            }
        }

        let _ = self.send_packet(&Packet::Disconnect).await;
        Ok(())
    }
}
