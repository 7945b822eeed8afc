//! Hosting side of the sync protocol: every inbound frame is applied to the host's
//! mirror of its sender and forwarded, unchanged, to every other connected peer.

use bytes::Bytes;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::config::GameSettings;
use crate::player::{Phase, TickEnv};
use crate::protocol::{Frame, Packet, ProtocolError};
use crate::sync::{Applied, MirrorSet};

pub type PeerId = u64;

/// Outbound half of one connection. Must not block.
pub trait PeerSink: Send {
    /// False once the peer is gone.
    fn send(&self, frame: Bytes) -> bool;
}

struct Peer<S> {
    id: PeerId,
    player: Option<u32>,
    sink: S,
}

struct Peers<S> {
    next_id: PeerId,
    list: Vec<Peer<S>>,
}

struct World {
    mirrors: MirrorSet,
    rng: StdRng,
    elapsed_ms: u64,
}

pub struct RelayHub<S: PeerSink> {
    settings: GameSettings,
    peers: Mutex<Peers<S>>,
    world: Mutex<World>,
}

impl<S: PeerSink> RelayHub<S> {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            settings,
            peers: Mutex::new(Peers {
                next_id: 1,
                list: Vec::new(),
            }),
            world: Mutex::new(World {
                mirrors: MirrorSet::new(),
                rng: StdRng::seed_from_u64(0),
                elapsed_ms: 0,
            }),
        }
    }

    pub fn connect(&self, sink: S) -> PeerId {
        let mut peers = self.peers.lock();
        let id = peers.next_id;
        peers.next_id += 1;
        peers.list.push(Peer {
            id,
            player: None,
            sink,
        });
        info!(peer = id, connected = peers.list.len(), "peer connected");
        id
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().list.len()
    }

    pub fn player_of(&self, peer: PeerId) -> Option<u32> {
        self.peers
            .lock()
            .list
            .iter()
            .find(|p| p.id == peer)
            .and_then(|p| p.player)
    }

    pub fn mirror_phase(&self, player: u32) -> Option<Phase> {
        self.world.lock().mirrors.get(player).map(|m| m.phase())
    }

    /// Apply one frame from `from` and forward it to everyone else. Frames that do not
    /// decode are dropped, not forwarded.
    pub fn on_frame(&self, from: PeerId, frame: &Frame) -> Result<usize, ProtocolError> {
        let packet = frame.decode()?;
        let player = packet.player_id();
        {
            let mut peers = self.peers.lock();
            if let Some(peer) = peers.list.iter_mut().find(|p| p.id == from) {
                if peer.player.is_none() {
                    debug!(peer = from, player, "peer bound to player");
                    peer.player = Some(player);
                }
            }
        }
        if let Applied::Unknown(id) = self.world.lock().mirrors.apply(packet) {
            debug!(peer = from, player = id, "no mirror yet, forwarding only");
        }
        Ok(self.broadcast_except(from, frame.bytes.clone()))
    }

    pub fn broadcast_except(&self, from: PeerId, frame: Bytes) -> usize {
        let peers = self.peers.lock();
        let mut delivered = 0;
        for peer in peers.list.iter().filter(|p| p.id != from) {
            if peer.sink.send(frame.clone()) {
                delivered += 1;
            } else {
                warn!(peer = peer.id, "peer sink closed");
            }
        }
        delivered
    }

    /// Drop `peer`. If it had announced a player, everyone left hears that player lost.
    pub fn disconnect(&self, peer: PeerId) -> Option<u32> {
        let player = {
            let mut peers = self.peers.lock();
            let pos = peers.list.iter().position(|p| p.id == peer)?;
            peers.list.remove(pos).player
        };
        info!(peer, ?player, "peer disconnected");
        let player = player?;
        let lose = Packet::LoseGame { player_id: player };
        self.world.lock().mirrors.apply(lose.clone());
        self.broadcast_except(peer, lose.encode());
        Some(player)
    }

    /// Advance the host's mirrors by one simulation tick.
    pub fn tick(&self, dt_ms: u64) {
        let mut world = self.world.lock();
        let World {
            mirrors,
            rng,
            elapsed_ms,
        } = &mut *world;
        *elapsed_ms += dt_ms;
        let mut env = TickEnv {
            settings: &self.settings,
            elapsed_ms: *elapsed_ms,
            rng,
        };
        mirrors.tick(&mut env);
    }
}
