//! Routing of decoded packets onto the Remote mirrors of other players.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::input::Actions;
use crate::player::{PlayerOrchestrator, TickEnv};
use crate::protocol::{Chat, Packet};

/// What a dispatched packet turned out to be, for the caller to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// Queued as a board event on the sender's mirror.
    Board,
    /// Pending interrupt counters adjusted.
    Counter,
    Joined(u32),
    Restarted(u32),
    Lost(u32),
    Chat(Chat),
    /// Named a player with no mirror.
    Unknown(u32),
}

#[derive(Debug, Default)]
pub struct MirrorSet {
    players: BTreeMap<u32, PlayerOrchestrator>,
}

impl MirrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&PlayerOrchestrator> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut PlayerOrchestrator> {
        self.players.get_mut(&id)
    }

    pub fn insert(&mut self, id: u32) -> &mut PlayerOrchestrator {
        self.players
            .entry(id)
            .or_insert_with(|| PlayerOrchestrator::remote(id))
    }

    pub fn remove(&mut self, id: u32) -> Option<PlayerOrchestrator> {
        self.players.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerOrchestrator> + '_ {
        self.players.values()
    }

    pub fn all_game_over(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.is_game_over())
    }

    /// Credit `count` incoming ice to every mirror except `attacker`.
    pub fn add_pending_except(&mut self, attacker: u32, count: u32) {
        for (id, mirror) in self.players.iter_mut() {
            if *id != attacker {
                mirror.interrupts_mut().add(count);
            }
        }
    }

    pub fn apply(&mut self, packet: Packet) -> Applied {
        let sender = packet.player_id();
        match packet {
            Packet::InitializeGame(init) => {
                let mirror = self.insert(sender);
                mirror.begin([init.block1, init.block2]);
                mirror.set_profile(init.map_id, init.character_id);
                info!(player = sender, map = init.map_id, "player joined");
                Applied::Joined(sender)
            }
            Packet::Chat(chat) => Applied::Chat(chat),
            Packet::AttackInterrupt(a) => {
                if !self.players.contains_key(&sender) {
                    warn!(player = sender, "attack from unknown player ignored");
                    return Applied::Unknown(sender);
                }
                self.add_pending_except(sender, a.count.max(0) as u32);
                Applied::Counter
            }
            Packet::DefenseInterrupt(d) => match self.players.get_mut(&sender) {
                Some(mirror) => {
                    mirror.interrupts_mut().cancel(d.count.max(0) as u32);
                    Applied::Counter
                }
                None => {
                    warn!(player = sender, "defense from unknown player ignored");
                    Applied::Unknown(sender)
                }
            },
            Packet::RestartGame(r) => match self.players.get_mut(&sender) {
                Some(mirror) => {
                    mirror.begin([r.block1, r.block2]);
                    Applied::Restarted(sender)
                }
                None => {
                    warn!(player = sender, "restart from unknown player ignored");
                    Applied::Unknown(sender)
                }
            },
            other => {
                let lost = matches!(other, Packet::LoseGame { .. });
                let Some(mirror) = self.players.get_mut(&sender) else {
                    warn!(player = sender, kind = ?other.packet_type(), "packet for unknown player ignored");
                    return Applied::Unknown(sender);
                };
                debug!(player = sender, kind = ?other.packet_type(), "board event queued");
                mirror.enqueue(other);
                if lost { Applied::Lost(sender) } else { Applied::Board }
            }
        }
    }

    pub fn tick(&mut self, env: &mut TickEnv<'_>) {
        let idle = Actions::default();
        for mirror in self.players.values_mut() {
            mirror.tick(&idle, env);
        }
    }
}
