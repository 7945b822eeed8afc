//! The game world for one client: the local player, mirrors of everyone else,
//! the inbound frame reader and the outbound frame queue.
//!
//! Each [`Session::tick`] runs in a fixed order: every buffered inbound packet is
//! dispatched first, then input, then the local phase machine, then the mirrors.
//! Packets that arrive in the same tick as a local settle check are therefore
//! always applied before that check runs.

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::block::BlockType;
use crate::config::GameSettings;
use crate::input::{Actions, Controller, InputFrame};
use crate::layout::{Layout, LayoutError};
use crate::player::{PlayerOrchestrator, TickEnv};
use crate::protocol::{self, FrameReader, Packet};
use crate::sync::{Applied, MirrorSet};
use crate::view::{FrameView, PlayerView};

const CHAT_HISTORY: usize = 50;

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub enum SessionState {
    PreGame,
    Countdown { remaining_ms: u32 },
    InGame,
    Finished { won: bool },
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct ChatLine {
    pub player_id: u32,
    pub message: String,
}

pub struct Session {
    settings: GameSettings,
    local: PlayerOrchestrator,
    mirrors: MirrorSet,
    reader: FrameReader,
    outbound: Vec<Bytes>,
    controller: Controller,
    rng: StdRng,
    state: SessionState,
    /// Play time with its fractional part kept between ticks.
    elapsed: f64,
    countdown_ms: f32,
    chat: Vec<ChatLine>,
}

impl Session {
    /// `seed` fixes piece and ice randomness; without one the generator is seeded
    /// from entropy.
    pub fn new(settings: GameSettings, local_id: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            local: PlayerOrchestrator::local(local_id),
            mirrors: MirrorSet::new(),
            reader: FrameReader::new(),
            outbound: Vec::new(),
            controller: Controller::new(),
            rng,
            state: SessionState::PreGame,
            elapsed: 0.0,
            countdown_ms: 0.0,
            chat: Vec::new(),
        }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn local(&self) -> &PlayerOrchestrator {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut PlayerOrchestrator {
        &mut self.local
    }

    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed as u64
    }

    pub fn chat_log(&self) -> &[ChatLine] {
        &self.chat
    }

    /// `Some(true)` once every opponent lost, `Some(false)` once the local player did.
    pub fn outcome(&self) -> Option<bool> {
        match self.state {
            SessionState::Finished { won } => Some(won),
            _ => None,
        }
    }

    fn seed_pairs(&mut self) -> [[BlockType; 2]; 2] {
        let n = self.settings.color_count;
        let mut pair = || {
            [
                BlockType::random_color(&mut self.rng, n),
                BlockType::random_color(&mut self.rng, n),
            ]
        };
        [pair(), pair()]
    }

    fn begin_countdown(&mut self) {
        self.elapsed = 0.0;
        self.countdown_ms = self.settings.start_delay_ms as f32;
        self.state = SessionState::Countdown {
            remaining_ms: self.settings.start_delay_ms,
        };
        self.controller.reset();
    }

    /// Announce the local player and start the countdown to the first piece.
    pub fn initialize(&mut self, map_id: u32, character_id: u32) {
        let [block1, block2] = self.seed_pairs();
        self.local.begin([block1, block2]);
        self.local.set_profile(map_id, character_id);
        self.send(&Packet::InitializeGame(protocol::InitializeGame {
            player_id: self.local.id(),
            map_id,
            character_id,
            block1,
            block2,
        }));
        info!(player = self.local.id(), map_id, character_id, "session initialized");
        self.begin_countdown();
    }

    pub fn restart(&mut self) {
        let [block1, block2] = self.seed_pairs();
        self.local.begin([block1, block2]);
        self.send(&Packet::RestartGame(protocol::RestartGame {
            player_id: self.local.id(),
            block1,
            block2,
        }));
        info!(player = self.local.id(), "restart");
        self.begin_countdown();
    }

    /// Give up. During play the loss lands at the next settle check.
    pub fn quit(&mut self) {
        match self.state {
            SessionState::InGame => self.local.request_quit(),
            SessionState::Countdown { .. } => {
                self.send(&Packet::LoseGame {
                    player_id: self.local.id(),
                });
                self.state = SessionState::Finished { won: false };
            }
            SessionState::PreGame | SessionState::Finished { .. } => {}
        }
    }

    /// Connection lost: drop every trace of the match.
    pub fn disconnect(&mut self) {
        warn!(player = self.local.id(), "connection lost, back to pre-game");
        self.reader.clear();
        self.outbound.clear();
        self.mirrors.clear();
        self.local.reset();
        self.controller.reset();
        self.elapsed = 0.0;
        self.state = SessionState::PreGame;
    }

    pub fn send_chat(&mut self, message: &str) {
        let packet = protocol::Chat {
            player_id: self.local.id(),
            message: message.to_owned(),
        };
        self.send(&Packet::Chat(packet));
        self.push_chat(self.local.id(), message.to_owned());
    }

    fn push_chat(&mut self, player_id: u32, message: String) {
        self.chat.push(ChatLine { player_id, message });
        if self.chat.len() > CHAT_HISTORY {
            self.chat.remove(0);
        }
    }

    pub fn load_layout(&mut self, text: &str) -> Result<usize, LayoutError> {
        let layout = Layout::parse(text)?;
        Ok(layout.apply(self.local.board_mut()))
    }

    pub fn set_input(&mut self, input: InputFrame) {
        self.controller.update_inputs(input);
    }

    /// Buffer raw stream bytes; they are dispatched at the start of the next tick.
    pub fn receive(&mut self, data: &[u8]) {
        self.reader.extend(data);
    }

    /// Dispatch every complete buffered frame. Returns packets handled.
    pub fn pump_inbound(&mut self) -> usize {
        let mut handled = 0;
        for frame in self.reader.drain() {
            match frame.decode() {
                Ok(packet) => {
                    self.handle_packet(packet);
                    handled += 1;
                }
                Err(e) => warn!(error = %e, "dropping undecodable packet"),
            }
        }
        handled
    }

    pub fn handle_packet(&mut self, packet: Packet) {
        let sender = packet.player_id();
        if sender == self.local.id() {
            warn!(player = sender, "packet carries the local player id, ignored");
            return;
        }
        if let Packet::AttackInterrupt(a) = &packet {
            if self.mirrors.get(sender).is_some() {
                self.local.interrupts_mut().add(a.count.max(0) as u32);
            }
        }
        match self.mirrors.apply(packet) {
            Applied::Chat(chat) => self.push_chat(chat.player_id, chat.message),
            Applied::Lost(id) => info!(player = id, "opponent lost"),
            Applied::Joined(id) | Applied::Restarted(id) => debug!(player = id, "mirror seeded"),
            Applied::Board | Applied::Counter | Applied::Unknown(_) => {}
        }
    }

    pub fn tick(&mut self, dt_ms: f32) {
        self.pump_inbound();

        match self.state {
            SessionState::PreGame => {}
            SessionState::Finished { .. } => {
                // Whatever chain or drop was already under way still plays out, so the
                // board matches what the other peers replay.
                if !self.local.is_settled() {
                    let mut env = TickEnv {
                        settings: &self.settings,
                        elapsed_ms: self.elapsed as u64,
                        rng: &mut self.rng,
                    };
                    self.local.tick(&Actions::default(), &mut env);
                }
            }
            SessionState::Countdown { .. } => {
                self.countdown_ms -= dt_ms;
                if self.countdown_ms <= 0.0 {
                    self.state = SessionState::InGame;
                    let mut env = TickEnv {
                        settings: &self.settings,
                        elapsed_ms: self.elapsed as u64,
                        rng: &mut self.rng,
                    };
                    self.local.start(&mut env);
                    info!(player = self.local.id(), "go");
                } else {
                    self.state = SessionState::Countdown {
                        remaining_ms: self.countdown_ms.ceil() as u32,
                    };
                }
            }
            SessionState::InGame => {
                self.elapsed += f64::from(dt_ms.max(0.0));
                let actions = self.controller.poll(dt_ms, &self.settings);
                let mut env = TickEnv {
                    settings: &self.settings,
                    elapsed_ms: self.elapsed as u64,
                    rng: &mut self.rng,
                };
                self.local.tick(&actions, &mut env);
            }
        }

        let mut env = TickEnv {
            settings: &self.settings,
            elapsed_ms: self.elapsed as u64,
            rng: &mut self.rng,
        };
        self.mirrors.tick(&mut env);
        self.flush_local();

        let playing = matches!(
            self.state,
            SessionState::InGame | SessionState::Countdown { .. }
        );
        if playing && self.local.is_game_over() {
            self.state = SessionState::Finished { won: false };
        } else if playing && self.mirrors.all_game_over() {
            info!(player = self.local.id(), "every opponent is out");
            self.state = SessionState::Finished { won: true };
        }
    }

    /// Encode the local outbox; attacks are also credited to the local mirrors.
    fn flush_local(&mut self) {
        for packet in self.local.drain_outbox() {
            if let Packet::AttackInterrupt(a) = &packet {
                self.mirrors
                    .add_pending_except(self.local.id(), a.count.max(0) as u32);
            }
            self.send(&packet);
        }
    }

    fn send(&mut self, packet: &Packet) {
        self.outbound.push(packet.encode());
    }

    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbound)
    }

    pub fn snapshot(&self) -> FrameView {
        let players = std::iter::once(&self.local)
            .chain(self.mirrors.iter())
            .map(PlayerView::from)
            .collect();
        FrameView {
            state: self.state,
            elapsed_ms: self.elapsed_ms(),
            players,
            chat: self.chat.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Phase;

    fn quick_settings() -> GameSettings {
        GameSettings {
            start_delay_ms: 0,
            ..GameSettings::default()
        }
    }

    fn decode_all(frames: Vec<Bytes>) -> Vec<Packet> {
        let mut reader = FrameReader::new();
        for f in &frames {
            reader.extend(f);
        }
        reader.drain().iter().map(|f| f.decode().unwrap()).collect()
    }

    #[test]
    fn initialize_announces_and_counts_down() {
        let mut s = Session::new(GameSettings::default(), 1, Some(3));
        s.initialize(7, 2);
        assert_eq!(
            s.state(),
            SessionState::Countdown { remaining_ms: 3000 }
        );
        let sent = decode_all(s.drain_outbound());
        assert!(matches!(&sent[..], [Packet::InitializeGame(i)] if i.map_id == 7));

        s.tick(1000.0);
        assert_eq!(s.state(), SessionState::Countdown { remaining_ms: 2000 });
        s.tick(2000.0);
        assert_eq!(s.state(), SessionState::InGame);
        assert_eq!(s.local().phase(), Phase::Playing);
    }

    #[test]
    fn own_id_and_chat_are_handled() {
        let mut s = Session::new(quick_settings(), 1, Some(1));
        s.handle_packet(Packet::CheckBlockState { player_id: 1 });
        assert!(s.mirrors().is_empty());
        s.handle_packet(Packet::Chat(protocol::Chat {
            player_id: 2,
            message: "hi".into(),
        }));
        s.send_chat("hello");
        let log: Vec<_> = s.chat_log().iter().map(|c| c.message.as_str()).collect();
        assert_eq!(log, vec!["hi", "hello"]);
    }

    #[test]
    fn opponent_loss_wins_and_disconnect_resets() {
        let mut s = Session::new(quick_settings(), 1, Some(1));
        s.initialize(0, 0);
        s.handle_packet(Packet::InitializeGame(protocol::InitializeGame {
            player_id: 2,
            map_id: 0,
            character_id: 0,
            block1: [BlockType::Red, BlockType::Red],
            block2: [BlockType::Red, BlockType::Red],
        }));
        s.tick(16.0);
        s.receive(&Packet::LoseGame { player_id: 2 }.encode());
        s.tick(16.0);
        assert_eq!(s.outcome(), Some(true));

        s.disconnect();
        assert_eq!(s.state(), SessionState::PreGame);
        assert!(s.mirrors().is_empty());
        assert!(s.local().board().is_empty());
    }

    #[test]
    fn incoming_attack_raises_local_pending() {
        let mut s = Session::new(quick_settings(), 1, Some(1));
        s.initialize(0, 0);
        s.handle_packet(Packet::InitializeGame(protocol::InitializeGame {
            player_id: 2,
            map_id: 0,
            character_id: 0,
            block1: [BlockType::Red, BlockType::Red],
            block2: [BlockType::Red, BlockType::Red],
        }));
        s.handle_packet(Packet::AttackInterrupt(protocol::Interrupt {
            player_id: 2,
            count: 9,
            x: 0.0,
            y: 0.0,
            block_type: BlockType::Ice,
        }));
        assert_eq!(s.local().interrupts().pending, 9);
        assert_eq!(s.mirrors().get(2).unwrap().interrupts().pending, 0);
    }

    #[test]
    fn play_time_keeps_fractional_milliseconds() {
        let mut s = Session::new(quick_settings(), 1, Some(1));
        s.initialize(0, 0);
        s.tick(16.0);
        assert_eq!(s.state(), SessionState::InGame);
        for _ in 0..60 {
            s.tick(16.67);
        }
        assert_eq!(s.elapsed_ms(), 1000);
    }

    #[test]
    fn winner_finishes_its_chain_after_the_match_ends() {
        let mut s = Session::new(quick_settings(), 1, Some(1));
        s.initialize(0, 0);
        s.handle_packet(Packet::InitializeGame(protocol::InitializeGame {
            player_id: 2,
            map_id: 0,
            character_id: 0,
            block1: [BlockType::Red, BlockType::Red],
            block2: [BlockType::Red, BlockType::Red],
        }));
        s.tick(16.0);

        s.local = PlayerOrchestrator::local(1);
        s.local.begin([[BlockType::Red, BlockType::Green]; 2]);
        for x in 0..4 {
            s.local.board_mut().place_stationary(BlockType::Blue, x, 12);
        }
        let mut env = TickEnv {
            settings: &s.settings,
            elapsed_ms: 0,
            rng: &mut s.rng,
        };
        assert!(s.local.check_game_block_state(&mut env));
        s.drain_outbound();

        s.receive(&Packet::LoseGame { player_id: 2 }.encode());
        s.tick(16.0);
        assert_eq!(s.outcome(), Some(true));
        assert_eq!(s.local().phase(), Phase::Shattering);

        for _ in 0..500 {
            if s.local().is_settled() {
                break;
            }
            s.tick(16.0);
        }
        assert_eq!(s.local().phase(), Phase::Playing);
        assert!(s.local().board().is_empty());
        let sent = decode_all(s.drain_outbound());
        assert!(sent.iter().any(|p| matches!(
            p,
            Packet::ChangeBlockState(c) if c.phase == Phase::Playing
        )));

        let piece_y = s.local().piece().map(|p| p.standard().pos_y);
        for _ in 0..20 {
            s.tick(16.0);
        }
        assert_eq!(s.local().piece().map(|p| p.standard().pos_y), piece_y);
        assert!(s.drain_outbound().is_empty());
    }
}
