//! One board's phase machine.
//!
//! A [`Role::Local`] player reads input, decides every outcome and records each
//! state-affecting step as a [`Packet`] in its outbox. A [`Role::Remote`] player never
//! decides anything: it queues the authority's packets and applies each one only once
//! its own animations have caught up, so both copies walk through the same states
//! without sharing frame timing.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::arena::BlockId;
use crate::block::{BlockState, BlockType};
use crate::board::Board;
use crate::config::{GameSettings, MIN_MATCH};
use crate::input::Actions;
use crate::interrupt::{IcePlacement, InterruptQueue, distribute};
use crate::matcher::{self, MatchResult};
use crate::piece::{Direction, Fall, FallingPiece, SPAWN_Y, STANDARD};
use crate::protocol::{self, Packet};
use crate::score::{self, ScoreState};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Idle: before the first piece, or a mirror waiting for the authority.
    Standing = 0,
    Playing = 1,
    Shattering = 2,
    IceBlocking = 3,
    GameOver = 4,
}

impl Phase {
    pub fn from_wire(v: u8) -> Option<Phase> {
        match v {
            0 => Some(Phase::Standing),
            1 => Some(Phase::Playing),
            2 => Some(Phase::Shattering),
            3 => Some(Phase::IceBlocking),
            4 => Some(Phase::GameOver),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    Local,
    Remote,
}

/// Shared per-tick context handed down by the session.
pub struct TickEnv<'a> {
    pub settings: &'a GameSettings,
    /// Play time since the first piece, drives the score margin.
    pub elapsed_ms: u64,
    pub rng: &'a mut StdRng,
}

#[derive(Debug)]
pub struct PlayerOrchestrator {
    id: u32,
    role: Role,
    phase: Phase,
    board: Board,
    piece: Option<FallingPiece>,
    next: VecDeque<[BlockType; 2]>,
    score: ScoreState,
    interrupts: InterruptQueue,
    doomed: Vec<BlockId>,
    last_match: MatchResult,
    awaiting_check: bool,
    quit_requested: bool,
    sent_row: i32,
    map_id: u32,
    character_id: u32,
    outbox: Vec<Packet>,
    inbox: VecDeque<Packet>,
}

impl PlayerOrchestrator {
    pub fn new(id: u32, role: Role) -> Self {
        Self {
            id,
            role,
            phase: Phase::Standing,
            board: Board::new(id),
            piece: None,
            next: VecDeque::new(),
            score: ScoreState::default(),
            interrupts: InterruptQueue::default(),
            doomed: Vec::new(),
            last_match: MatchResult::default(),
            awaiting_check: false,
            quit_requested: false,
            sent_row: SPAWN_Y,
            map_id: 0,
            character_id: 0,
            outbox: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    pub fn local(id: u32) -> Self {
        Self::new(id, Role::Local)
    }

    pub fn remote(id: u32) -> Self {
        Self::new(id, Role::Remote)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn piece(&self) -> Option<&FallingPiece> {
        self.piece.as_ref()
    }

    pub fn next_pairs(&self) -> impl Iterator<Item = &[BlockType; 2]> + '_ {
        self.next.iter()
    }

    pub fn score(&self) -> &ScoreState {
        &self.score
    }

    pub fn interrupts(&self) -> &InterruptQueue {
        &self.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptQueue {
        &mut self.interrupts
    }

    /// Groups found by the most recent settle check.
    pub fn last_match(&self) -> &MatchResult {
        &self.last_match
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    /// Nothing left to animate or resolve: idle, out, or waiting on the player's input.
    pub fn is_settled(&self) -> bool {
        match self.phase {
            Phase::Standing | Phase::GameOver => true,
            Phase::Playing => self.piece.is_some(),
            Phase::Shattering | Phase::IceBlocking => false,
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn profile(&self) -> (u32, u32) {
        (self.map_id, self.character_id)
    }

    pub fn set_profile(&mut self, map_id: u32, character_id: u32) {
        self.map_id = map_id;
        self.character_id = character_id;
    }

    /// Clear everything and seed the next-piece queue. The board stays idle until
    /// [`start`](Self::start) or the authority's first promote.
    pub fn begin(&mut self, pairs: [[BlockType; 2]; 2]) {
        self.reset();
        self.next.extend(pairs);
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Standing;
        self.board.clear();
        self.piece = None;
        self.next.clear();
        self.score.reset();
        self.interrupts.reset();
        self.doomed.clear();
        self.last_match = MatchResult::default();
        self.awaiting_check = false;
        self.quit_requested = false;
        self.sent_row = SPAWN_Y;
        self.inbox.clear();
    }

    /// Honoured at the next settle check, never mid-animation.
    pub fn request_quit(&mut self) {
        if !self.quit_requested {
            info!(player = self.id, "quit requested");
        }
        self.quit_requested = true;
    }

    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbox)
    }

    /// Queue an authority event for a mirror; it applies on a later tick, in order.
    pub fn enqueue(&mut self, packet: Packet) {
        self.inbox.push_back(packet);
    }

    pub fn pending_events(&self) -> usize {
        self.inbox.len()
    }

    fn emit(&mut self, packet: Packet) {
        if self.role == Role::Local {
            self.outbox.push(packet);
        }
    }

    /// Promote the first queued pair and begin play.
    pub fn start(&mut self, env: &mut TickEnv<'_>) {
        if self.phase == Phase::Standing {
            self.promote(env);
        }
    }

    pub fn tick(&mut self, actions: &Actions, env: &mut TickEnv<'_>) {
        if self.role == Role::Remote {
            self.replay(env);
        } else if actions.quit {
            self.request_quit();
        }

        let changed = self.board.tick(env.settings);
        if changed.settled + changed.landed > 0 {
            self.board.refresh_links();
        }

        match self.phase {
            Phase::Standing | Phase::GameOver => {}
            Phase::Playing => {
                if self.piece.is_some() {
                    if self.role == Role::Local {
                        self.drive_piece(actions, env.settings);
                    } else if let Some(piece) = self.piece.as_mut() {
                        piece.tick_rotation(env.settings.rotate_step_degrees);
                    }
                } else if self.awaiting_check && self.board.all_stationary() {
                    self.awaiting_check = false;
                    self.check_game_block_state(env);
                }
            }
            Phase::Shattering => self.advance_shatter(env),
            Phase::IceBlocking => {
                if self.board.all_stationary() {
                    self.finish_ice(env);
                }
            }
        }
    }

    fn drive_piece(&mut self, actions: &Actions, settings: &GameSettings) {
        let Some(mut piece) = self.piece.take() else {
            return;
        };
        if actions.rotate {
            if let Some(out) = piece.rotate(&self.board) {
                self.emit(Packet::Rotate(protocol::Rotate {
                    player_id: self.id,
                    orientation: out.to,
                    is_horizontal_moving: out.kicked,
                }));
            }
        }

        let direction = if actions.shift < 0 {
            Direction::Left
        } else {
            Direction::Right
        };
        for _ in 0..actions.shift.unsigned_abs() {
            let moved = match direction {
                Direction::Left => piece.move_left(&self.board, true),
                _ => piece.move_right(&self.board, true),
            };
            if !moved {
                break;
            }
            self.emit(Packet::Move(protocol::Move {
                player_id: self.id,
                direction,
                position: piece.standard().pos_x,
            }));
        }

        piece.add_velocity = if actions.soft_drop {
            settings.soft_drop.add_velocity()
        } else {
            0.0
        };
        piece.tick_rotation(settings.rotate_step_degrees);

        let dy = piece.step();
        match piece.move_down(&self.board, dy) {
            Fall::Falling => {
                let lead = piece.falling_index().unwrap_or(STANDARD);
                let pos_y = piece.blocks()[lead].pos_y;
                let row = pos_y.floor() as i32;
                if row != self.sent_row {
                    self.sent_row = row;
                    self.emit(Packet::Move(protocol::Move {
                        player_id: self.id,
                        direction: Direction::Bottom,
                        position: pos_y,
                    }));
                }
                self.piece = Some(piece);
            }
            Fall::Split { resting } => {
                self.emit(Packet::FallingBlock(protocol::FallingBlock {
                    player_id: self.id,
                    falling_index: (1 - resting) as u8,
                    is_falling: true,
                }));
                self.piece = Some(piece);
            }
            Fall::Landed => {
                let positions = piece.settle_positions();
                self.piece = Some(piece);
                self.push_block_in_game(positions);
            }
        }
    }

    /// Hand the resting piece's blocks to the board at `positions`. Without an active
    /// piece this does nothing, so a replayed push never duplicates blocks.
    pub fn push_block_in_game(&mut self, positions: [[f32; 2]; 2]) -> usize {
        let Some(mut piece) = self.piece.take() else {
            debug!(player = self.id, "push without an active piece ignored");
            return 0;
        };
        piece.finish_rotation();
        piece.set_positions(positions);
        self.emit(Packet::PushBlockInGame(protocol::PushBlockInGame {
            player_id: self.id,
            positions,
        }));

        let mut placed = 0;
        for block in piece.into_blocks() {
            let (x, y) = (block.x, block.y);
            if self.board.push_block(block, x, y).is_some() {
                placed += 1;
            }
        }
        if self.role == Role::Local {
            self.emit(Packet::CheckBlockState { player_id: self.id });
            self.awaiting_check = true;
        }
        placed
    }

    /// Resolve the settled board. Returns true when something shatters.
    pub fn check_game_block_state(&mut self, env: &mut TickEnv<'_>) -> bool {
        self.board.refresh_links();
        if self.board.eligible_count() < MIN_MATCH {
            self.score.rest_score = 0;
            self.last_match = MatchResult::default();
            self.on_no_match(env);
            return false;
        }

        let result = matcher::resolve(&mut self.board);
        if result.is_empty() {
            self.last_match = result;
            self.on_no_match(env);
            return false;
        }

        self.score.combo += 1;
        let points = score::chain_score(&result, self.score.combo);
        self.score.score += points;
        self.score.last_chain_score = points;
        self.doomed = result.doomed();
        for id in &self.doomed {
            if let Some(b) = self.board.block_mut(*id) {
                b.begin_destroy();
            }
        }
        debug!(
            player = self.id,
            combo = self.score.combo,
            groups = result.groups.len(),
            points,
            "chain step"
        );
        if self.role == Role::Local {
            self.send_interrupts(&result, points, env.elapsed_ms);
        }
        self.last_match = result;
        self.phase = Phase::Shattering;
        true
    }

    fn send_interrupts(&mut self, result: &MatchResult, points: u64, elapsed_ms: u64) {
        let (x, y) = result
            .groups
            .first()
            .and_then(|g| g.blocks.first())
            .and_then(|id| self.board.block(*id))
            .map(|b| (b.pos_x, b.pos_y))
            .unwrap_or_default();
        let c = score::convert(&mut self.score, &mut self.interrupts.pending, points, elapsed_ms);
        let player_id = self.id;
        let body = move |count: u32| protocol::Interrupt {
            player_id,
            count: count.min(i16::MAX as u32) as i16,
            x,
            y,
            block_type: BlockType::Ice,
        };
        if c.defense > 0 {
            self.emit(Packet::DefenseInterrupt(body(c.defense)));
        }
        if c.attack > 0 {
            self.emit(Packet::AttackInterrupt(body(c.attack)));
        }
    }

    fn on_no_match(&mut self, env: &mut TickEnv<'_>) {
        let streak_ended = self.score.combo > 0;
        self.score.combo = 0;
        if self.role == Role::Remote {
            self.phase = Phase::Standing;
            return;
        }
        if self.quit_requested || self.board.topped_out() {
            self.lose();
            return;
        }
        if streak_ended {
            // Incoming ice waits one settle cycle after a chain.
            self.emit(Packet::StopCombo { player_id: self.id });
            self.promote(env);
            return;
        }
        if !self.drop_ice(env) {
            self.promote(env);
        }
    }

    fn drop_ice(&mut self, env: &mut TickEnv<'_>) -> bool {
        let Some(placement) = distribute(self.interrupts.pending, &mut *env.rng) else {
            return false;
        };
        self.place_ice(&placement);
        self.emit(Packet::AddInterruptBlock(protocol::AddInterruptBlock {
            player_id: self.id,
            placement,
        }));
        self.emit(Packet::ChangeBlockState(protocol::ChangeBlockState {
            player_id: self.id,
            phase: Phase::IceBlocking,
        }));
        self.phase = Phase::IceBlocking;
        true
    }

    fn place_ice(&mut self, placement: &IcePlacement) {
        let spawned = self.board.spawn_ice(&placement.per_column());
        let cancelled = self.interrupts.cancel(placement.count());
        debug!(player = self.id, spawned, cancelled, "ice dropped");
    }

    fn finish_ice(&mut self, env: &mut TickEnv<'_>) {
        self.board.refresh_links();
        if self.role == Role::Remote {
            self.phase = Phase::Standing;
            return;
        }
        if self.quit_requested || self.board.topped_out() {
            self.lose();
        } else {
            self.promote(env);
        }
    }

    fn advance_shatter(&mut self, env: &mut TickEnv<'_>) {
        if !self.doomed.is_empty() {
            if self.board.all_in_state(&self.doomed, BlockState::PlayOut) {
                let doomed = std::mem::take(&mut self.doomed);
                self.board.remove_blocks(&doomed);
                let falling = self.board.apply_gravity();
                debug!(player = self.id, removed = doomed.len(), falling, "shatter finished");
            }
            return;
        }
        if self.board.all_stationary() {
            self.check_game_block_state(env);
        }
    }

    fn promote(&mut self, env: &mut TickEnv<'_>) {
        if self.role == Role::Local {
            let fresh = [
                BlockType::random_color(&mut *env.rng, env.settings.color_count),
                BlockType::random_color(&mut *env.rng, env.settings.color_count),
            ];
            self.next.push_back(fresh);
            self.emit(Packet::NewGroupBlock(protocol::NewGroupBlock {
                player_id: self.id,
                blocks: fresh,
            }));
        }
        let Some(types) = self.next.pop_front() else {
            warn!(player = self.id, "no queued pair to promote");
            self.phase = Phase::Standing;
            return;
        };
        self.piece = Some(FallingPiece::spawn(types, self.id, env.settings.fall_velocity));
        self.sent_row = SPAWN_Y;
        self.phase = Phase::Playing;
        self.emit(Packet::ChangeBlockState(protocol::ChangeBlockState {
            player_id: self.id,
            phase: Phase::Playing,
        }));
    }

    fn lose(&mut self) {
        if self.phase == Phase::GameOver {
            return;
        }
        info!(player = self.id, role = ?self.role, "game over");
        self.piece = None;
        self.phase = Phase::GameOver;
        self.emit(Packet::LoseGame { player_id: self.id });
    }

    fn replay(&mut self, env: &mut TickEnv<'_>) {
        while let Some(front) = self.inbox.front() {
            if !self.ready_for(front) {
                break;
            }
            if let Some(packet) = self.inbox.pop_front() {
                self.apply_event(packet, env);
            }
        }
    }

    fn ready_for(&self, packet: &Packet) -> bool {
        match packet {
            Packet::Move(_) | Packet::Rotate(_) | Packet::FallingBlock(_) | Packet::PushBlockInGame(_) => {
                self.piece.is_some()
            }
            Packet::CheckBlockState { .. } => {
                self.phase == Phase::Playing && self.piece.is_none() && self.board.all_stationary()
            }
            Packet::ChangeBlockState(_) | Packet::AddInterruptBlock(_) | Packet::StopCombo { .. } => {
                self.phase == Phase::Standing
            }
            _ => true,
        }
    }

    fn apply_event(&mut self, packet: Packet, env: &mut TickEnv<'_>) {
        match packet {
            Packet::Move(m) => self.replay_move(&m),
            Packet::Rotate(r) => {
                if let Some(piece) = self.piece.as_mut() {
                    piece.apply_rotation(r.orientation, r.is_horizontal_moving);
                }
            }
            Packet::FallingBlock(f) => {
                if let Some(piece) = self.piece.as_mut() {
                    piece.set_split(f.falling_index as usize, f.is_falling);
                }
            }
            Packet::PushBlockInGame(p) => {
                self.push_block_in_game(p.positions);
            }
            Packet::CheckBlockState { .. } => {
                self.check_game_block_state(env);
            }
            Packet::ChangeBlockState(c) => match c.phase {
                Phase::Playing => self.promote(env),
                Phase::IceBlocking => self.phase = Phase::IceBlocking,
                Phase::GameOver => self.lose(),
                other => debug!(player = self.id, ?other, "phase change needs no replay"),
            },
            Packet::AddInterruptBlock(a) => self.place_ice(&a.placement),
            Packet::StopCombo { .. } => self.score.combo = 0,
            Packet::NewGroupBlock(n) => self.next.push_back(n.blocks),
            Packet::LoseGame { .. } => self.lose(),
            other => debug!(player = self.id, kind = ?other.packet_type(), "not a board event"),
        }
    }

    fn replay_move(&mut self, m: &protocol::Move) {
        let Some(piece) = self.piece.as_mut() else {
            return;
        };
        match m.direction {
            Direction::Left => {
                piece.move_left(&self.board, false);
                piece.set_standard_column(m.position);
            }
            Direction::Right => {
                piece.move_right(&self.board, false);
                piece.set_standard_column(m.position);
            }
            Direction::Bottom => piece.set_standard_row(m.position),
            Direction::Top => debug!(player = self.id, "upward move ignored"),
        }
    }
}
