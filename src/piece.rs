//! The two-block falling piece: movement, rotation with wall kick, split falling.

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockType};
use crate::board::Board;
use crate::grid::Rect;

/// Spawn column of the standard block.
pub const SPAWN_X: i32 = 2;
/// Spawn row of the standard block; the satellite starts directly above.
pub const SPAWN_Y: i32 = 1;
/// Largest vertical step per tick, keeps a fast piece from skipping a cell.
const MAX_STEP: f32 = 0.95;
const SWEEP_DEGREES: f32 = 90.0;

pub const STANDARD: usize = 0;
pub const SATELLITE: usize = 1;

/// Side of the standard block the satellite sits on.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Orientation {
    Down = 0,
    Right = 1,
    Up = 2,
    Left = 3,
}

impl Orientation {
    pub fn next(self) -> Orientation {
        match self {
            Orientation::Down => Orientation::Right,
            Orientation::Right => Orientation::Up,
            Orientation::Up => Orientation::Left,
            Orientation::Left => Orientation::Down,
        }
    }

    pub fn offset(self) -> (i32, i32) {
        match self {
            Orientation::Down => (0, 1),
            Orientation::Right => (1, 0),
            Orientation::Up => (0, -1),
            Orientation::Left => (-1, 0),
        }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Orientation::Down | Orientation::Up)
    }

    pub fn from_wire(v: u8) -> Option<Orientation> {
        match v {
            0 => Some(Orientation::Down),
            1 => Some(Orientation::Right),
            2 => Some(Orientation::Up),
            3 => Some(Orientation::Left),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Direction {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
}

impl Direction {
    pub fn from_wire(v: u8) -> Option<Direction> {
        match v {
            0 => Some(Direction::Left),
            1 => Some(Direction::Right),
            2 => Some(Direction::Bottom),
            3 => Some(Direction::Top),
            _ => None,
        }
    }
}

/// Result of one gravity step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fall {
    Falling,
    /// A horizontal piece caught on one side; `resting` stopped, the other keeps falling.
    Split { resting: usize },
    Landed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotateOutcome {
    pub to: Orientation,
    /// The standard block was nudged one cell away from the satellite's side.
    pub kicked: bool,
}

#[derive(Clone, Copy, Debug)]
struct Sweep {
    to: Orientation,
    angle: f32,
}

#[derive(Clone, Debug)]
pub struct FallingPiece {
    blocks: [Block; 2],
    orientation: Orientation,
    sweep: Option<Sweep>,
    resting: [bool; 2],
    pub fall_velocity: f32,
    pub add_velocity: f32,
}

impl FallingPiece {
    pub fn spawn(types: [BlockType; 2], owner: u32, fall_velocity: f32) -> Self {
        let mut piece = Self {
            blocks: [
                Block::playing(types[STANDARD], owner, SPAWN_X, SPAWN_Y),
                Block::playing(types[SATELLITE], owner, SPAWN_X, SPAWN_Y - 1),
            ],
            orientation: Orientation::Up,
            sweep: None,
            resting: [false; 2],
            fall_velocity,
            add_velocity: 0.0,
        };
        piece.place_satellite();
        piece
    }

    pub fn standard(&self) -> &Block {
        &self.blocks[STANDARD]
    }

    pub fn satellite(&self) -> &Block {
        &self.blocks[SATELLITE]
    }

    pub fn blocks(&self) -> &[Block; 2] {
        &self.blocks
    }

    pub fn types(&self) -> [BlockType; 2] {
        [self.blocks[STANDARD].kind, self.blocks[SATELLITE].kind]
    }

    /// Orientation as last committed by a finished sweep.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Orientation used for placement and collision, including an in-progress sweep.
    pub fn logical_orientation(&self) -> Orientation {
        self.sweep.map(|s| s.to).unwrap_or(self.orientation)
    }

    pub fn is_rotating(&self) -> bool {
        self.sweep.is_some()
    }

    pub fn sweep_angle(&self) -> f32 {
        self.sweep.map(|s| s.angle).unwrap_or(0.0)
    }

    pub fn is_split(&self) -> bool {
        self.resting[STANDARD] != self.resting[SATELLITE]
    }

    /// Index of the block still falling on its own, if split.
    pub fn falling_index(&self) -> Option<usize> {
        if !self.is_split() {
            return None;
        }
        Some(if self.resting[STANDARD] { SATELLITE } else { STANDARD })
    }

    pub fn settle_positions(&self) -> [[f32; 2]; 2] {
        [
            [self.blocks[STANDARD].pos_x, self.blocks[STANDARD].pos_y],
            [self.blocks[SATELLITE].pos_x, self.blocks[SATELLITE].pos_y],
        ]
    }

    pub fn into_blocks(self) -> [Block; 2] {
        self.blocks
    }

    fn place_satellite(&mut self) {
        let (dx, dy) = self.logical_orientation().offset();
        let std = &self.blocks[STANDARD];
        let (px, py) = (std.pos_x + dx as f32, std.pos_y + dy as f32);
        set_pos(&mut self.blocks[SATELLITE], px, py);
    }

    fn shift(&mut self, board: &Board, dx: i32, collision_check: bool) -> bool {
        if self.is_split() {
            return false;
        }
        let blocked = self.blocks.iter().any(|b| {
            let rect = Rect::cell(b.pos_x + dx as f32, b.pos_y);
            if collision_check {
                board.rect_blocked(&rect)
            } else {
                rect.outside_board()
            }
        });
        if blocked {
            return false;
        }
        for b in self.blocks.iter_mut() {
            let (px, py) = (b.pos_x + dx as f32, b.pos_y);
            set_pos(b, px, py);
        }
        true
    }

    pub fn move_left(&mut self, board: &Board, collision_check: bool) -> bool {
        self.shift(board, -1, collision_check)
    }

    pub fn move_right(&mut self, board: &Board, collision_check: bool) -> bool {
        self.shift(board, 1, collision_check)
    }

    /// Per-tick fall distance including the player's boost.
    pub fn step(&self) -> f32 {
        (self.fall_velocity + self.add_velocity).min(MAX_STEP)
    }

    pub fn move_down(&mut self, board: &Board, dy: f32) -> Fall {
        let dy = dy.min(MAX_STEP);
        if let Some(idx) = self.falling_index() {
            return if self.drop_block(board, idx, dy) {
                self.resting[idx] = true;
                Fall::Landed
            } else {
                Fall::Falling
            };
        }

        if self.logical_orientation().is_vertical() {
            let (lead, trail) = if self.blocks[STANDARD].pos_y >= self.blocks[SATELLITE].pos_y {
                (STANDARD, SATELLITE)
            } else {
                (SATELLITE, STANDARD)
            };
            let b = &self.blocks[lead];
            if board.rect_blocked(&Rect::cell(b.pos_x, b.pos_y + dy)) {
                let row = landing_row(board, b.pos_x, b.pos_y, dy);
                let x = b.pos_x;
                set_pos(&mut self.blocks[lead], x, row);
                set_pos(&mut self.blocks[trail], x, row - 1.0);
                self.resting = [true; 2];
                return Fall::Landed;
            }
            for b in self.blocks.iter_mut() {
                let (px, py) = (b.pos_x, b.pos_y + dy);
                set_pos(b, px, py);
            }
            return Fall::Falling;
        }

        let blocked = [STANDARD, SATELLITE].map(|i| {
            let b = &self.blocks[i];
            board.rect_blocked(&Rect::cell(b.pos_x, b.pos_y + dy))
        });
        match blocked {
            [true, true] => {
                self.drop_block(board, STANDARD, dy);
                self.drop_block(board, SATELLITE, dy);
                self.resting = [true; 2];
                Fall::Landed
            }
            [false, false] => {
                self.drop_block(board, STANDARD, dy);
                self.drop_block(board, SATELLITE, dy);
                Fall::Falling
            }
            _ => {
                let resting = if blocked[STANDARD] { STANDARD } else { SATELLITE };
                let falling = 1 - resting;
                self.drop_block(board, resting, dy);
                self.resting[resting] = true;
                self.drop_block(board, falling, dy);
                Fall::Split { resting }
            }
        }
    }

    /// Move one block down by `dy`, snapping it onto its landing row on collision.
    /// Returns true when it came to rest.
    fn drop_block(&mut self, board: &Board, idx: usize, dy: f32) -> bool {
        let b = &self.blocks[idx];
        let (x, y) = (b.pos_x, b.pos_y);
        if board.rect_blocked(&Rect::cell(x, y + dy)) {
            let row = landing_row(board, x, y, dy);
            set_pos(&mut self.blocks[idx], x, row);
            true
        } else {
            set_pos(&mut self.blocks[idx], x, y + dy);
            false
        }
    }

    /// Begin a quarter-turn to the next orientation, nudging off a wall when one side is
    /// blocked. Refused while a sweep is running, while split, or when no cell is free.
    pub fn rotate(&mut self, board: &Board) -> Option<RotateOutcome> {
        if self.sweep.is_some() || self.is_split() {
            return None;
        }
        let to = self.logical_orientation().next();
        let (dx, dy) = to.offset();
        let std = &self.blocks[STANDARD];
        let (sx, sy) = (std.pos_x, std.pos_y);
        let mut kicked = false;
        if board.rect_blocked(&Rect::cell(sx + dx as f32, sy + dy as f32)) {
            if to.is_vertical() {
                return None;
            }
            if board.rect_blocked(&Rect::cell(sx - dx as f32, sy)) {
                return None;
            }
            set_pos(&mut self.blocks[STANDARD], sx - dx as f32, sy);
            kicked = true;
        }
        self.sweep = Some(Sweep { to, angle: 0.0 });
        self.place_satellite();
        Some(RotateOutcome { to, kicked })
    }

    /// Advance the rotation sweep; returns true on the tick the orientation commits.
    pub fn tick_rotation(&mut self, step_degrees: f32) -> bool {
        let Some(sweep) = self.sweep.as_mut() else {
            return false;
        };
        sweep.angle += step_degrees;
        if sweep.angle >= SWEEP_DEGREES {
            self.orientation = sweep.to;
            self.sweep = None;
            return true;
        }
        false
    }

    pub fn finish_rotation(&mut self) {
        if let Some(sweep) = self.sweep.take() {
            self.orientation = sweep.to;
        }
    }

    /// Replay a rotation decided elsewhere, without collision tests.
    pub fn apply_rotation(&mut self, to: Orientation, kicked: bool) {
        self.finish_rotation();
        if kicked {
            let (dx, _) = to.offset();
            let std = &self.blocks[STANDARD];
            let (sx, sy) = (std.pos_x - dx as f32, std.pos_y);
            set_pos(&mut self.blocks[STANDARD], sx, sy);
        }
        self.sweep = Some(Sweep { to, angle: 0.0 });
        self.place_satellite();
    }

    /// Replay the authority's column for the standard block.
    pub fn set_standard_column(&mut self, x: f32) {
        if self.is_split() {
            return;
        }
        let y = self.blocks[STANDARD].pos_y;
        set_pos(&mut self.blocks[STANDARD], x, y);
        self.place_satellite();
    }

    /// Replay the authority's fall progress for the standard block.
    pub fn set_standard_row(&mut self, y: f32) {
        if let Some(idx) = self.falling_index() {
            let x = self.blocks[idx].pos_x;
            set_pos(&mut self.blocks[idx], x, y);
            return;
        }
        let x = self.blocks[STANDARD].pos_x;
        set_pos(&mut self.blocks[STANDARD], x, y);
        self.place_satellite();
    }

    /// Replay a split: `falling` keeps moving, its partner is at rest.
    pub fn set_split(&mut self, falling: usize, is_falling: bool) {
        if falling > SATELLITE {
            return;
        }
        self.resting[1 - falling] = true;
        self.resting[falling] = !is_falling;
    }

    /// Force both blocks to the given final cells.
    pub fn set_positions(&mut self, positions: [[f32; 2]; 2]) {
        for (b, p) in self.blocks.iter_mut().zip(positions) {
            set_pos(b, p[0], p[1]);
        }
        self.resting = [true; 2];
    }
}

fn set_pos(b: &mut Block, x: f32, y: f32) {
    b.pos_x = x;
    b.pos_y = y;
    b.x = x.round() as i32;
    b.y = y.round() as i32;
}

/// Last whole row at or above `y + dy` the block can occupy.
fn landing_row(board: &Board, x: f32, y: f32, dy: f32) -> f32 {
    let floor = y.floor();
    let mut row = (y + dy).floor();
    while row > floor && board.rect_blocked(&Rect::cell(x, row)) {
        row -= 1.0;
    }
    row.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEIGHT;

    fn piece() -> FallingPiece {
        FallingPiece::spawn([BlockType::Red, BlockType::Blue], 1, 0.5)
    }

    fn drop_until_landed(p: &mut FallingPiece, board: &Board) -> Vec<Fall> {
        let mut falls = Vec::new();
        for _ in 0..200 {
            let f = p.move_down(board, 0.5);
            falls.push(f);
            if f == Fall::Landed {
                return falls;
            }
        }
        panic!("piece never landed");
    }

    #[test]
    fn spawns_vertical_with_satellite_above() {
        let p = piece();
        assert_eq!(p.orientation(), Orientation::Up);
        assert_eq!((p.standard().x, p.standard().y), (SPAWN_X, SPAWN_Y));
        assert_eq!((p.satellite().x, p.satellite().y), (SPAWN_X, SPAWN_Y - 1));
    }

    #[test]
    fn rotation_cycle_order() {
        let order = [
            Orientation::Down,
            Orientation::Right,
            Orientation::Up,
            Orientation::Left,
        ];
        for i in 0..4 {
            assert_eq!(order[i].next(), order[(i + 1) % 4]);
        }
    }

    #[test]
    fn moves_stop_at_walls() {
        let board = Board::new(1);
        let mut p = piece();
        assert!(p.move_left(&board, true));
        assert!(p.move_left(&board, true));
        assert!(!p.move_left(&board, true));
        assert_eq!(p.standard().x, 0);
    }

    #[test]
    fn move_blocked_by_stationary_neighbor() {
        let mut board = Board::new(1);
        board.place_stationary(BlockType::Green, 3, 1);
        let mut p = piece();
        assert!(!p.move_right(&board, true));
        assert!(p.move_right(&board, false));
    }

    #[test]
    fn vertical_piece_lands_on_floor() {
        let board = Board::new(1);
        let mut p = piece();
        drop_until_landed(&mut p, &board);
        assert_eq!(p.standard().y, HEIGHT as i32 - 1);
        assert_eq!(p.satellite().y, HEIGHT as i32 - 2);
        assert_eq!(p.standard().pos_y, (HEIGHT - 1) as f32);
    }

    #[test]
    fn horizontal_piece_splits_over_a_ledge() {
        let mut board = Board::new(1);
        board.place_stationary(BlockType::Green, 2, 12);
        board.place_stationary(BlockType::Green, 2, 11);
        let mut p = piece();
        // Up -> Left puts the satellite in column 1.
        p.rotate(&board).unwrap();
        p.finish_rotation();
        assert_eq!(p.orientation(), Orientation::Left);
        let falls = drop_until_landed(&mut p, &board);
        assert!(falls.contains(&Fall::Split { resting: STANDARD }));
        assert_eq!((p.standard().x, p.standard().y), (2, 10));
        assert_eq!((p.satellite().x, p.satellite().y), (1, 12));
    }

    #[test]
    fn wall_kick_nudges_away_from_wall() {
        let board = Board::new(1);
        let mut p = piece();
        p.move_left(&board, true);
        p.move_left(&board, true);
        // Up -> Left at column 0: satellite side is the wall, standard moves right.
        let out = p.rotate(&board).unwrap();
        assert_eq!(out, RotateOutcome { to: Orientation::Left, kicked: true });
        assert_eq!(p.standard().x, 1);
        assert_eq!(p.satellite().x, 0);
    }

    #[test]
    fn rotation_refused_when_both_sides_blocked() {
        let mut board = Board::new(1);
        board.place_stationary(BlockType::Green, 1, 1);
        board.place_stationary(BlockType::Green, 3, 1);
        let mut p = piece();
        let before = p.settle_positions();
        assert_eq!(p.rotate(&board), None);
        assert_eq!(p.orientation(), Orientation::Up);
        assert!(!p.is_rotating());
        assert_eq!(p.settle_positions(), before);
    }

    #[test]
    fn sweep_commits_after_ninety_degrees() {
        let board = Board::new(1);
        let mut p = piece();
        p.rotate(&board).unwrap();
        assert_eq!(p.orientation(), Orientation::Up);
        assert_eq!(p.logical_orientation(), Orientation::Left);
        assert!(p.rotate(&board).is_none());
        assert!(!p.tick_rotation(45.0));
        assert!(p.tick_rotation(45.0));
        assert_eq!(p.orientation(), Orientation::Left);
    }

    #[test]
    fn replayed_kick_lands_where_the_authority_did() {
        let board = Board::new(1);
        let mut authority = piece();
        authority.move_left(&board, true);
        authority.move_left(&board, true);
        let out = authority.rotate(&board).unwrap();
        assert!(out.kicked);

        let mut mirror = piece();
        mirror.move_left(&board, false);
        mirror.set_standard_column(0.0);
        mirror.apply_rotation(out.to, out.kicked);
        assert_eq!(mirror.logical_orientation(), Orientation::Left);
        assert_eq!(mirror.settle_positions(), authority.settle_positions());
        assert_eq!((mirror.standard().x, mirror.satellite().x), (1, 0));
    }

    #[test]
    fn replayed_split_moves_only_the_falling_block() {
        let mut board = Board::new(1);
        board.place_stationary(BlockType::Green, 2, 12);
        board.place_stationary(BlockType::Green, 2, 11);
        let mut authority = piece();
        let out = authority.rotate(&board).unwrap();
        let falls = drop_until_landed(&mut authority, &board);
        let split = falls.iter().copied().find(|f| matches!(f, Fall::Split { .. }));
        let Some(Fall::Split { resting }) = split else {
            panic!("expected a split, got {falls:?}");
        };

        let mut mirror = piece();
        mirror.apply_rotation(out.to, out.kicked);
        mirror.set_standard_row(10.0);
        assert!(!mirror.is_split());
        assert_eq!(mirror.satellite().pos_y, 10.0);

        mirror.set_split(1 - resting, true);
        assert!(mirror.is_split());
        assert_eq!(mirror.falling_index(), Some(1 - resting));
        mirror.set_standard_row(11.5);
        assert_eq!(mirror.blocks()[1 - resting].pos_y, 11.5);
        assert_eq!(mirror.blocks()[resting].pos_y, 10.0);
        // Sideways replay is ignored once split.
        mirror.set_standard_column(4.0);
        assert_eq!(mirror.standard().x, SPAWN_X);

        mirror.set_positions(authority.settle_positions());
        assert_eq!(mirror.settle_positions(), authority.settle_positions());
        assert!(!mirror.is_split());
    }
}

