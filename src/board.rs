//! One player's placed blocks: the arena that owns them and the grid that indexes them.

use tracing::{debug, warn};

use crate::arena::{BlockArena, BlockId};
use crate::block::{
    Block, BlockState, BlockTick, BlockType, LINK_BOTTOM, LINK_LEFT, LINK_RIGHT, LINK_TOP,
};
use crate::config::{GameSettings, HEIGHT, WIDTH};
use crate::grid::{BoardGrid, Rect};

/// Cells whose occupancy ends the game: the two center columns of the top two rows.
const TOP_OUT_CELLS: [(i32, i32); 4] = [(2, 0), (3, 0), (2, 1), (3, 1)];

#[derive(Debug, Default)]
pub struct BoardTick {
    pub settled: usize,
    pub landed: usize,
    pub played_out: Vec<BlockId>,
}

#[derive(Clone, Debug)]
pub struct Board {
    owner: u32,
    arena: BlockArena,
    grid: BoardGrid,
}

impl Board {
    pub fn new(owner: u32) -> Self {
        Self {
            owner,
            arena: BlockArena::new(),
            grid: BoardGrid::new(),
        }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    pub fn grid(&self) -> &BoardGrid {
        &self.grid
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.arena.get(id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.arena.get_mut(id)
    }

    pub fn block_at(&self, x: i32, y: i32) -> Option<&Block> {
        self.grid.get(x, y).and_then(|id| self.arena.get(id))
    }

    pub fn kind_at(&self, x: i32, y: i32) -> BlockType {
        self.block_at(x, y).map(|b| b.kind).unwrap_or(BlockType::Empty)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.grid.clear();
    }

    /// True when `rect` leaves the board or overlaps any Stationary block.
    pub fn rect_blocked(&self, rect: &Rect) -> bool {
        if rect.outside_board() {
            return true;
        }
        self.arena
            .iter()
            .filter(|(_, b)| b.is_stationary())
            .any(|(_, b)| Rect::cell(b.pos_x, b.pos_y).overlaps(rect))
    }

    /// Insert a Stationary block directly, used by layouts and tests.
    pub fn place_stationary(&mut self, kind: BlockType, x: i32, y: i32) -> Option<BlockId> {
        if kind == BlockType::Empty || !BoardGrid::in_bounds(x, y) {
            return None;
        }
        if let Some(existing) = self.grid.get(x, y) {
            return Some(existing);
        }
        let id = self.arena.insert(Block::new(kind, self.owner, x, y));
        self.grid.set(x, y, id);
        Some(id)
    }

    /// Take ownership of a settled piece block. A cell that is already occupied keeps its
    /// block, so replaying the same settle twice never stacks two entries in one slot.
    pub fn push_block(&mut self, mut block: Block, x: i32, y: i32) -> Option<BlockId> {
        if !BoardGrid::in_bounds(x, y) {
            debug!(x, y, owner = self.owner, "settled block outside the grid");
            return None;
        }
        if let Some(existing) = self.grid.get(x, y) {
            debug!(x, y, owner = self.owner, "cell already holds a block, keeping it");
            return Some(existing);
        }
        block.owner = self.owner;
        block.snap_to(x, y);
        block.begin_effect();
        let id = self.arena.insert(block);
        self.grid.set(x, y, id);
        Some(id)
    }

    pub fn tick(&mut self, settings: &GameSettings) -> BoardTick {
        let mut out = BoardTick::default();
        for id in self.arena.ids() {
            let Some(block) = self.arena.get_mut(id) else {
                continue;
            };
            match block.tick(settings) {
                BlockTick::Idle => {}
                BlockTick::Settled => out.settled += 1,
                BlockTick::PlayedOut => out.played_out.push(id),
                BlockTick::Landed { x, y } => {
                    out.landed += 1;
                    if let Some(other) = self.grid.get(x, y) {
                        warn!(x, y, ?other, "landing cell already occupied");
                    }
                    self.grid.set(x, y, id);
                }
            }
        }
        out
    }

    pub fn all_stationary(&self) -> bool {
        self.arena.iter().all(|(_, b)| b.is_stationary())
    }

    pub fn all_in_state(&self, ids: &[BlockId], state: BlockState) -> bool {
        ids.iter()
            .all(|id| self.arena.get(*id).map(|b| b.state == state).unwrap_or(true))
    }

    pub fn remove_blocks(&mut self, ids: &[BlockId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(block) = self.arena.remove(*id) {
                if self.grid.get(block.x, block.y) == Some(*id) {
                    self.grid.clear_slot(block.x, block.y);
                } else {
                    self.grid.forget(*id);
                }
                removed += 1;
            }
        }
        removed
    }

    /// Start every block sitting above a hole falling toward its landing row.
    /// Returns how many blocks began to move.
    pub fn apply_gravity(&mut self) -> usize {
        let mut started = 0;
        for x in 0..WIDTH as i32 {
            let mut next_free = HEIGHT as i32 - 1;
            for y in (0..HEIGHT as i32).rev() {
                let Some(id) = self.grid.get(x, y) else {
                    continue;
                };
                if y != next_free {
                    self.grid.clear_slot(x, y);
                    if let Some(block) = self.arena.get_mut(id) {
                        block.begin_fall(next_free);
                        started += 1;
                    }
                }
                next_free -= 1;
            }
        }
        started
    }

    /// Row the next block dropped into column `x` would land on.
    pub fn landing_row(&self, x: i32) -> i32 {
        let top = (0..HEIGHT as i32).find(|&y| self.grid.get(x, y).is_some());
        top.map(|t| t - 1).unwrap_or(HEIGHT as i32 - 1)
    }

    /// Spawn `counts[x]` ice blocks above column `x`, already falling.
    /// Ice that has no room left in its column is discarded. Returns blocks spawned.
    pub fn spawn_ice(&mut self, counts: &[usize; WIDTH]) -> usize {
        let mut spawned = 0;
        for (x, &n) in counts.iter().enumerate() {
            let x = x as i32;
            let floor = self.landing_row(x);
            for i in 0..n as i32 {
                let target = floor - i;
                if target < 0 {
                    debug!(column = x, "ice overflowed the column");
                    break;
                }
                let mut block = Block::new(BlockType::Ice, self.owner, x, -1 - i);
                block.begin_fall(target);
                self.arena.insert(block);
                spawned += 1;
            }
        }
        spawned
    }

    /// Stationary, matchable blocks.
    pub fn eligible_count(&self) -> usize {
        self.arena
            .iter()
            .filter(|(_, b)| b.is_stationary() && b.kind.is_color())
            .count()
    }

    pub fn refresh_links(&mut self) {
        let mut masks = Vec::with_capacity(self.arena.len());
        for (id, b) in self.arena.iter() {
            let mut mask = 0u8;
            if b.is_stationary() && b.kind.is_color() {
                let same = |x: i32, y: i32| {
                    self.block_at(x, y)
                        .map(|n| n.kind == b.kind && n.is_stationary())
                        .unwrap_or(false)
                };
                if same(b.x - 1, b.y) {
                    mask |= LINK_LEFT;
                }
                if same(b.x, b.y - 1) {
                    mask |= LINK_TOP;
                }
                if same(b.x + 1, b.y) {
                    mask |= LINK_RIGHT;
                }
                if same(b.x, b.y + 1) {
                    mask |= LINK_BOTTOM;
                }
            }
            masks.push((id, mask));
        }
        for (id, mask) in masks {
            if let Some(b) = self.arena.get_mut(id) {
                b.links = mask;
            }
        }
    }

    pub fn topped_out(&self) -> bool {
        TOP_OUT_CELLS
            .iter()
            .any(|&(x, y)| self.grid.get(x, y).is_some())
    }

    /// Layout digits per row (0 empty, 1-5 colors, 6 ice).
    pub fn digits(&self) -> Vec<Vec<u8>> {
        (0..HEIGHT as i32)
            .map(|y| (0..WIDTH as i32).map(|x| self.kind_at(x, y).digit()).collect())
            .collect()
    }
}
