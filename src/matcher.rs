//! Connected-component search for groups of same-colored blocks.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::arena::BlockId;
use crate::block::BlockType;
use crate::board::Board;
use crate::config::{HEIGHT, MIN_MATCH, WIDTH};
use crate::grid::BoardGrid;

const NEIGHBOURS_4: [(i32, i32); 4] = [(-1, 0), (0, -1), (1, 0), (0, 1)];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchGroup {
    pub kind: BlockType,
    /// Blocks in discovery order.
    pub blocks: Vec<BlockId>,
}

impl MatchGroup {
    pub fn link_count(&self) -> usize {
        self.blocks.len()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub groups: Vec<MatchGroup>,
    /// Ice touching a matched group, shattered alongside it.
    pub ice: Vec<BlockId>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.groups.iter().map(|g| g.blocks.len()).sum()
    }

    pub fn distinct_types(&self) -> usize {
        self.groups
            .iter()
            .map(|g| g.kind)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Matched blocks followed by doomed ice.
    pub fn doomed(&self) -> Vec<BlockId> {
        self.groups
            .iter()
            .flat_map(|g| g.blocks.iter().copied())
            .chain(self.ice.iter().copied())
            .collect()
    }
}

fn matchable(board: &Board, x: i32, y: i32) -> Option<(BlockId, BlockType)> {
    let id = board.grid().get(x, y)?;
    let b = board.block(id)?;
    (b.is_stationary() && b.kind.is_color()).then_some((id, b.kind))
}

/// Scan the grid row-major from index 0 and collect every group of at least
/// `MIN_MATCH` same-colored Stationary blocks.
pub fn resolve(board: &mut Board) -> MatchResult {
    let mut result = MatchResult::default();
    let mut scanned = vec![false; WIDTH * HEIGHT];

    for index in 0..WIDTH * HEIGHT {
        if scanned[index] {
            continue;
        }
        let (sx, sy) = BoardGrid::coords(index);
        let Some((start, kind)) = matchable(board, sx, sy) else {
            continue;
        };
        if board.block(start).map(|b| b.visited).unwrap_or(true) {
            continue;
        }

        let component = expand(board, start, sx, sy, kind);
        for &(_, x, y) in &component {
            if let Some(i) = BoardGrid::index(x, y) {
                scanned[i] = true;
            }
        }
        if component.len() >= MIN_MATCH {
            result.groups.push(MatchGroup {
                kind,
                blocks: component.iter().map(|&(id, _, _)| id).collect(),
            });
        } else {
            for &(id, _, _) in &component {
                if let Some(b) = board.block_mut(id) {
                    b.visited = false;
                }
            }
        }
    }

    result.ice = adjacent_ice(board, &result.groups);
    for group in &result.groups {
        for id in &group.blocks {
            if let Some(b) = board.block_mut(*id) {
                b.visited = false;
            }
        }
    }
    result
}

/// Iterative depth-first walk over same-kind 4-neighbours, marking `visited`.
fn expand(
    board: &mut Board,
    start: BlockId,
    sx: i32,
    sy: i32,
    kind: BlockType,
) -> Vec<(BlockId, i32, i32)> {
    let mut component = Vec::new();
    let mut stack = vec![(start, sx, sy)];
    if let Some(b) = board.block_mut(start) {
        b.visited = true;
    }
    while let Some((id, x, y)) = stack.pop() {
        component.push((id, x, y));
        for (dx, dy) in NEIGHBOURS_4 {
            let (nx, ny) = (x + dx, y + dy);
            let Some((nid, nkind)) = matchable(board, nx, ny) else {
                continue;
            };
            if nkind != kind {
                continue;
            }
            if let Some(n) = board.block_mut(nid) {
                if !n.visited {
                    n.visited = true;
                    stack.push((nid, nx, ny));
                }
            }
        }
    }
    component
}

fn adjacent_ice(board: &Board, groups: &[MatchGroup]) -> Vec<BlockId> {
    let mut ice = Vec::new();
    for id in groups.iter().flat_map(|g| g.blocks.iter()) {
        let Some(b) = board.block(*id) else {
            continue;
        };
        for (dx, dy) in NEIGHBOURS_4 {
            let Some(nid) = board.grid().get(b.x + dx, b.y + dy) else {
                continue;
            };
            let is_ice = board
                .block(nid)
                .map(|n| n.kind == BlockType::Ice && n.is_stationary())
                .unwrap_or(false);
            if is_ice && !ice.contains(&nid) {
                ice.push(nid);
            }
        }
    }
    ice
}
