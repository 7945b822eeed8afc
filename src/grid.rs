use crate::arena::BlockId;
use crate::config::{HEIGHT, WIDTH};

const OVERLAP_EPSILON: f32 = 1e-3;

/// Axis-aligned one-cell rectangle in cell units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn cell(x: f32, y: f32) -> Self {
        Self { x, y, w: 1.0, h: 1.0 }
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.x + other.w - OVERLAP_EPSILON
            && other.x < self.x + self.w - OVERLAP_EPSILON
            && self.y < other.y + other.h - OVERLAP_EPSILON
            && other.y < self.y + self.h - OVERLAP_EPSILON
    }

    /// Outside the side walls or below the floor. Above the top is open.
    pub fn outside_board(&self) -> bool {
        self.x < -OVERLAP_EPSILON
            || self.x + self.w > WIDTH as f32 + OVERLAP_EPSILON
            || self.y + self.h > HEIGHT as f32 + OVERLAP_EPSILON
    }
}

/// Non-owning slot references into the block arena, row-major.
#[derive(Clone, Debug)]
pub struct BoardGrid {
    slots: Vec<Option<BlockId>>,
}

impl Default for BoardGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardGrid {
    pub fn new() -> Self {
        Self {
            slots: vec![None; WIDTH * HEIGHT],
        }
    }

    pub fn in_bounds(x: i32, y: i32) -> bool {
        x >= 0 && x < WIDTH as i32 && y >= 0 && y < HEIGHT as i32
    }

    pub fn index(x: i32, y: i32) -> Option<usize> {
        Self::in_bounds(x, y).then(|| y as usize * WIDTH + x as usize)
    }

    pub fn coords(index: usize) -> (i32, i32) {
        ((index % WIDTH) as i32, (index / WIDTH) as i32)
    }

    pub fn get(&self, x: i32, y: i32) -> Option<BlockId> {
        Self::index(x, y).and_then(|i| self.slots[i])
    }

    pub fn set(&mut self, x: i32, y: i32, id: BlockId) -> bool {
        match Self::index(x, y) {
            Some(i) => {
                self.slots[i] = Some(id);
                true
            }
            None => false,
        }
    }

    pub fn clear_slot(&mut self, x: i32, y: i32) -> Option<BlockId> {
        Self::index(x, y).and_then(|i| self.slots[i].take())
    }

    /// Clear whichever slot holds `id`.
    pub fn forget(&mut self, id: BlockId) {
        for slot in self.slots.iter_mut() {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_cells_do_not_overlap() {
        let a = Rect::cell(1.0, 3.0);
        assert!(!a.overlaps(&Rect::cell(2.0, 3.0)));
        assert!(!a.overlaps(&Rect::cell(1.0, 4.0)));
        assert!(a.overlaps(&Rect::cell(1.0, 3.5)));
    }

    #[test]
    fn open_above_closed_below_and_sides() {
        assert!(!Rect::cell(0.0, -1.0).outside_board());
        assert!(Rect::cell(-1.0, 0.0).outside_board());
        assert!(Rect::cell(WIDTH as f32, 0.0).outside_board());
        assert!(Rect::cell(0.0, HEIGHT as f32 - 0.5).outside_board());
        assert!(!Rect::cell(0.0, HEIGHT as f32 - 1.0).outside_board());
    }

    #[test]
    fn index_is_row_major() {
        assert_eq!(BoardGrid::index(0, 0), Some(0));
        assert_eq!(BoardGrid::index(5, 1), Some(11));
        assert_eq!(BoardGrid::coords(11), (5, 1));
        assert_eq!(BoardGrid::index(6, 0), None);
        assert_eq!(BoardGrid::index(0, -1), None);
    }
}
