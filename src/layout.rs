//! Debug board layouts: one line per row, one digit per cell.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::block::BlockType;
use crate::board::Board;
use crate::config::{HEIGHT, WIDTH};

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read layout file: {0}")]
    Io(#[from] std::io::Error),
    #[error("layout has {0} rows, at most {max} fit", max = HEIGHT)]
    TooManyRows(usize),
    #[error("row {row} has {len} cells, expected {width}", width = WIDTH)]
    RowWidth { row: usize, len: usize },
    #[error("invalid cell {ch:?} at row {row}, column {col}")]
    BadCell { row: usize, col: usize, ch: char },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    rows: Vec<[BlockType; WIDTH]>,
}

impl Layout {
    /// Blank lines are skipped. Short layouts sit on the floor.
    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let mut rows = Vec::new();
        for (row, line) in text.lines().map(str::trim).filter(|l| !l.is_empty()).enumerate() {
            let len = line.chars().count();
            if len != WIDTH {
                return Err(LayoutError::RowWidth { row, len });
            }
            let mut cells = [BlockType::Empty; WIDTH];
            for (col, ch) in line.chars().enumerate() {
                cells[col] = ch
                    .to_digit(10)
                    .and_then(|d| BlockType::from_digit(d as u8))
                    .ok_or(LayoutError::BadCell { row, col, ch })?;
            }
            rows.push(cells);
        }
        if rows.len() > HEIGHT {
            return Err(LayoutError::TooManyRows(rows.len()));
        }
        Ok(Self { rows })
    }

    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn rows(&self) -> &[[BlockType; WIDTH]] {
        &self.rows
    }

    /// Replace the board contents with this layout. Returns blocks placed.
    pub fn apply(&self, board: &mut Board) -> usize {
        board.clear();
        let offset = HEIGHT - self.rows.len();
        let mut placed = 0;
        for (r, cells) in self.rows.iter().enumerate() {
            for (x, kind) in cells.iter().enumerate() {
                if board.place_stationary(*kind, x as i32, (offset + r) as i32).is_some() {
                    placed += 1;
                }
            }
        }
        board.refresh_links();
        debug!(owner = board.owner(), placed, "layout applied");
        placed
    }
}
