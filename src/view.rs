use serde::Serialize;

use crate::block::{Block, BlockState, BlockType};
use crate::config::GameSettings;
use crate::piece::Orientation;
use crate::player::{Phase, PlayerOrchestrator, Role};
use crate::score::ScoreState;
use crate::session::{ChatLine, SessionState};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BlockView {
    pub x: i32,
    pub y: i32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub kind: BlockType,
    pub state: BlockState,
    pub links: u8,
}

impl From<&Block> for BlockView {
    fn from(b: &Block) -> Self {
        Self {
            x: b.x,
            y: b.y,
            pos_x: b.pos_x,
            pos_y: b.pos_y,
            kind: b.kind,
            state: b.state,
            links: b.links,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PieceView {
    pub blocks: Vec<BlockView>,
    pub orientation: Orientation,
    pub sweep_angle: f32,
}

#[derive(Serialize, Debug, Clone)]
pub struct PlayerView {
    pub id: u32,
    pub role: Role,
    pub phase: Phase,
    /// Row-major layout digits of the settled grid.
    pub field: Vec<u8>,
    pub blocks: Vec<BlockView>,
    pub piece: Option<PieceView>,
    pub next: Vec<[BlockType; 2]>,
    pub score: ScoreState,
    pub pending_ice: u32,
}

impl From<&PlayerOrchestrator> for PlayerView {
    fn from(p: &PlayerOrchestrator) -> Self {
        let board = p.board();
        Self {
            id: p.id(),
            role: p.role(),
            phase: p.phase(),
            field: board.digits().into_iter().flatten().collect(),
            blocks: board.arena().iter().map(|(_, b)| BlockView::from(b)).collect(),
            piece: p.piece().map(|piece| PieceView {
                blocks: piece.blocks().iter().map(BlockView::from).collect(),
                orientation: piece.logical_orientation(),
                sweep_angle: piece.sweep_angle(),
            }),
            next: p.next_pairs().copied().collect(),
            score: p.score().clone(),
            pending_ice: p.interrupts().pending,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FrameView {
    pub state: SessionState,
    pub elapsed_ms: u64,
    /// Local player first.
    pub players: Vec<PlayerView>,
    pub chat: Vec<ChatLine>,
    pub settings: GameSettings,
}
