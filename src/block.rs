use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::GameSettings;

pub const LINK_LEFT: u8 = 0b0001;
pub const LINK_TOP: u8 = 0b0010;
pub const LINK_RIGHT: u8 = 0b0100;
pub const LINK_BOTTOM: u8 = 0b1000;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    Empty,
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Ice,
}

impl BlockType {
    pub const COLORS: [BlockType; 5] = [
        BlockType::Red,
        BlockType::Green,
        BlockType::Blue,
        BlockType::Yellow,
        BlockType::Purple,
    ];

    /// Digit used by layout files and on the wire.
    pub fn digit(self) -> u8 {
        match self {
            BlockType::Empty => 0,
            BlockType::Red => 1,
            BlockType::Green => 2,
            BlockType::Blue => 3,
            BlockType::Yellow => 4,
            BlockType::Purple => 5,
            BlockType::Ice => 6,
        }
    }

    pub fn from_digit(d: u8) -> Option<BlockType> {
        match d {
            0 => Some(BlockType::Empty),
            1 => Some(BlockType::Red),
            2 => Some(BlockType::Green),
            3 => Some(BlockType::Blue),
            4 => Some(BlockType::Yellow),
            5 => Some(BlockType::Purple),
            6 => Some(BlockType::Ice),
            _ => None,
        }
    }

    /// True for the five matchable colors.
    pub fn is_color(self) -> bool {
        !matches!(self, BlockType::Empty | BlockType::Ice)
    }

    pub fn random_color<R: Rng + ?Sized>(rng: &mut R, color_count: u8) -> BlockType {
        let n = (color_count as usize).clamp(1, Self::COLORS.len());
        Self::COLORS[rng.gen_range(0..n)]
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Part of the active falling piece.
    Playing,
    Effecting,
    Stationary,
    Destroying,
    PlayOut,
    DownMoving,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectStage {
    Compress,
    Expand,
}

/// What a lifecycle step changed, for the board to act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTick {
    Idle,
    Settled,
    PlayedOut,
    Landed { x: i32, y: i32 },
}

#[derive(Clone, Debug)]
pub struct Block {
    pub kind: BlockType,
    pub state: BlockState,
    pub x: i32,
    pub y: i32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub links: u8,
    pub visited: bool,
    pub owner: u32,
    timer: u32,
    stage: EffectStage,
    target_y: Option<i32>,
}

impl Block {
    pub fn new(kind: BlockType, owner: u32, x: i32, y: i32) -> Self {
        Self {
            kind,
            state: BlockState::Stationary,
            x,
            y,
            pos_x: x as f32,
            pos_y: y as f32,
            links: 0,
            visited: false,
            owner,
            timer: 0,
            stage: EffectStage::Compress,
            target_y: None,
        }
    }

    pub fn playing(kind: BlockType, owner: u32, x: i32, y: i32) -> Self {
        Self {
            state: BlockState::Playing,
            ..Self::new(kind, owner, x, y)
        }
    }

    pub fn is_stationary(&self) -> bool {
        self.state == BlockState::Stationary
    }

    pub fn effect_stage(&self) -> Option<EffectStage> {
        (self.state == BlockState::Effecting).then_some(self.stage)
    }

    /// Snap float position onto whole cells and record the grid coordinates.
    pub fn snap_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
        self.pos_x = x as f32;
        self.pos_y = y as f32;
    }

    pub fn begin_effect(&mut self) {
        self.state = BlockState::Effecting;
        self.stage = EffectStage::Compress;
        self.timer = 0;
    }

    pub fn begin_destroy(&mut self) {
        self.state = BlockState::Destroying;
        self.timer = 0;
        self.links = 0;
    }

    pub fn begin_fall(&mut self, target_y: i32) {
        self.state = BlockState::DownMoving;
        self.target_y = Some(target_y);
        self.links = 0;
    }

    /// Advance one tick of the lifecycle state machine.
    pub fn tick(&mut self, settings: &GameSettings) -> BlockTick {
        match self.state {
            BlockState::Effecting => {
                self.timer += 1;
                let half = (settings.effect_ticks / 2).max(1);
                if self.stage == EffectStage::Compress && self.timer >= half {
                    self.stage = EffectStage::Expand;
                    self.timer = 0;
                } else if self.stage == EffectStage::Expand && self.timer >= half {
                    self.state = BlockState::Stationary;
                    self.timer = 0;
                    return BlockTick::Settled;
                }
                BlockTick::Idle
            }
            BlockState::Destroying => {
                self.timer += 1;
                if self.timer >= settings.destroy_ticks {
                    self.state = BlockState::PlayOut;
                    return BlockTick::PlayedOut;
                }
                BlockTick::Idle
            }
            BlockState::DownMoving => {
                let Some(target) = self.target_y else {
                    self.state = BlockState::Stationary;
                    return BlockTick::Settled;
                };
                let remaining = target as f32 - self.pos_y;
                let speed = (remaining * settings.drop_factor).max(settings.drop_min_speed);
                self.pos_y += speed;
                if self.pos_y >= target as f32 {
                    self.snap_to(self.x, target);
                    self.target_y = None;
                    self.state = BlockState::Stationary;
                    return BlockTick::Landed { x: self.x, y: target };
                }
                BlockTick::Idle
            }
            BlockState::Playing | BlockState::Stationary | BlockState::PlayOut => BlockTick::Idle,
        }
    }
}
