//! Chain scoring and the score → interrupt block conversion.

use serde::Serialize;

use crate::matcher::MatchResult;

pub const BASE_SCORE: u64 = 10;
const COMBO_BONUS_CAP: u64 = 999;

/// (elapsed seconds from which the margin applies, margin).
const MARGIN_STEPS: [(u32, u64); 13] = [
    (0, 70),
    (96, 52),
    (112, 39),
    (128, 29),
    (144, 22),
    (160, 16),
    (176, 12),
    (192, 9),
    (208, 6),
    (224, 4),
    (240, 3),
    (256, 2),
    (272, 1),
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScoreState {
    pub score: u64,
    /// Score not yet converted into interrupt blocks.
    pub rest_score: u64,
    pub combo: u32,
    pub sent: u32,
    pub last_chain_score: u64,
}

impl ScoreState {
    pub fn reset(&mut self) {
        *self = ScoreState::default();
    }
}

/// Outcome of converting one resolution's score into interrupt blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Conversion {
    pub added: u32,
    /// Cancelled against the player's own pending incoming blocks.
    pub defense: u32,
    /// Excess sent to the opponent.
    pub attack: u32,
    pub margin: u64,
}

pub fn combo_bonus(combo: u32) -> u64 {
    match combo {
        0 | 1 => 0,
        2 => 8,
        3 => 16,
        n => (32 * (n as u64 - 3)).min(COMBO_BONUS_CAP),
    }
}

pub fn link_bonus(size: usize) -> u64 {
    match size {
        0..=4 => 0,
        5 => 2,
        6 => 3,
        7 => 4,
        8 => 5,
        9 => 6,
        10 => 7,
        _ => 10,
    }
}

pub fn type_bonus(distinct: usize) -> u64 {
    match distinct {
        0 | 1 => 0,
        2 => 3,
        3 => 6,
        4 => 12,
        _ => 24,
    }
}

pub fn margin(elapsed_ms: u64) -> u64 {
    let secs = elapsed_ms / 1000;
    MARGIN_STEPS
        .iter()
        .rev()
        .find(|(from, _)| secs >= *from as u64)
        .map(|(_, m)| *m)
        .unwrap_or(MARGIN_STEPS[0].1)
}

/// `blocks * BASE_SCORE * (combo + links + types + 1)`.
pub fn chain_score(result: &MatchResult, combo: u32) -> u64 {
    let blocks = result.block_count() as u64;
    let links: u64 = result.groups.iter().map(|g| link_bonus(g.link_count())).sum();
    let bonus = combo_bonus(combo) + links + type_bonus(result.distinct_types()) + 1;
    blocks * BASE_SCORE * bonus
}

/// Fold `points` plus the carried remainder into interrupt blocks, then net them
/// against `pending` before anything is sent.
pub fn convert(state: &mut ScoreState, pending: &mut u32, points: u64, elapsed_ms: u64) -> Conversion {
    let margin = margin(elapsed_ms);
    let total = points + state.rest_score;
    let added = (total / margin).min(u32::MAX as u64) as u32;
    state.rest_score = total % margin;

    let defense = added.min(*pending);
    *pending -= defense;
    let attack = added - defense;
    state.sent = state.sent.saturating_add(attack);
    Conversion {
        added,
        defense,
        attack,
        margin,
    }
}
