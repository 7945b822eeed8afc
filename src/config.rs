use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Board width in cells.
pub const WIDTH: usize = 6;
/// Board height in cells; row 0 is the top.
pub const HEIGHT: usize = 13;
/// Smallest connected group that shatters.
pub const MIN_MATCH: usize = 4;
/// Interrupt blocks dropped at most per ice phase (five full rows).
pub const MAX_ICE_ROWS: usize = 5;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("color count must be between 3 and 5, got {0}")]
    ColorCount(u8),
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub enum SoftDropSpeed {
    Slow,
    Medium,
    Fast,
    Ultra,
}

impl SoftDropSpeed {
    /// Extra cells per tick added to the fall velocity while soft drop is held.
    pub fn add_velocity(self) -> f32 {
        match self {
            SoftDropSpeed::Slow => 0.15,
            SoftDropSpeed::Medium => 0.3,
            SoftDropSpeed::Fast => 0.5,
            SoftDropSpeed::Ultra => 0.9,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct GameSettings {
    /// Delayed auto shift, ms.
    pub das: u32,
    /// Auto repeat rate, ms.
    pub arr: u32,
    pub soft_drop: SoftDropSpeed,
    /// Gravity in cells per tick.
    pub fall_velocity: f32,
    pub rotate_step_degrees: f32,
    pub effect_ticks: u32,
    pub destroy_ticks: u32,
    pub drop_min_speed: f32,
    pub drop_factor: f32,
    pub color_count: u8,
    /// Countdown before the first piece, ms.
    pub start_delay_ms: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            das: 150,
            arr: 50,
            soft_drop: SoftDropSpeed::Medium,
            fall_velocity: 0.04,
            rotate_step_degrees: 30.0,
            effect_ticks: 8,
            destroy_ticks: 24,
            drop_min_speed: 0.2,
            drop_factor: 0.15,
            color_count: 5,
            start_delay_ms: 3000,
        }
    }
}

impl GameSettings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: GameSettings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(3..=5).contains(&self.color_count) {
            return Err(SettingsError::ColorCount(self.color_count));
        }
        // Each of these moves an animation forward; zero would stall it forever.
        let speeds = [
            ("fall_velocity", self.fall_velocity),
            ("rotate_step_degrees", self.rotate_step_degrees),
            ("drop_min_speed", self.drop_min_speed),
        ];
        for (field, value) in speeds {
            if value.is_nan() || value <= 0.0 {
                return Err(SettingsError::NonPositive { field, value });
            }
        }
        if self.drop_factor < 0.0 {
            return Err(SettingsError::NonPositive {
                field: "drop_factor",
                value: self.drop_factor,
            });
        }
        Ok(())
    }
}
