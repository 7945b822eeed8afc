use serde::{Deserialize, Serialize};

use crate::config::{GameSettings, WIDTH};

/// Raw key state for one frame, as handed over by the host.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct InputFrame {
    pub left: bool,
    pub right: bool,
    pub soft_drop: bool,
    pub rotate: bool,
    pub quit: bool,
}

/// What the local piece should do this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Actions {
    /// Signed cell count, negative is left.
    pub shift: i32,
    pub rotate: bool,
    pub soft_drop: bool,
    pub quit: bool,
}

/// Turns held keys into actions: DAS/ARR for sideways movement, edge-triggered
/// rotate and quit.
#[derive(Debug, Default)]
pub struct Controller {
    inputs: InputFrame,
    last_dir: i32,
    das_timer: f32,
    arr_timer: f32,
    shifted_initial: bool,
    last_rotate: bool,
    last_quit: bool,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_inputs(&mut self, incoming: InputFrame) {
        self.inputs = incoming;
    }

    pub fn inputs(&self) -> InputFrame {
        self.inputs
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn take_rotate(&mut self) -> bool {
        let fire = self.inputs.rotate && !self.last_rotate;
        self.last_rotate = self.inputs.rotate;
        fire
    }

    fn take_quit(&mut self) -> bool {
        let fire = self.inputs.quit && !self.last_quit;
        self.last_quit = self.inputs.quit;
        fire
    }

    pub fn poll(&mut self, dt_ms: f32, settings: &GameSettings) -> Actions {
        let dir = match (self.inputs.left, self.inputs.right) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        if dir != self.last_dir {
            self.das_timer = 0.0;
            self.arr_timer = 0.0;
            self.shifted_initial = false;
            self.last_dir = dir;
        }

        let mut shifts = 0;
        if dir != 0 {
            if !self.shifted_initial {
                shifts += 1;
                self.shifted_initial = true;
            }
            self.das_timer += dt_ms;
            if self.das_timer >= settings.das as f32 {
                self.arr_timer += dt_ms;
                let step = settings.arr.max(1) as f32;
                while self.arr_timer >= step && shifts < WIDTH as i32 {
                    shifts += 1;
                    self.arr_timer -= step;
                }
            }
        }

        Actions {
            shift: shifts * dir,
            rotate: self.take_rotate(),
            soft_drop: self.inputs.soft_drop,
            quit: self.take_quit(),
        }
    }
}
