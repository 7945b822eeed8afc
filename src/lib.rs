use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use web_sys::console;

pub mod arena;
pub mod block;
pub mod board;
pub mod config;
pub mod grid;
pub mod input;
pub mod interrupt;
pub mod layout;
pub mod matcher;
pub mod piece;
pub mod player;
pub mod protocol;
pub mod relay;
pub mod score;
pub mod session;
pub mod sync;
pub mod view;

pub use block::{Block, BlockState, BlockType};
pub use board::Board;
pub use config::{GameSettings, SettingsError};
pub use input::InputFrame;
pub use layout::{Layout, LayoutError};
pub use player::{Phase, PlayerOrchestrator, Role};
pub use protocol::{FrameReader, Packet, ProtocolError};
pub use session::{Session, SessionState};

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
}

fn log(msg: &str) {
    console::log_1(&JsValue::from_str(msg));
}

/// Browser handle on one [`Session`]. The page owns the socket: it feeds received
/// bytes in and ships whatever `drainOutbound` returns.
#[wasm_bindgen]
pub struct GameClient {
    session: Session,
}

#[wasm_bindgen]
impl GameClient {
    #[wasm_bindgen(constructor)]
    pub fn new(settings: JsValue, player_id: u32, seed: Option<u32>) -> Result<GameClient, JsValue> {
        let settings = match from_value::<GameSettings>(settings) {
            Ok(s) => match s.validate() {
                Ok(()) => s,
                Err(e) => {
                    log(&format!("[settings] rejected, using defaults: {e}"));
                    GameSettings::default()
                }
            },
            Err(e) => {
                log(&format!("[settings] using defaults: {e}"));
                GameSettings::default()
            }
        };
        Ok(Self {
            session: Session::new(settings, player_id, seed.map(u64::from)),
        })
    }

    #[wasm_bindgen(js_name = initialize)]
    pub fn initialize(&mut self, map_id: u32, character_id: u32) {
        self.session.initialize(map_id, character_id);
    }

    #[wasm_bindgen(js_name = tick)]
    pub fn tick(&mut self, dt_ms: f32) -> Result<JsValue, JsValue> {
        self.session.tick(dt_ms);
        to_value(&self.session.snapshot()).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = setInput)]
    pub fn set_input(&mut self, input: JsValue) -> Result<(), JsValue> {
        let parsed: InputFrame = from_value(input)?;
        self.session.set_input(parsed);
        Ok(())
    }

    #[wasm_bindgen(js_name = receive)]
    pub fn receive(&mut self, bytes: &[u8]) {
        self.session.receive(bytes);
    }

    /// Encoded frames queued since the last call, one `Uint8Array` each.
    #[wasm_bindgen(js_name = drainOutbound)]
    pub fn drain_outbound(&mut self) -> js_sys::Array {
        self.session
            .drain_outbound()
            .iter()
            .map(|frame| js_sys::Uint8Array::from(&frame[..]))
            .collect()
    }

    #[wasm_bindgen(js_name = sendChat)]
    pub fn send_chat(&mut self, message: &str) {
        self.session.send_chat(message);
    }

    #[wasm_bindgen(js_name = restart)]
    pub fn restart(&mut self) {
        self.session.restart();
    }

    #[wasm_bindgen(js_name = quit)]
    pub fn quit(&mut self) {
        self.session.quit();
    }

    #[wasm_bindgen(js_name = disconnect)]
    pub fn disconnect(&mut self) {
        log("[net] connection closed");
        self.session.disconnect();
    }

    #[wasm_bindgen(js_name = outcome)]
    pub fn outcome(&self) -> Option<bool> {
        self.session.outcome()
    }

    #[wasm_bindgen(js_name = loadLayout)]
    pub fn load_layout(&mut self, text: &str) -> Result<u32, JsValue> {
        let placed = self
            .session
            .load_layout(text)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        log(&format!("[layout] placed {placed} blocks"));
        Ok(placed as u32)
    }
}
