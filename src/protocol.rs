//! Wire format: `size: u32 | type: u16 | payload`, little-endian, packed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;

use crate::block::BlockType;
use crate::interrupt::{IcePlacement, MAX_PARTIAL};
use crate::piece::{Direction, Orientation};
use crate::player::Phase;

pub const HEADER_LEN: usize = 6;
pub const MAX_FRAME_LEN: usize = 1024;
/// Chat buffer including the terminating NUL.
pub const CHAT_LEN: usize = 151;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("frame declares {0} bytes, shorter than its own header")]
    Undersized(u32),
    #[error("frame declares {0} bytes, above the {max} byte limit", max = MAX_FRAME_LEN)]
    Oversized(u32),
    #[error("no handler for packet type {0}")]
    UnknownType(u16),
    #[error("packet type {ty} expects {expected} payload bytes, got {actual}")]
    PayloadSize {
        ty: u16,
        expected: usize,
        actual: usize,
    },
    #[error("invalid {field} value {value} in packet type {ty}")]
    InvalidField {
        ty: u16,
        field: &'static str,
        value: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum PacketType {
    InitializeGame = 1,
    Move = 2,
    Rotate = 3,
    PushBlockInGame = 4,
    ChangeBlockState = 5,
    AttackInterrupt = 6,
    DefenseInterrupt = 7,
    AddInterruptBlock = 8,
    FallingBlock = 9,
    Chat = 10,
    LoseGame = 11,
    StopCombo = 12,
    RestartGame = 13,
    CheckBlockState = 14,
    NewGroupBlock = 15,
}

impl PacketType {
    pub fn from_u16(v: u16) -> Option<PacketType> {
        use PacketType::*;
        Some(match v {
            1 => InitializeGame,
            2 => Move,
            3 => Rotate,
            4 => PushBlockInGame,
            5 => ChangeBlockState,
            6 => AttackInterrupt,
            7 => DefenseInterrupt,
            8 => AddInterruptBlock,
            9 => FallingBlock,
            10 => Chat,
            11 => LoseGame,
            12 => StopCombo,
            13 => RestartGame,
            14 => CheckBlockState,
            15 => NewGroupBlock,
            _ => return None,
        })
    }

    /// Fixed payload length, `player_id` included.
    pub fn payload_len(self) -> usize {
        use PacketType::*;
        match self {
            InitializeGame => 16,
            Move => 9,
            Rotate => 6,
            PushBlockInGame => 20,
            ChangeBlockState => 5,
            AttackInterrupt | DefenseInterrupt => 15,
            AddInterruptBlock => 11,
            FallingBlock => 6,
            Chat => 4 + CHAT_LEN,
            LoseGame | StopCombo | CheckBlockState => 4,
            RestartGame => 8,
            NewGroupBlock => 6,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InitializeGame {
    pub player_id: u32,
    pub map_id: u32,
    pub character_id: u32,
    pub block1: [BlockType; 2],
    pub block2: [BlockType; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct Move {
    pub player_id: u32,
    pub direction: Direction,
    pub position: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Rotate {
    pub player_id: u32,
    pub orientation: Orientation,
    pub is_horizontal_moving: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushBlockInGame {
    pub player_id: u32,
    pub positions: [[f32; 2]; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeBlockState {
    pub player_id: u32,
    pub phase: Phase,
}

/// Shared shape of attack and defense notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct Interrupt {
    pub player_id: u32,
    pub count: i16,
    pub x: f32,
    pub y: f32,
    pub block_type: BlockType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AddInterruptBlock {
    pub player_id: u32,
    pub placement: IcePlacement,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FallingBlock {
    pub player_id: u32,
    pub falling_index: u8,
    pub is_falling: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Chat {
    pub player_id: u32,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RestartGame {
    pub player_id: u32,
    pub block1: [BlockType; 2],
    pub block2: [BlockType; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewGroupBlock {
    pub player_id: u32,
    pub blocks: [BlockType; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    InitializeGame(InitializeGame),
    Move(Move),
    Rotate(Rotate),
    PushBlockInGame(PushBlockInGame),
    ChangeBlockState(ChangeBlockState),
    AttackInterrupt(Interrupt),
    DefenseInterrupt(Interrupt),
    AddInterruptBlock(AddInterruptBlock),
    FallingBlock(FallingBlock),
    Chat(Chat),
    LoseGame { player_id: u32 },
    StopCombo { player_id: u32 },
    RestartGame(RestartGame),
    CheckBlockState { player_id: u32 },
    NewGroupBlock(NewGroupBlock),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::InitializeGame(_) => PacketType::InitializeGame,
            Packet::Move(_) => PacketType::Move,
            Packet::Rotate(_) => PacketType::Rotate,
            Packet::PushBlockInGame(_) => PacketType::PushBlockInGame,
            Packet::ChangeBlockState(_) => PacketType::ChangeBlockState,
            Packet::AttackInterrupt(_) => PacketType::AttackInterrupt,
            Packet::DefenseInterrupt(_) => PacketType::DefenseInterrupt,
            Packet::AddInterruptBlock(_) => PacketType::AddInterruptBlock,
            Packet::FallingBlock(_) => PacketType::FallingBlock,
            Packet::Chat(_) => PacketType::Chat,
            Packet::LoseGame { .. } => PacketType::LoseGame,
            Packet::StopCombo { .. } => PacketType::StopCombo,
            Packet::RestartGame(_) => PacketType::RestartGame,
            Packet::CheckBlockState { .. } => PacketType::CheckBlockState,
            Packet::NewGroupBlock(_) => PacketType::NewGroupBlock,
        }
    }

    pub fn player_id(&self) -> u32 {
        match self {
            Packet::InitializeGame(p) => p.player_id,
            Packet::Move(p) => p.player_id,
            Packet::Rotate(p) => p.player_id,
            Packet::PushBlockInGame(p) => p.player_id,
            Packet::ChangeBlockState(p) => p.player_id,
            Packet::AttackInterrupt(p) | Packet::DefenseInterrupt(p) => p.player_id,
            Packet::AddInterruptBlock(p) => p.player_id,
            Packet::FallingBlock(p) => p.player_id,
            Packet::Chat(p) => p.player_id,
            Packet::LoseGame { player_id }
            | Packet::StopCombo { player_id }
            | Packet::CheckBlockState { player_id } => *player_id,
            Packet::RestartGame(p) => p.player_id,
            Packet::NewGroupBlock(p) => p.player_id,
        }
    }

    /// Complete frame, header included.
    pub fn encode(&self) -> Bytes {
        let ty = self.packet_type();
        let size = HEADER_LEN + ty.payload_len();
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u32_le(size as u32);
        buf.put_u16_le(ty as u16);
        buf.put_u32_le(self.player_id());
        match self {
            Packet::InitializeGame(p) => {
                buf.put_u32_le(p.map_id);
                buf.put_u32_le(p.character_id);
                put_blocks(&mut buf, p.block1);
                put_blocks(&mut buf, p.block2);
            }
            Packet::Move(p) => {
                buf.put_u8(p.direction as u8);
                buf.put_f32_le(p.position);
            }
            Packet::Rotate(p) => {
                buf.put_u8(p.orientation as u8);
                buf.put_u8(p.is_horizontal_moving as u8);
            }
            Packet::PushBlockInGame(p) => {
                for pos in p.positions {
                    buf.put_f32_le(pos[0]);
                    buf.put_f32_le(pos[1]);
                }
            }
            Packet::ChangeBlockState(p) => buf.put_u8(p.phase as u8),
            Packet::AttackInterrupt(p) | Packet::DefenseInterrupt(p) => {
                buf.put_i16_le(p.count);
                buf.put_f32_le(p.x);
                buf.put_f32_le(p.y);
                buf.put_u8(p.block_type.digit());
            }
            Packet::AddInterruptBlock(p) => {
                buf.put_u8(p.placement.rows);
                buf.put_u8(p.placement.columns.len().min(MAX_PARTIAL) as u8);
                buf.put_slice(&p.placement.wire_indices());
            }
            Packet::FallingBlock(p) => {
                buf.put_u8(p.falling_index);
                buf.put_u8(p.is_falling as u8);
            }
            Packet::Chat(p) => buf.put_slice(&chat_buffer(&p.message)),
            Packet::LoseGame { .. } | Packet::StopCombo { .. } | Packet::CheckBlockState { .. } => {}
            Packet::RestartGame(p) => {
                put_blocks(&mut buf, p.block1);
                put_blocks(&mut buf, p.block2);
            }
            Packet::NewGroupBlock(p) => put_blocks(&mut buf, p.blocks),
        }
        buf.freeze()
    }

    pub fn decode(type_tag: u16, payload: &[u8]) -> Result<Packet, ProtocolError> {
        let ty = PacketType::from_u16(type_tag).ok_or(ProtocolError::UnknownType(type_tag))?;
        if payload.len() != ty.payload_len() {
            return Err(ProtocolError::PayloadSize {
                ty: type_tag,
                expected: ty.payload_len(),
                actual: payload.len(),
            });
        }
        let mut buf = payload;
        let player_id = buf.get_u32_le();
        let packet = match ty {
            PacketType::InitializeGame => Packet::InitializeGame(InitializeGame {
                player_id,
                map_id: buf.get_u32_le(),
                character_id: buf.get_u32_le(),
                block1: get_blocks(&mut buf, type_tag)?,
                block2: get_blocks(&mut buf, type_tag)?,
            }),
            PacketType::Move => {
                let raw = buf.get_u8();
                let direction = Direction::from_wire(raw)
                    .ok_or_else(|| invalid(type_tag, "move_type", raw))?;
                Packet::Move(Move {
                    player_id,
                    direction,
                    position: buf.get_f32_le(),
                })
            }
            PacketType::Rotate => {
                let raw = buf.get_u8();
                let orientation = Orientation::from_wire(raw)
                    .ok_or_else(|| invalid(type_tag, "rotate_type", raw))?;
                Packet::Rotate(Rotate {
                    player_id,
                    orientation,
                    is_horizontal_moving: buf.get_u8() != 0,
                })
            }
            PacketType::PushBlockInGame => {
                let mut positions = [[0.0f32; 2]; 2];
                for pos in positions.iter_mut() {
                    pos[0] = buf.get_f32_le();
                    pos[1] = buf.get_f32_le();
                }
                Packet::PushBlockInGame(PushBlockInGame {
                    player_id,
                    positions,
                })
            }
            PacketType::ChangeBlockState => {
                let raw = buf.get_u8();
                let phase = Phase::from_wire(raw).ok_or_else(|| invalid(type_tag, "state", raw))?;
                Packet::ChangeBlockState(ChangeBlockState { player_id, phase })
            }
            PacketType::AttackInterrupt | PacketType::DefenseInterrupt => {
                let count = buf.get_i16_le();
                let x = buf.get_f32_le();
                let y = buf.get_f32_le();
                let raw = buf.get_u8();
                let block_type = BlockType::from_digit(raw)
                    .ok_or_else(|| invalid(type_tag, "block_type", raw))?;
                let body = Interrupt {
                    player_id,
                    count,
                    x,
                    y,
                    block_type,
                };
                if ty == PacketType::AttackInterrupt {
                    Packet::AttackInterrupt(body)
                } else {
                    Packet::DefenseInterrupt(body)
                }
            }
            PacketType::AddInterruptBlock => {
                let rows = buf.get_u8();
                let x_count = buf.get_u8();
                let mut indices = [0u8; MAX_PARTIAL];
                buf.copy_to_slice(&mut indices);
                Packet::AddInterruptBlock(AddInterruptBlock {
                    player_id,
                    placement: IcePlacement::from_wire(rows, x_count, indices),
                })
            }
            PacketType::FallingBlock => Packet::FallingBlock(FallingBlock {
                player_id,
                falling_index: buf.get_u8(),
                is_falling: buf.get_u8() != 0,
            }),
            PacketType::Chat => {
                let raw = &buf[..CHAT_LEN];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(CHAT_LEN);
                Packet::Chat(Chat {
                    player_id,
                    message: String::from_utf8_lossy(&raw[..end]).into_owned(),
                })
            }
            PacketType::LoseGame => Packet::LoseGame { player_id },
            PacketType::StopCombo => Packet::StopCombo { player_id },
            PacketType::CheckBlockState => Packet::CheckBlockState { player_id },
            PacketType::RestartGame => Packet::RestartGame(RestartGame {
                player_id,
                block1: get_blocks(&mut buf, type_tag)?,
                block2: get_blocks(&mut buf, type_tag)?,
            }),
            PacketType::NewGroupBlock => Packet::NewGroupBlock(NewGroupBlock {
                player_id,
                blocks: get_blocks(&mut buf, type_tag)?,
            }),
        };
        Ok(packet)
    }
}

fn invalid(ty: u16, field: &'static str, value: u8) -> ProtocolError {
    ProtocolError::InvalidField {
        ty,
        field,
        value: value as u32,
    }
}

fn put_blocks(buf: &mut BytesMut, blocks: [BlockType; 2]) {
    buf.put_u8(blocks[0].digit());
    buf.put_u8(blocks[1].digit());
}

fn get_blocks(buf: &mut &[u8], ty: u16) -> Result<[BlockType; 2], ProtocolError> {
    let mut out = [BlockType::Empty; 2];
    for slot in out.iter_mut() {
        let raw = buf.get_u8();
        *slot = BlockType::from_digit(raw).ok_or_else(|| invalid(ty, "block", raw))?;
    }
    Ok(out)
}

/// Fixed chat buffer: message truncated on a char boundary, NUL-terminated, zero-padded.
fn chat_buffer(message: &str) -> [u8; CHAT_LEN] {
    let mut out = [0u8; CHAT_LEN];
    let mut end = message.len().min(CHAT_LEN - 1);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    out[..end].copy_from_slice(&message.as_bytes()[..end]);
    out
}

/// One complete frame as received, kept raw so a relay can forward it unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub packet_type: u16,
    pub bytes: Bytes,
}

impl Frame {
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    pub fn decode(&self) -> Result<Packet, ProtocolError> {
        Packet::decode(self.packet_type, self.payload())
    }
}

/// Accumulates stream bytes and cuts them into frames, keeping any partial tail.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// `None` until a whole frame is buffered. A frame whose declared size can never be
    /// valid poisons the stream position, so the buffer is discarded with the error.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let mut head = &self.buf[..HEADER_LEN];
        let size = head.get_u32_le();
        let packet_type = head.get_u16_le();
        if (size as usize) < HEADER_LEN {
            self.buf.clear();
            return Some(Err(ProtocolError::Undersized(size)));
        }
        if size as usize > MAX_FRAME_LEN {
            self.buf.clear();
            return Some(Err(ProtocolError::Oversized(size)));
        }
        if self.buf.len() < size as usize {
            return None;
        }
        let bytes = self.buf.split_to(size as usize).freeze();
        Some(Ok(Frame { packet_type, bytes }))
    }

    /// Every complete frame buffered so far; malformed ones are logged and dropped.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(next) = self.next_frame() {
            match next {
                Ok(frame) => frames.push(frame),
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packets() -> Vec<Packet> {
        vec![
            Packet::InitializeGame(InitializeGame {
                player_id: 2,
                map_id: 7,
                character_id: 3,
                block1: [BlockType::Red, BlockType::Blue],
                block2: [BlockType::Green, BlockType::Green],
            }),
            Packet::Move(Move {
                player_id: 2,
                direction: Direction::Left,
                position: 1.0,
            }),
            Packet::AttackInterrupt(Interrupt {
                player_id: 1,
                count: 12,
                x: 2.0,
                y: 11.0,
                block_type: BlockType::Ice,
            }),
            Packet::AddInterruptBlock(AddInterruptBlock {
                player_id: 1,
                placement: IcePlacement {
                    rows: 2,
                    columns: vec![1, 4],
                },
            }),
            Packet::Chat(Chat {
                player_id: 1,
                message: "gg".into(),
            }),
            Packet::StopCombo { player_id: 9 },
        ]
    }

    #[test]
    fn frames_carry_total_size_and_type() {
        let bytes = Packet::CheckBlockState { player_id: 5 }.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        assert_eq!(&bytes[..6], &[10, 0, 0, 0, 14, 0]);
        assert_eq!(&bytes[6..], &[5, 0, 0, 0]);
    }

    #[test]
    fn reader_reassembles_split_stream() {
        let mut stream = Vec::new();
        for p in sample_packets() {
            stream.extend_from_slice(&p.encode());
        }
        let mut reader = FrameReader::new();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(7) {
            reader.extend(chunk);
            for frame in reader.drain() {
                decoded.push(frame.decode().unwrap());
            }
        }
        assert_eq!(decoded, sample_packets());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn reader_waits_when_size_exceeds_buffer() {
        let frame = Packet::LoseGame { player_id: 1 }.encode();
        let mut reader = FrameReader::new();
        reader.extend(&frame[..frame.len() - 1]);
        assert!(reader.next_frame().is_none());
        assert_eq!(reader.buffered(), frame.len() - 1);
        reader.extend(&frame[frame.len() - 1..]);
        assert!(matches!(reader.next_frame(), Some(Ok(_))));
    }

    #[test]
    fn undersized_frame_is_rejected() {
        let mut reader = FrameReader::new();
        reader.extend(&[2, 0, 0, 0, 1, 0, 9, 9]);
        assert_eq!(reader.next_frame(), Some(Err(ProtocolError::Undersized(2))));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn unknown_type_and_bad_payload_fail_decode() {
        assert_eq!(
            Packet::decode(99, &[0, 0, 0, 0]),
            Err(ProtocolError::UnknownType(99))
        );
        assert!(matches!(
            Packet::decode(PacketType::Move as u16, &[0; 3]),
            Err(ProtocolError::PayloadSize { .. })
        ));
        let mut bad = vec![1, 0, 0, 0, 9];
        bad.extend_from_slice(&0f32.to_le_bytes());
        assert!(matches!(
            Packet::decode(PacketType::Move as u16, &bad),
            Err(ProtocolError::InvalidField { field: "move_type", .. })
        ));
    }

    #[test]
    fn chat_is_truncated_and_nul_terminated() {
        let long = "é".repeat(200);
        let bytes = Packet::Chat(Chat {
            player_id: 1,
            message: long,
        })
        .encode();
        assert_eq!(bytes.len(), HEADER_LEN + 4 + CHAT_LEN);
        assert_eq!(bytes[bytes.len() - 1], 0);
        let Packet::Chat(chat) = Packet::decode(PacketType::Chat as u16, &bytes[HEADER_LEN..]).unwrap()
        else {
            panic!("expected chat");
        };
        assert_eq!(chat.message.chars().count(), 75);
    }
}
