//! Payload profiles.
//!
//! A connection speaks exactly one `Profile`, fixed when it joins. Both
//! profiles implement `Codec`, so callers never branch on the format.
//!
//! Binary records (all integers big-endian):
//!
//! | record   | layout                                                        |
//! |----------|---------------------------------------------------------------|
//! | command  | `0x01 id:u32 x:i16 y:i16 angle:f32 type:u8`                   |
//! | client   | `0x02 id:u32 x:i16 y:i16 angle:f32 size:u8 status:u8 visual:u8 frags:u32` |
//! | room     | `0x03 tick:u32` then client and bullet records                |
//! | bullet   | `0x04 id:u32 x:i16 y:i16`                                      |
//! | welcome  | `0x05` then one client record                                  |
//!
//! JSON objects carry a `type` discriminant: `Command`, `ClientState`
//! (the welcome message) and `RoomState`.

use std::{fmt, str::FromStr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::ids::{BulletId, ClientId};

pub const COMMAND_MAGIC: u8 = 0x01;
pub const CLIENT_MAGIC: u8 = 0x02;
pub const ROOM_MAGIC: u8 = 0x03;
pub const BULLET_MAGIC: u8 = 0x04;
pub const WELCOME_MAGIC: u8 = 0x05;

pub const COMMAND_LEN: usize = 14;
pub const CLIENT_RECORD_LEN: usize = 20;
pub const BULLET_RECORD_LEN: usize = 9;
const ROOM_HEADER_LEN: usize = 5;

// Upper bounds of one JSON record with every field at its widest value.
// Binary records are always shorter.
const JSON_CLIENT_RECORD_MAX: usize = 128;
const JSON_BULLET_RECORD_MAX: usize = 48;
const JSON_ROOM_OVERHEAD_MAX: usize = 96;

/// Upper bound on an encoded room state with `clients` players and
/// `bullets` bullets, in either profile.
pub fn max_room_state_len(clients: usize, bullets: usize) -> usize {
    JSON_ROOM_OVERHEAD_MAX
        .saturating_add(clients.saturating_mul(JSON_CLIENT_RECORD_MAX))
        .saturating_add(bullets.saturating_mul(JSON_BULLET_RECORD_MAX))
}

/// Payload format of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Binary,
    Json,
}

impl Profile {
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            Profile::Binary => &BinaryCodec,
            Profile::Json => &JsonCodec,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Binary => write!(f, "binary"),
            Profile::Json => write!(f, "json"),
        }
    }
}

impl FromStr for Profile {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(Profile::Binary),
            "json" => Ok(Profile::Json),
            other => Err(ProtocolError::UnknownProfile(other.to_string())),
        }
    }
}

/// What a command asks for besides the position update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Move,
    Shoot,
}

impl CommandKind {
    pub fn as_u8(self) -> u8 {
        match self {
            CommandKind::Move => 0,
            CommandKind::Shoot => 1,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CommandKind::Move),
            1 => Some(CommandKind::Shoot),
            _ => None,
        }
    }
}

/// Client -> server instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: ClientId,
    pub x: i16,
    pub y: i16,
    /// Facing, in degrees.
    pub angle: f32,
    #[serde(rename = "command")]
    pub kind: CommandKind,
}

/// Player status as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ClientStatus {
    #[default]
    InGame,
    Failed,
    Won,
}

impl From<ClientStatus> for u8 {
    fn from(s: ClientStatus) -> u8 {
        match s {
            ClientStatus::InGame => 0,
            ClientStatus::Failed => 1,
            ClientStatus::Won => 2,
        }
    }
}

impl TryFrom<u8> for ClientStatus {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ClientStatus::InGame),
            1 => Ok(ClientStatus::Failed),
            2 => Ok(ClientStatus::Won),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

bitflags::bitflags! {
    /// Flags describing the last command a client applied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VisualState: u8 {
        const MOVED = 1 << 0;
        const SHOT = 1 << 1;
    }
}

/// One player as broadcast to the room.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub id: ClientId,
    pub x: i16,
    pub y: i16,
    pub angle: f32,
    pub size: u8,
    pub status: ClientStatus,
    pub visual_state: u8,
    pub frags: u32,
}

/// One live bullet. Coordinates are truncated toward zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletRecord {
    pub id: BulletId,
    pub x: i16,
    pub y: i16,
}

/// Everything a room broadcasts in one update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub tick: u32,
    pub clients: Vec<ClientRecord>,
    pub bullets: Vec<BulletRecord>,
}

impl RoomSnapshot {
    pub fn client(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.id == id)
    }
}

/// Server -> client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The receiving client's own record, sent once on join.
    #[serde(rename = "ClientState")]
    Welcome(ClientRecord),
    RoomState(RoomSnapshot),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Command(Command),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty payload")]
    Empty,
    #[error("unknown record type {0:#04x}")]
    UnknownRecord(u8),
    #[error("expected {expected} record, found type {found:#04x}")]
    Unexpected { expected: &'static str, found: u8 },
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },
    #[error("{0} trailing bytes after message")]
    Trailing(usize),
    #[error("unknown command type {0}")]
    UnknownCommand(u8),
    #[error("unknown client status {0}")]
    UnknownStatus(u8),
    #[error("unknown profile {0:?}")]
    UnknownProfile(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode/decode for one payload profile.
pub trait Codec: Send + Sync {
    fn profile(&self) -> Profile;

    fn encode_command(&self, cmd: &Command) -> Result<Bytes, ProtocolError>;

    fn decode_command(&self, payload: &[u8]) -> Result<Command, ProtocolError>;

    fn encode_server(&self, msg: &ServerMessage) -> Result<Bytes, ProtocolError>;

    fn decode_server(&self, payload: &[u8]) -> Result<ServerMessage, ProtocolError>;
}

/// Compact typed-record profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

/// UTF-8 JSON profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

fn need(buf: &[u8], n: usize, what: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < n {
        return Err(ProtocolError::Truncated {
            what,
            need: n,
            have: buf.len(),
        });
    }
    Ok(())
}

fn expect_magic(buf: &[u8], magic: u8, what: &'static str) -> Result<(), ProtocolError> {
    match buf.first() {
        None => Err(ProtocolError::Empty),
        Some(&b) if b == magic => Ok(()),
        Some(&b) => Err(ProtocolError::Unexpected {
            expected: what,
            found: b,
        }),
    }
}

fn put_client(buf: &mut BytesMut, c: &ClientRecord) {
    buf.put_u8(CLIENT_MAGIC);
    buf.put_u32(c.id.0);
    buf.put_i16(c.x);
    buf.put_i16(c.y);
    buf.put_f32(c.angle);
    buf.put_u8(c.size);
    buf.put_u8(c.status.into());
    buf.put_u8(c.visual_state);
    buf.put_u32(c.frags);
}

fn put_bullet(buf: &mut BytesMut, b: &BulletRecord) {
    buf.put_u8(BULLET_MAGIC);
    buf.put_u32(b.id.0);
    buf.put_i16(b.x);
    buf.put_i16(b.y);
}

/// Consumes one client record from the front of `buf`.
fn take_client(buf: &mut &[u8]) -> Result<ClientRecord, ProtocolError> {
    expect_magic(buf, CLIENT_MAGIC, "client")?;
    need(buf, CLIENT_RECORD_LEN, "client record")?;
    buf.advance(1);
    Ok(ClientRecord {
        id: ClientId(buf.get_u32()),
        x: buf.get_i16(),
        y: buf.get_i16(),
        angle: buf.get_f32(),
        size: buf.get_u8(),
        status: ClientStatus::try_from(buf.get_u8())?,
        visual_state: buf.get_u8(),
        frags: buf.get_u32(),
    })
}

fn take_bullet(buf: &mut &[u8]) -> Result<BulletRecord, ProtocolError> {
    expect_magic(buf, BULLET_MAGIC, "bullet")?;
    need(buf, BULLET_RECORD_LEN, "bullet record")?;
    buf.advance(1);
    Ok(BulletRecord {
        id: BulletId(buf.get_u32()),
        x: buf.get_i16(),
        y: buf.get_i16(),
    })
}

fn no_trailing(buf: &[u8]) -> Result<(), ProtocolError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::Trailing(buf.len()))
    }
}

impl Codec for BinaryCodec {
    fn profile(&self) -> Profile {
        Profile::Binary
    }

    fn encode_command(&self, cmd: &Command) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(COMMAND_LEN);
        buf.put_u8(COMMAND_MAGIC);
        buf.put_u32(cmd.id.0);
        buf.put_i16(cmd.x);
        buf.put_i16(cmd.y);
        buf.put_f32(cmd.angle);
        buf.put_u8(cmd.kind.as_u8());
        Ok(buf.freeze())
    }

    fn decode_command(&self, payload: &[u8]) -> Result<Command, ProtocolError> {
        expect_magic(payload, COMMAND_MAGIC, "command")?;
        need(payload, COMMAND_LEN, "command")?;
        let mut buf = &payload[1..];
        let id = ClientId(buf.get_u32());
        let x = buf.get_i16();
        let y = buf.get_i16();
        let angle = buf.get_f32();
        let raw_kind = buf.get_u8();
        no_trailing(buf)?;
        let kind = CommandKind::from_u8(raw_kind).ok_or(ProtocolError::UnknownCommand(raw_kind))?;
        Ok(Command {
            id,
            x,
            y,
            angle,
            kind,
        })
    }

    fn encode_server(&self, msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
        match msg {
            ServerMessage::Welcome(c) => {
                let mut buf = BytesMut::with_capacity(1 + CLIENT_RECORD_LEN);
                buf.put_u8(WELCOME_MAGIC);
                put_client(&mut buf, c);
                Ok(buf.freeze())
            }
            ServerMessage::RoomState(snap) => {
                let mut buf = BytesMut::with_capacity(
                    ROOM_HEADER_LEN
                        + snap.clients.len() * CLIENT_RECORD_LEN
                        + snap.bullets.len() * BULLET_RECORD_LEN,
                );
                buf.put_u8(ROOM_MAGIC);
                buf.put_u32(snap.tick);
                for c in &snap.clients {
                    put_client(&mut buf, c);
                }
                for b in &snap.bullets {
                    put_bullet(&mut buf, b);
                }
                Ok(buf.freeze())
            }
        }
    }

    fn decode_server(&self, payload: &[u8]) -> Result<ServerMessage, ProtocolError> {
        let Some(&magic) = payload.first() else {
            return Err(ProtocolError::Empty);
        };
        match magic {
            WELCOME_MAGIC => {
                let mut buf = &payload[1..];
                let client = take_client(&mut buf)?;
                no_trailing(buf)?;
                Ok(ServerMessage::Welcome(client))
            }
            ROOM_MAGIC => {
                need(payload, ROOM_HEADER_LEN, "room header")?;
                let mut buf = &payload[1..];
                let mut snap = RoomSnapshot {
                    tick: buf.get_u32(),
                    ..Default::default()
                };
                while let Some(&record) = buf.first() {
                    match record {
                        CLIENT_MAGIC => snap.clients.push(take_client(&mut buf)?),
                        BULLET_MAGIC => snap.bullets.push(take_bullet(&mut buf)?),
                        other => return Err(ProtocolError::UnknownRecord(other)),
                    }
                }
                Ok(ServerMessage::RoomState(snap))
            }
            other => Err(ProtocolError::UnknownRecord(other)),
        }
    }
}

impl Codec for JsonCodec {
    fn profile(&self) -> Profile {
        Profile::Json
    }

    fn encode_command(&self, cmd: &Command) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(&ClientMessage::Command(*cmd))?))
    }

    fn decode_command(&self, payload: &[u8]) -> Result<Command, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let msg: ClientMessage = serde_json::from_slice(payload)?;
        let ClientMessage::Command(cmd) = msg;
        Ok(cmd)
    }

    fn encode_server(&self, msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(msg)?))
    }

    fn decode_server(&self, payload: &[u8]) -> Result<ServerMessage, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::Empty);
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client() -> ClientRecord {
        ClientRecord {
            id: ClientId(7),
            x: 50,
            y: -60,
            angle: 90.5,
            size: 40,
            status: ClientStatus::Won,
            visual_state: VisualState::SHOT.bits(),
            frags: 3,
        }
    }

    #[test]
    fn command_survives_both_profiles() {
        let cmd = Command {
            id: ClientId(7),
            x: 50,
            y: 60,
            angle: 12.25,
            kind: CommandKind::Shoot,
        };
        for profile in [Profile::Binary, Profile::Json] {
            let codec = profile.codec();
            let bytes = codec.encode_command(&cmd).unwrap();
            assert_eq!(codec.decode_command(&bytes).unwrap(), cmd, "{profile}");
        }
    }

    #[test]
    fn binary_command_layout() {
        let cmd = Command {
            id: ClientId(0x01020304),
            x: -2,
            y: 300,
            angle: 0.0,
            kind: CommandKind::Move,
        };
        let bytes = BinaryCodec.encode_command(&cmd).unwrap();
        assert_eq!(bytes.len(), COMMAND_LEN);
        assert_eq!(
            &bytes[..],
            &[0x01, 1, 2, 3, 4, 0xff, 0xfe, 0x01, 0x2c, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn binary_bullet_record_layout() {
        let snap = RoomSnapshot {
            tick: 1,
            clients: vec![],
            bullets: vec![BulletRecord {
                id: BulletId(9),
                x: 10,
                y: 20,
            }],
        };
        let bytes = BinaryCodec
            .encode_server(&ServerMessage::RoomState(snap))
            .unwrap();
        assert_eq!(&bytes[5..], &[BULLET_MAGIC, 0, 0, 0, 9, 0, 10, 0, 20]);
    }

    #[test]
    fn binary_room_state_decodes() {
        let snap = RoomSnapshot {
            tick: 42,
            clients: vec![sample_client()],
            bullets: vec![
                BulletRecord {
                    id: BulletId(1),
                    x: 3,
                    y: 4,
                },
                BulletRecord {
                    id: BulletId(2),
                    x: 5,
                    y: 6,
                },
            ],
        };
        let msg = ServerMessage::RoomState(snap);
        let bytes = BinaryCodec.encode_server(&msg).unwrap();
        assert_eq!(bytes.len(), 5 + CLIENT_RECORD_LEN + 2 * BULLET_RECORD_LEN);
        assert_eq!(BinaryCodec.decode_server(&bytes).unwrap(), msg);
    }

    #[test]
    fn widest_room_state_fits_bound() {
        let client = ClientRecord {
            id: ClientId(u32::MAX),
            x: i16::MIN,
            y: i16::MIN,
            angle: -f32::MIN_POSITIVE,
            size: u8::MAX,
            status: ClientStatus::Won,
            visual_state: u8::MAX,
            frags: u32::MAX,
        };
        let bullet = BulletRecord {
            id: BulletId(u32::MAX),
            x: i16::MIN,
            y: i16::MIN,
        };
        let msg = ServerMessage::RoomState(RoomSnapshot {
            tick: u32::MAX,
            clients: vec![client; 8],
            bullets: vec![bullet; 2048],
        });
        let bound = max_room_state_len(8, 2048);
        for profile in [Profile::Binary, Profile::Json] {
            let len = profile.codec().encode_server(&msg).unwrap().len();
            assert!(len <= bound, "{profile}: {len} > {bound}");
        }
        // A full default room is well past the command frame limit.
        assert!(bound > crate::net::MAX_FRAME_LEN);
    }

    #[test]
    fn json_welcome_shape() {
        let bytes = JsonCodec
            .encode_server(&ServerMessage::Welcome(sample_client()))
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["type"], "ClientState");
        assert_eq!(v["id"], 7);
        assert_eq!(v["x"], 50);
        assert_eq!(v["y"], -60);
        assert_eq!(v["status"], 2);
        assert_eq!(v["visualState"], 2);
    }

    #[test]
    fn json_command_shape() {
        let payload = br#"{"type":"Command","id":3,"x":1,"y":2,"angle":45,"command":"SHOOT"}"#;
        let cmd = JsonCodec.decode_command(payload).unwrap();
        assert_eq!(cmd.id, ClientId(3));
        assert_eq!(cmd.angle, 45.0);
        assert_eq!(cmd.kind, CommandKind::Shoot);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(matches!(
            BinaryCodec.decode_command(&[]),
            Err(ProtocolError::Empty)
        ));
        assert!(matches!(
            BinaryCodec.decode_command(&[BULLET_MAGIC, 0, 0]),
            Err(ProtocolError::Unexpected { .. })
        ));
        assert!(matches!(
            BinaryCodec.decode_command(&[COMMAND_MAGIC, 0, 0, 0, 1]),
            Err(ProtocolError::Truncated { .. })
        ));

        let mut bad_kind = BinaryCodec
            .encode_command(&Command {
                id: ClientId(1),
                x: 0,
                y: 0,
                angle: 0.0,
                kind: CommandKind::Move,
            })
            .unwrap()
            .to_vec();
        bad_kind[COMMAND_LEN - 1] = 9;
        assert!(matches!(
            BinaryCodec.decode_command(&bad_kind),
            Err(ProtocolError::UnknownCommand(9))
        ));

        bad_kind.push(0);
        assert!(matches!(
            BinaryCodec.decode_command(&bad_kind),
            Err(ProtocolError::Trailing(1))
        ));

        assert!(JsonCodec.decode_command(b"{\"type\":\"Other\"}").is_err());
        assert!(JsonCodec.decode_command(b"not json").is_err());
    }

    #[test]
    fn rejects_unknown_room_record() {
        let payload = [ROOM_MAGIC, 0, 0, 0, 1, 0x7f];
        assert!(matches!(
            BinaryCodec.decode_server(&payload),
            Err(ProtocolError::UnknownRecord(0x7f))
        ));
    }

    #[test]
    fn profile_parses() {
        assert_eq!("JSON".parse::<Profile>().unwrap(), Profile::Json);
        assert_eq!("binary".parse::<Profile>().unwrap(), Profile::Binary);
        assert!("xml".parse::<Profile>().is_err());
    }
}
