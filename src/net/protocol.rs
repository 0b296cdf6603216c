use serde::{Deserialize, Serialize};

use crate::game::objects::{Player, Spore};

/// Sender ID used for packets originating from the server itself
pub const SYSTEM_SENDER: u64 = 0;

/// A message tagged with the client ID it is attributed to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub sender_id: u64,
    pub msg: Msg,
}

impl Packet {
    pub fn new(sender_id: u64, msg: Msg) -> Self {
        Self { sender_id, msg }
    }
}

/// Every message exchanged between clients and the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Msg {
    Chat { msg: String },
    /// The client's session ID
    Id { id: u64 },
    OkResponse,
    DenyResponse { reason: String },
    /// Enter the game under a display name
    Join { name: String },
    Player(PlayerMessage),
    Spore(SporeMessage),
    SporeBatch { spores: Vec<SporeMessage> },
    HiscoreBoardRequest,
    HiscoreBoard { hiscores: Vec<HiscoreEntry> },
    Disconnect { reason: String },
    /// New heading in radians
    PlayerDirection { direction: f64 },
    SporeConsumed { spore_id: u64 },
    PlayerConsumed { player_id: u64 },
}

/// Full player snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMessage {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub direction: f64,
    pub speed: f64,
    pub color: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SporeMessage {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl SporeMessage {
    pub fn from_spore(id: u64, spore: &Spore) -> Self {
        Self {
            id,
            x: spore.position.x,
            y: spore.position.y,
            radius: spore.radius,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiscoreEntry {
    pub name: String,
    pub score: i64,
}

impl Msg {
    pub fn chat(msg: impl Into<String>) -> Self {
        Msg::Chat { msg: msg.into() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Msg::DenyResponse {
            reason: reason.into(),
        }
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        Msg::Disconnect {
            reason: reason.into(),
        }
    }

    pub fn player(id: u64, player: &Player) -> Self {
        Msg::Player(PlayerMessage {
            id,
            name: player.name.clone(),
            x: player.position.x,
            y: player.position.y,
            radius: player.radius,
            direction: player.direction,
            speed: player.speed,
            color: player.color,
        })
    }

    pub fn spore(id: u64, spore: &Spore) -> Self {
        Msg::Spore(SporeMessage::from_spore(id, spore))
    }

    pub fn spore_batch<'a, I>(spores: I) -> Self
    where
        I: IntoIterator<Item = (u64, &'a Spore)>,
    {
        Msg::SporeBatch {
            spores: spores
                .into_iter()
                .map(|(id, spore)| SporeMessage::from_spore(id, spore))
                .collect(),
        }
    }

    /// Short variant name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Chat { .. } => "Chat",
            Msg::Id { .. } => "Id",
            Msg::OkResponse => "OkResponse",
            Msg::DenyResponse { .. } => "DenyResponse",
            Msg::Join { .. } => "Join",
            Msg::Player(_) => "Player",
            Msg::Spore(_) => "Spore",
            Msg::SporeBatch { .. } => "SporeBatch",
            Msg::HiscoreBoardRequest => "HiscoreBoardRequest",
            Msg::HiscoreBoard { .. } => "HiscoreBoard",
            Msg::Disconnect { .. } => "Disconnect",
            Msg::PlayerDirection { .. } => "PlayerDirection",
            Msg::SporeConsumed { .. } => "SporeConsumed",
            Msg::PlayerConsumed { .. } => "PlayerConsumed",
        }
    }
}

/// Encode a message to bytes
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message from bytes
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
