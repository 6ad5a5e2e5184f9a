//! Wire message kinds and their payload schemas.

use crate::math::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of message kinds the server and client exchange.
///
/// Each kind is written on the wire as its ASCII tag followed by a single
/// zero byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    PositionUpdate,
    PositionPulse,
    ChatMessage,
    PlayerAttack,
    LatencyPing,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::PositionUpdate,
        MessageType::PositionPulse,
        MessageType::ChatMessage,
        MessageType::PlayerAttack,
        MessageType::LatencyPing,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            MessageType::PositionUpdate => "positionUpdate",
            MessageType::PositionPulse => "positionPulse",
            MessageType::ChatMessage => "chatMessage",
            MessageType::PlayerAttack => "playerAttack",
            MessageType::LatencyPing => "latencyPing",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<MessageType> {
        MessageType::ALL
            .into_iter()
            .find(|kind| kind.tag().as_bytes() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One entity's instantaneous kinematic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub position: Vec2,
    /// Unit length or zero.
    pub trajectory: Vec2,
    pub owner_id: Option<String>,
}

impl PositionUpdate {
    /// Builds an update, normalizing `trajectory` so the unit-or-zero
    /// invariant holds no matter what the caller passes.
    pub fn new(position: Vec2, trajectory: Vec2, owner_id: Option<String>) -> Self {
        Self {
            position,
            trajectory: trajectory.normalized(),
            owner_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub current: i32,
    pub max: i32,
}

/// The periodic full-roster broadcast unit. A pulse batch is a `Vec` of these
/// whose order carries no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseUpdate {
    pub owner_id: String,
    pub position: PositionUpdate,
    pub health: HealthUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackContact {
    pub victim_id: String,
    /// Offset from the strike origin to the victim.
    pub vector: Vec2,
    /// In `[0, 1]`.
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAttack {
    pub attacker_id: String,
    pub contacts: Vec<AttackContact>,
}

/// Round-trip probe. The server echoes it back unchanged; the timestamp is
/// microseconds on the sending client's session clock and is only ever
/// interpreted by that client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatencyPing {
    pub timestamp: u64,
}

/// A fully decoded inbound or outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PositionUpdate(PositionUpdate),
    PositionPulse(Vec<PulseUpdate>),
    ChatMessage(ChatMessage),
    PlayerAttack(PlayerAttack),
    LatencyPing(LatencyPing),
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::PositionUpdate(_) => MessageType::PositionUpdate,
            Message::PositionPulse(_) => MessageType::PositionPulse,
            Message::ChatMessage(_) => MessageType::ChatMessage,
            Message::PlayerAttack(_) => MessageType::PlayerAttack,
            Message::LatencyPing(_) => MessageType::LatencyPing,
        }
    }
}
