//! # Arena Shared Library
//!
//! Types and pure logic shared between every participant in an arena
//! session: the wire protocol and its binary codec, planar vector math, the
//! melee combat resolver and the movement tuning both ends simulate with.
//!
//! Nothing in this crate performs I/O or keeps state between calls.

pub mod codec;
pub mod combat;
pub mod math;
pub mod protocol;

pub use codec::{decode, encode, encode_message, CodecError};
pub use combat::{resolve_strike, Candidate, Facing, Strike};
pub use math::Vec2;
pub use protocol::{
    AttackContact, ChatMessage, HealthUpdate, LatencyPing, Message, MessageType, PlayerAttack,
    PositionUpdate, PulseUpdate,
};

/// Walking speed, in units per second.
pub const MOVEMENT_SPEED: f64 = 250.0;

/// Initial speed of the knockback applied to a struck entity.
pub const IMPACT_VELOCITY: f64 = 750.0;

/// Per-step multiplier applied to knockback speed.
pub const IMPACT_DECAY: f64 = 0.85;

/// Knockback speed below which an entity is considered at rest.
pub const IMPACT_REST_THRESHOLD: f64 = 0.05;

/// An inbound position farther than this from the tracked one is a teleport.
pub const RECONCILE_RADIUS: f64 = 50.0;

/// Hitbox radius used for entities whose body size is not known.
pub const DEFAULT_HITBOX_RADIUS: f64 = 20.0;

/// Health given to entities first seen without a health report.
pub const DEFAULT_MAX_HP: i32 = 100;

/// Longest simulation step applied in one go, in seconds.
pub const MAX_STEP_SECONDS: f64 = 1.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hitbox_fits_inside_reach() {
        assert!(DEFAULT_HITBOX_RADIUS < combat::DEFAULT_MAX_REACH);
    }

    #[test]
    fn test_knockback_settles() {
        let mut velocity = IMPACT_VELOCITY;
        let mut steps = 0;
        while velocity >= IMPACT_REST_THRESHOLD {
            velocity *= IMPACT_DECAY;
            steps += 1;
        }
        assert!(steps < 100, "knockback took {steps} steps to settle");
    }

    #[test]
    fn test_reexports_cover_the_wire_types() {
        let ping = LatencyPing { timestamp: 42 };
        let frame = encode(MessageType::LatencyPing, &ping).unwrap();
        assert_eq!(decode(&frame).unwrap(), Message::LatencyPing(ping));
    }
}
