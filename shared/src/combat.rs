//! Melee hit detection.
//!
//! Resolution is a pure function of the strike and the candidate list: no
//! state, no randomness, and the inputs are never mutated.

use crate::math::{linear_point, Vec2};
use crate::protocol::AttackContact;

/// Half-width of the acceptance cone, as a dot-product bound.
pub const DEFAULT_LATITUDE: f64 = 0.75;

/// Distance past which a strike never lands.
pub const DEFAULT_MAX_REACH: f64 = 65.0;

/// Where the striking contact point sits relative to the body, for an
/// entity facing right. Mirrored horizontally when facing left.
pub const STRIKE_OFFSET: Vec2 = Vec2::new(40.0, -10.0);

/// Horizontal facing of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    Left,
    Right,
}

impl Facing {
    pub fn vector(self) -> Vec2 {
        match self {
            Facing::Left => Vec2::new(-1.0, 0.0),
            Facing::Right => Vec2::new(1.0, 0.0),
        }
    }

    /// Facing implied by a movement direction. A purely vertical or zero
    /// trajectory keeps the current facing.
    pub fn from_trajectory(trajectory: Vec2, current: Facing) -> Facing {
        if trajectory.x > 0.0 {
            Facing::Right
        } else if trajectory.x < 0.0 {
            Facing::Left
        } else {
            current
        }
    }

    /// The point a strike originates from for a body at `position`.
    pub fn strike_origin(self, position: Vec2) -> Vec2 {
        let offset = Vec2::new(STRIKE_OFFSET.x * self.vector().x, STRIKE_OFFSET.y);
        position + offset
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strike {
    pub attacker_id: String,
    pub origin: Vec2,
    /// Normalized by the resolver, so any non-zero direction works.
    pub facing: Vec2,
    pub latitude: f64,
    pub max_reach: f64,
}

impl Strike {
    pub fn new(attacker_id: impl Into<String>, origin: Vec2, facing: Vec2) -> Self {
        Self {
            attacker_id: attacker_id.into(),
            origin,
            facing,
            latitude: DEFAULT_LATITUDE,
            max_reach: DEFAULT_MAX_REACH,
        }
    }
}

/// A potential victim of a strike.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub position: Vec2,
    pub hitbox_radius: f64,
}

/// Victim lies within the cone: `dot(facing, dir(origin -> victim)) > -latitude`.
///
/// `latitude = 1` accepts nearly the whole plane, `0` accepts the front half,
/// `-1` accepts nothing.
pub fn is_in_front(origin: Vec2, facing: Vec2, latitude: f64, victim: Vec2) -> bool {
    let toward_victim = origin.direction_to(victim);
    facing.normalized().dot(toward_victim) > -latitude
}

/// Strength of a strike landing at `distance` on a victim with the given
/// hitbox. 1 at the hitbox edge (or closer), falling linearly to 0 at
/// `max_reach`.
pub fn strike_strength(distance: f64, hitbox_radius: f64, max_reach: f64) -> f64 {
    1.0 - linear_point(0.0, max_reach - hitbox_radius, distance - hitbox_radius)
}

/// Every candidate the strike connects with, in candidate order.
///
/// The attacker itself is never a victim. Candidates outside the facing cone
/// are rejected before any distance is computed.
pub fn resolve_strike<'a, I>(strike: &Strike, candidates: I) -> Vec<AttackContact>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    candidates
        .into_iter()
        .filter(|candidate| candidate.id != strike.attacker_id)
        .filter(|candidate| {
            is_in_front(
                strike.origin,
                strike.facing,
                strike.latitude,
                candidate.position,
            )
        })
        .filter_map(|candidate| {
            let distance = strike.origin.distance(candidate.position);
            if distance >= strike.max_reach {
                return None;
            }
            let strength = strike_strength(distance, candidate.hitbox_radius, strike.max_reach);
            (strength > 0.0).then(|| AttackContact {
                victim_id: candidate.id.to_string(),
                vector: candidate.position - strike.origin,
                strength,
            })
        })
        .collect()
}
