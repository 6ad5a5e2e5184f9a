//! Planar vector math shared by the reconciler, the simulation step and the
//! combat resolver.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// A point or direction in arena space.
///
/// Serialized as two consecutive `f64`s, so wire round trips are exact.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other - self).length()
    }

    /// True when `other` is no farther than `radius` away. Compares squared
    /// lengths, so the boundary is inclusive and no square root is taken.
    pub fn distance_within(self, other: Vec2, radius: f64) -> bool {
        (other - self).length_squared() <= radius * radius
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalized(self) -> Vec2 {
        let magnitude = self.length();
        if magnitude > 0.0 {
            Vec2::new(self.x / magnitude, self.y / magnitude)
        } else {
            Vec2::ZERO
        }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Normalized direction from `self` toward `target`.
    pub fn direction_to(self, target: Vec2) -> Vec2 {
        (target - self).normalized()
    }

    /// Moves along `direction` (assumed unit length) for `dt` seconds.
    pub fn stepped(self, direction: Vec2, dt: f64, speed: f64) -> Vec2 {
        self + direction * (speed * dt)
    }

    /// Moves toward `destination`, landing exactly on it when it is within
    /// one step.
    pub fn step_toward(self, destination: Vec2, dt: f64, speed: f64) -> Vec2 {
        let reach = speed * dt;
        if self.distance_within(destination, reach) {
            return destination;
        }
        self.stepped(self.direction_to(destination), dt, speed)
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl From<(f64, f64)> for Vec2 {
    fn from((x, y): (f64, f64)) -> Self {
        Vec2::new(x, y)
    }
}

/// Relative location of `value` within `[lower, upper]`, clamped to `[0, 1]`.
///
/// A degenerate range (`upper <= lower`) maps everything at or below `lower`
/// to 0 and everything above it to 1.
pub fn linear_point(lower: f64, upper: f64, value: f64) -> f64 {
    let span = upper - lower;
    if span <= 0.0 {
        return if value > lower { 1.0 } else { 0.0 };
    }
    ((value - lower) / span).clamp(0.0, 1.0)
}
