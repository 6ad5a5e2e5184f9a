//! Session timing and bootstrap configuration.

use serde::{Deserialize, Serialize};
use shared::Vec2;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },

    #[error("drop threshold must be at least 1")]
    ZeroDropThreshold,

    #[error("ping safety multiplier must be at least 1.0, got {0}")]
    SafetyMultiplier(f64),
}

/// Timing constants for the connection manager and the simulation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Minimum spacing between position-update flushes.
    pub position_update_interval: Duration,
    /// Minimum spacing between position pulses; faster calls are dropped.
    pub pulse_interval: Duration,
    /// Latency probe period.
    pub ping_period: Duration,
    /// Unanswered probes tolerated before the link is presumed dead.
    pub drop_threshold: usize,
    /// Pending probes older than `ping_period * drop_threshold * this` are
    /// pruned.
    pub ping_safety_multiplier: f64,
    /// Delay after an unexpected disconnect before reconnecting is suggested.
    pub reconnect_grace: Duration,
    /// Fixed simulation tick.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            position_update_interval: Duration::from_secs_f64(1.0 / 15.0),
            pulse_interval: Duration::from_secs_f64(1.0 / 3.0),
            ping_period: Duration::from_secs(1),
            drop_threshold: 10,
            ping_safety_multiplier: 1.5,
            reconnect_grace: Duration::from_secs(3),
            tick: Duration::from_secs_f64(1.0 / 60.0),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("position update interval", self.position_update_interval),
            ("pulse interval", self.pulse_interval),
            ("ping period", self.ping_period),
            ("reconnect grace", self.reconnect_grace),
            ("tick", self.tick),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroInterval { name });
        }
        if self.drop_threshold == 0 {
            return Err(ConfigError::ZeroDropThreshold);
        }
        if !(self.ping_safety_multiplier >= 1.0) {
            return Err(ConfigError::SafetyMultiplier(self.ping_safety_multiplier));
        }
        Ok(())
    }

    /// Age past which a pending latency probe is forgotten.
    pub fn ping_max_age(&self) -> Duration {
        self.ping_period
            .mul_f64(self.drop_threshold as f64 * self.ping_safety_multiplier)
    }
}

/// Cosmetic details about a player, fetched by the account collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub username: String,
    pub avatar: u32,
}

/// Session bootstrap data handed over by the account/room collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub player_id: String,
    pub room_id: String,
    pub spawn: Vec2,
    pub info: PlayerInfo,
}

/// WebSocket endpoint for a player's live session.
pub fn session_url(server: &str, player_id: &str) -> String {
    format!("{}/ws/rooms/{}", server.trim_end_matches('/'), player_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_ping_max_age() {
        let config = SessionConfig::default();
        assert_eq!(config.ping_max_age(), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = SessionConfig {
            ping_period: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval { name: "ping period" })
        );
    }

    #[test]
    fn test_rejects_bad_threshold_and_multiplier() {
        let config = SessionConfig {
            drop_threshold: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroDropThreshold));

        let config = SessionConfig {
            ping_safety_multiplier: 0.5,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SafetyMultiplier(0.5)));
    }

    #[test]
    fn test_session_url() {
        assert_eq!(
            session_url("ws://localhost:8080/", "p1"),
            "ws://localhost:8080/ws/rooms/p1"
        );
    }
}
