//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::ticks_for;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Allowed client origins for CORS (`*` for any)
    pub client_origin: String,

    /// Gameplay and tick tuning
    pub sim: SimConfig,
    /// Per-connection limits
    pub net: NetConfig,
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Simulation tuning. Every movement constant lives here rather than in code,
/// so arenas can be retuned without a rebuild.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Physics ticks per second
    pub tick_rate: u32,
    /// State broadcasts per second
    pub broadcast_rate: u32,
    /// Delay between death and respawn
    pub respawn_delay: Duration,
    /// Players below this Y die
    pub void_y: f32,
    /// Health removed per hit
    pub damage_per_hit: i32,
    /// Minimum time between two shots of one player
    pub shot_cooldown: Duration,
    /// Maximum hit-scan distance
    pub shot_range: f32,
    /// Time before a dash can be used again
    pub dash_cooldown: Duration,
    /// How long a dash overrides horizontal movement
    pub dash_duration: Duration,
    /// Horizontal speed during a dash
    pub dash_speed: f32,
    /// Walking speed
    pub move_speed: f32,
    /// Speed with the sprint flag held
    pub sprint_speed: f32,
    /// Vertical velocity applied on jump
    pub jump_impulse: f32,
    /// Downward acceleration
    pub gravity: f32,
    /// Player capacity of this instance
    pub max_players: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            broadcast_rate: 15,
            respawn_delay: Duration::from_millis(3500),
            void_y: -50.0,
            damage_per_hit: 25,
            shot_cooldown: Duration::from_millis(100),
            shot_range: 200.0,
            dash_cooldown: Duration::from_millis(1000),
            dash_duration: Duration::from_millis(150),
            dash_speed: 24.0,
            move_speed: 6.0,
            sprint_speed: 9.0,
            jump_impulse: 7.0,
            gravity: 20.0,
            max_players: 16,
        }
    }
}

impl SimConfig {
    /// Fixed physics step in seconds
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn respawn_delay_ticks(&self) -> u64 {
        ticks_for(self.respawn_delay, self.tick_rate)
    }

    pub fn shot_cooldown_ticks(&self) -> u64 {
        ticks_for(self.shot_cooldown, self.tick_rate)
    }

    pub fn dash_cooldown_ticks(&self) -> u64 {
        ticks_for(self.dash_cooldown, self.tick_rate)
    }

    pub fn dash_duration_ticks(&self) -> u64 {
        ticks_for(self.dash_duration, self.tick_rate)
    }

    /// Reject combinations the tick loop cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::OutOfRange("TICK_RATE"));
        }
        if self.broadcast_rate == 0 || self.broadcast_rate > self.tick_rate {
            return Err(ConfigError::OutOfRange("BROADCAST_RATE"));
        }
        if !(1..=100).contains(&self.damage_per_hit) {
            return Err(ConfigError::OutOfRange("DAMAGE_PER_HIT"));
        }
        if self.max_players == 0 {
            return Err(ConfigError::OutOfRange("MAX_PLAYERS"));
        }
        let floats = [
            ("VOID_Y", self.void_y),
            ("SHOT_RANGE", self.shot_range),
            ("DASH_SPEED", self.dash_speed),
            ("MOVE_SPEED", self.move_speed),
            ("SPRINT_SPEED", self.sprint_speed),
            ("JUMP_IMPULSE", self.jump_impulse),
            ("GRAVITY", self.gravity),
        ];
        for (key, value) in floats {
            if !value.is_finite() {
                return Err(ConfigError::OutOfRange(key));
            }
        }
        Ok(())
    }
}

/// Per-connection limits
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// Input/shoot messages accepted per second per connection
    pub input_rate_limit: u32,
    /// Queued commands kept per player before the oldest is dropped
    pub input_queue_depth: usize,
    /// Time a fresh socket has to send its join message
    pub handshake_timeout: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            input_rate_limit: 120,
            input_queue_depth: 32,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render-style PORT wins over SERVER_ADDR
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string())
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        let defaults = SimConfig::default();
        let sim = SimConfig {
            tick_rate: parse_or(&lookup, "TICK_RATE", defaults.tick_rate)?,
            broadcast_rate: parse_or(&lookup, "BROADCAST_RATE", defaults.broadcast_rate)?,
            respawn_delay: millis_or(&lookup, "RESPAWN_DELAY_MS", defaults.respawn_delay)?,
            void_y: parse_or(&lookup, "VOID_Y", defaults.void_y)?,
            damage_per_hit: parse_or(&lookup, "DAMAGE_PER_HIT", defaults.damage_per_hit)?,
            shot_cooldown: millis_or(&lookup, "SHOT_COOLDOWN_MS", defaults.shot_cooldown)?,
            shot_range: parse_or(&lookup, "SHOT_RANGE", defaults.shot_range)?,
            dash_cooldown: millis_or(&lookup, "DASH_COOLDOWN_MS", defaults.dash_cooldown)?,
            dash_duration: millis_or(&lookup, "DASH_DURATION_MS", defaults.dash_duration)?,
            dash_speed: parse_or(&lookup, "DASH_SPEED", defaults.dash_speed)?,
            move_speed: parse_or(&lookup, "MOVE_SPEED", defaults.move_speed)?,
            sprint_speed: parse_or(&lookup, "SPRINT_SPEED", defaults.sprint_speed)?,
            jump_impulse: parse_or(&lookup, "JUMP_IMPULSE", defaults.jump_impulse)?,
            gravity: parse_or(&lookup, "GRAVITY", defaults.gravity)?,
            max_players: parse_or(&lookup, "MAX_PLAYERS", defaults.max_players)?,
        };
        sim.validate()?;

        let net_defaults = NetConfig::default();
        let net = NetConfig {
            input_rate_limit: parse_or(&lookup, "INPUT_RATE_LIMIT", net_defaults.input_rate_limit)?,
            input_queue_depth: parse_or(
                &lookup,
                "INPUT_QUEUE_DEPTH",
                net_defaults.input_queue_depth,
            )?,
            handshake_timeout: net_defaults.handshake_timeout,
        };
        if net.input_queue_depth == 0 {
            return Err(ConfigError::OutOfRange("INPUT_QUEUE_DEPTH"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            sim,
            net,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default_ms = default.as_millis() as u64;
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Value out of range for environment variable: {0}")]
    OutOfRange(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = load(&[]).unwrap();

        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.sim.tick_rate, 60);
        assert_eq!(config.sim.broadcast_rate, 15);
        assert_eq!(config.sim.respawn_delay, Duration::from_millis(3500));
        assert_eq!(config.sim.void_y, -50.0);
        assert_eq!(config.sim.damage_per_hit, 25);
        assert_eq!(config.sim.respawn_delay_ticks(), 210);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn port_overrides_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1234")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("TICK_RATE", "30"),
            ("BROADCAST_RATE", "10"),
            ("RESPAWN_DELAY_MS", "1000"),
            ("MAX_PLAYERS", "4"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.sim.tick_rate, 30);
        assert_eq!(config.sim.respawn_delay_ticks(), 30);
        assert_eq!(config.sim.max_players, 4);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_garbage_and_impossible_rates() {
        assert!(matches!(
            load(&[("TICK_RATE", "fast")]),
            Err(ConfigError::Invalid("TICK_RATE"))
        ));
        assert!(matches!(
            load(&[("BROADCAST_RATE", "120")]),
            Err(ConfigError::OutOfRange("BROADCAST_RATE"))
        ));
        assert!(matches!(
            load(&[("DAMAGE_PER_HIT", "0")]),
            Err(ConfigError::OutOfRange("DAMAGE_PER_HIT"))
        ));
        assert!(matches!(
            load(&[("GRAVITY", "NaN")]),
            Err(ConfigError::OutOfRange("GRAVITY"))
        ));
    }
}
