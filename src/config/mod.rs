//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated; any origin when unset
    pub client_origin: Option<String>,

    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Ticks an input is replayed before it is released
    pub input_decay_ticks: u32,
    /// Scale applied to player velocity when pushing movable models
    pub player_push_strength: f32,
    /// Refine block collision against the mirrored mesh world
    pub mesh_refinement: bool,
    /// Enable prediction for clients that advertise support
    pub predict_by_default: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let tick_rate: u32 = parse_or("TICK_RATE", 20)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        let player_push_strength: f32 = parse_or("PLAYER_PUSH_STRENGTH", 0.35)?;
        if !player_push_strength.is_finite() {
            return Err(ConfigError::Invalid("PLAYER_PUSH_STRENGTH"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").ok(),

            tick_rate,
            input_decay_ticks: parse_or("INPUT_DECAY_TICKS", 6)?,
            player_push_strength,
            mesh_refinement: parse_flag("MESH_REFINEMENT", true)?,
            predict_by_default: parse_flag("PREDICT_BY_DEFAULT", true)?,
        })
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(name)),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns distinct variable names; the process environment is shared.

    #[test]
    fn missing_values_use_defaults() {
        assert_eq!(parse_or::<u32>("MOVESYNC_TEST_UNSET_NUMBER", 6).unwrap(), 6);
        assert!(parse_flag("MOVESYNC_TEST_UNSET_FLAG", true).unwrap());
    }

    #[test]
    fn flags_accept_common_spellings() {
        env::set_var("MOVESYNC_TEST_FLAG_OFF", "Off");
        env::set_var("MOVESYNC_TEST_FLAG_ON", "1");
        assert!(!parse_flag("MOVESYNC_TEST_FLAG_OFF", true).unwrap());
        assert!(parse_flag("MOVESYNC_TEST_FLAG_ON", false).unwrap());
    }

    #[test]
    fn garbage_is_rejected() {
        env::set_var("MOVESYNC_TEST_BAD_NUMBER", "twenty");
        assert!(matches!(
            parse_or::<u32>("MOVESYNC_TEST_BAD_NUMBER", 20),
            Err(ConfigError::Invalid("MOVESYNC_TEST_BAD_NUMBER"))
        ));
    }
}
