//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;

const DEFAULT_ROOM_CODE: &str = "arena-1";
const DEFAULT_PLAYER_NAME: &str = "Duelist";
const DEFAULT_PLAYER_HANDLE: &str = "@duelist";
const DEFAULT_FRAME_RATE: u32 = 60;
const DEFAULT_BOT_SEED: u64 = 7;

/// Which document store backs the match
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackendKind {
    /// In-process document; runs a local bot-versus-bot duel
    Memory,
    /// Hosted realtime database over REST
    Rtdb { url: String, auth: Option<String> },
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub backend: StoreBackendKind,

    /// Room code shared by both players
    pub room_code: String,
    /// Display name; a privileged-mode marker in it is honored
    pub player_name: String,
    pub player_handle: String,

    /// Simulation frames per second
    pub frame_rate: u32,
    /// Seed for bullet spread and bot decisions
    pub bot_seed: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match lookup("STORE_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => StoreBackendKind::Memory,
            "rtdb" => StoreBackendKind::Rtdb {
                url: lookup("RTDB_URL").ok_or(ConfigError::Missing("RTDB_URL"))?,
                auth: lookup("RTDB_AUTH").filter(|token| !token.is_empty()),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let frame_rate: u32 = parse_or(&lookup, "FRAME_RATE", DEFAULT_FRAME_RATE)?;
        if frame_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "FRAME_RATE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            backend,
            room_code: lookup("ROOM_CODE").unwrap_or_else(|| DEFAULT_ROOM_CODE.to_string()),
            player_name: lookup("PLAYER_NAME").unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string()),
            player_handle: lookup("PLAYER_HANDLE")
                .unwrap_or_else(|| DEFAULT_PLAYER_HANDLE.to_string()),
            frame_rate,
            bot_seed: parse_or(&lookup, "BOT_SEED", DEFAULT_BOT_SEED)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&'static str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.backend, StoreBackendKind::Memory);
        assert_eq!(config.room_code, "arena-1");
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.bot_seed, 7);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_rtdb_requires_url() {
        let err = config(&[("STORE_BACKEND", "rtdb")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("RTDB_URL")));

        let ok = config(&[
            ("STORE_BACKEND", "rtdb"),
            ("RTDB_URL", "https://duel.example.com"),
            ("RTDB_AUTH", ""),
        ])
        .unwrap();
        assert_eq!(
            ok.backend,
            StoreBackendKind::Rtdb {
                url: "https://duel.example.com".into(),
                auth: None
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("FRAME_RATE", "0")]),
            Err(ConfigError::Invalid { key: "FRAME_RATE", .. })
        ));
        assert!(matches!(
            config(&[("BOT_SEED", "seven")]),
            Err(ConfigError::Invalid { key: "BOT_SEED", .. })
        ));
        assert!(matches!(
            config(&[("STORE_BACKEND", "sqlite")]),
            Err(ConfigError::Invalid { key: "STORE_BACKEND", .. })
        ));
    }
}
