use serde::Deserialize;

use crate::common::types::AnyResult;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub audio: AudioConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    pub stats: StatsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL of the messaging gateway, e.g. `wss://gateway.example.net`.
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    /// Path to the length-prefixed sound clip container.
    pub clip_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    /// Delay before the first frame and after the last one, in milliseconds.
    #[serde(default = "default_preroll_ms")]
    pub preroll_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            preroll_ms: default_preroll_ms(),
            connect_timeout_ms: default_timeout_ms(),
            send_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_preroll_ms() -> u64 {
    250
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    pub users_path: String,
    pub teams_path: String,
    /// Base URL of the external profile API; the username is appended as a path segment.
    pub profile_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub filters: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> AnyResult<Self> {
        let config_str = std::fs::read_to_string(path).unwrap_or_else(|_| "".to_string());
        if config_str.is_empty() {
            return Err(format!("{path} not found or empty").into());
        }
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let raw = r#"
            [gateway]
            endpoint = "wss://gateway.example.net"

            [audio]
            clip_path = "assets/horn.dca"

            [stats]
            users_path = "data/users.json"
            teams_path = "data/teams.json"
            profile_url = "https://ladder.example.net/profile/pc/us"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.playback.preroll_ms, 250);
        assert_eq!(config.playback.connect_timeout_ms, 5_000);
        assert_eq!(config.commands.prefix, "!");
        assert!(config.logging.is_none());
    }

    #[test]
    fn playback_overrides_are_honored() {
        let raw = r#"
            [gateway]
            endpoint = "wss://gateway.example.net"

            [audio]
            clip_path = "assets/horn.dca"

            [playback]
            preroll_ms = 100
            send_timeout_ms = 2000

            [stats]
            users_path = "data/users.json"
            teams_path = "data/teams.json"
            profile_url = "https://ladder.example.net/profile/pc/us"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.playback.preroll_ms, 100);
        assert_eq!(config.playback.send_timeout_ms, 2_000);
        assert_eq!(config.playback.connect_timeout_ms, 5_000);
    }
}
