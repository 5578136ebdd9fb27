use crate::error::ConfigError;
use crate::types::{CHANNELS, DEFAULT_BLOCK_SIZE, SAMPLE_RATE};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_url")]
    pub url: String,

    /// Sent as `Authorization: Bearer <token>` on the upgrade request.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// `connection_status` value meaning the agent behind the relay is reachable.
    #[serde(default = "default_ready_status")]
    pub ready_status: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: None,
            ready_status: default_ready_status(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_device_name")]
    pub input_device: String,

    #[serde(default = "default_device_name")]
    pub output_device: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            block_size: default_block_size(),
            input_device: default_device_name(),
            output_device: default_device_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub muted: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/realtime-chat".to_string()
}

fn default_ready_status() -> String {
    "connected_to_openai".to_string()
}

fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}

fn default_channels() -> u16 {
    CHANNELS
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_device_name() -> String {
    "default".to_string()
}

/// Interpolate `${VAR}` patterns with environment variable values.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let val = std::env::var(var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
        result = result.replace(&cap[0], &val);
    }

    Ok(result)
}

impl AppConfig {
    /// Load configuration from a TOML file, with environment variable interpolation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(s)?;
        let config: AppConfig = toml::from_str(&interpolated)?;
        if let Err(e) = config.validate() {
            tracing::warn!("rejecting configuration: {e}");
            return Err(e);
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // The wire format and the WAV framing are fixed at SAMPLE_RATE.
        if self.audio.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::Invalid(format!(
                "audio.sample_rate must be {SAMPLE_RATE}, got {}",
                self.audio.sample_rate
            )));
        }
        if self.audio.block_size == 0 {
            return Err(ConfigError::Invalid("audio.block_size must be > 0".into()));
        }
        if self.audio.channels == 0 {
            return Err(ConfigError::Invalid("audio.channels must be > 0".into()));
        }
        if !(self.connection.url.starts_with("ws://") || self.connection.url.starts_with("wss://"))
        {
            return Err(ConfigError::Invalid(format!(
                "connection.url must be a ws:// or wss:// URL, got '{}'",
                self.connection.url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_valid_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[connection]
url = "wss://relay.example.com/ai-realtime-chat"
auth_token = "abc"
ready_status = "ready"

[audio]
sample_rate = 24000
block_size = 2048
input_device = "USB Microphone"
output_device = "speakers"

[playback]
muted = true
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.connection.url, "wss://relay.example.com/ai-realtime-chat");
        assert_eq!(config.connection.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.connection.ready_status, "ready");
        assert_eq!(config.audio.block_size, 2048);
        assert_eq!(config.audio.input_device, "USB Microphone");
        assert_eq!(config.audio.output_device, "speakers");
        assert!(config.playback.muted);
    }

    #[test]
    fn test_config_default_values() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.connection.ready_status, "connected_to_openai");
        assert!(config.connection.auth_token.is_none());
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.block_size, 4096);
        assert_eq!(config.audio.input_device, "default");
        assert_eq!(config.audio.output_device, "default");
        assert!(!config.playback.muted);
    }

    #[test]
    fn test_config_env_var_interpolation() {
        std::env::set_var("VOXLINK_TEST_TOKEN", "secret123");
        let toml_str = r#"
[connection]
auth_token = "${VOXLINK_TEST_TOKEN}"
"#;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.connection.auth_token.as_deref(), Some("secret123"));
        std::env::remove_var("VOXLINK_TEST_TOKEN");
    }

    #[test]
    fn test_config_missing_env_var_error() {
        let toml_str = r#"
[connection]
auth_token = "${DEFINITELY_DOES_NOT_EXIST_12345}"
"#;
        let err = AppConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("DEFINITELY_DOES_NOT_EXIST_12345"));
    }

    #[test]
    fn test_config_invalid_toml_error() {
        let result = AppConfig::from_toml_str("this is not valid toml [[[");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_config_rejects_zero_block_size() {
        let result = AppConfig::from_toml_str("[audio]\nblock_size = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_rejects_non_wire_sample_rate() {
        match AppConfig::from_toml_str("[audio]\nsample_rate = 48000\n") {
            Err(ConfigError::Invalid(msg)) => {
                assert!(msg.contains("audio.sample_rate"));
                assert!(msg.contains("48000"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(AppConfig::from_toml_str("[audio]\nsample_rate = 24000\n").is_ok());
    }

    #[test]
    fn test_config_rejects_http_url() {
        let result = AppConfig::from_toml_str("[connection]\nurl = \"https://example.com\"\n");
        match result {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("connection.url")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = std::env::temp_dir().join("voxlink_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.toml");
        std::fs::write(
            &path,
            r#"
[general]
log_level = "warn"

[audio]
block_size = 1024
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.audio.block_size, 1024);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_config_load_from_file_not_found() {
        let result = AppConfig::load_from_file(Path::new("/nonexistent/path.toml"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("failed to read config file"));
    }
}
