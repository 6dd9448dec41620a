//! Configuration file support for Breathwork.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/breathwork/config.toml`.

use crate::sound::SoundKind;
use crate::{Error, Result, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    /// Defaults for new sessions
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub sound: SoundConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Ambient sound preferences
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SoundConfig {
    #[serde(default = "default_sound")]
    pub sound: String,

    /// Percent, 0-100
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Start the sound together with the session
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sound: default_sound(),
            volume: default_volume(),
            auto_start: true,
        }
    }
}

impl SoundConfig {
    /// Configured sound, or silence when the name is not recognised
    pub fn kind(&self) -> SoundKind {
        self.sound.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown sound '{}' in config, using none", self.sound);
            SoundKind::None
        })
    }

    /// Volume as a 0-1 fraction
    pub fn volume_fraction(&self) -> f64 {
        f64::from(self.volume.min(100)) / 100.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_instructions: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_instructions: true,
        }
    }
}

// Default value functions
fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| home_dir().join(".local/share"));
    base.join("breathwork")
}

fn default_sound() -> String {
    SoundKind::Rain.key().into()
}

fn default_volume() -> u8 {
    30
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| home_dir().join(".config"));
        base.join("breathwork").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GoalType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.technique, "box");
        assert_eq!(config.session.goal_type, GoalType::Breaths);
        assert_eq!(config.session.goal_value, 10);
        assert_eq!(config.sound.kind(), SoundKind::Rain);
        assert_eq!(config.sound.volume, 30);
        assert!(config.sound.auto_start);
        assert!(config.display.show_instructions);
        assert!(config.data.data_dir.ends_with("breathwork"));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.technique = "coherent".into();
        config.session.custom_timing.insert("inhale".into(), 6.0);
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[session]
technique = "478"
goal_type = "duration"

[sound]
volume = 55
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.technique, "478");
        assert_eq!(config.session.goal_type, GoalType::Duration);
        assert_eq!(config.session.goal_value, 10); // default
        assert_eq!(config.sound.sound, "rain"); // default
        assert!((config.sound.volume_fraction() - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_sound_is_silent() {
        let config: Config = toml::from_str("[sound]\nsound = \"thunder\"\n").unwrap();
        assert_eq!(config.sound.kind(), SoundKind::None);
    }

    #[test]
    fn test_invalid_goal_type_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[session]\ngoal_type = \"laps\"\n");
        assert!(result.is_err());
    }
}
