use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Daemon configuration, read from `lumend/config.toml` in the user's
/// config directory
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// DRM connector the built-in panel hangs off, used to match raw
    /// backlight devices (e.g. "DSI-1")
    pub connector: Option<String>,
    /// Follow the ambient light sensor with the backlight
    pub auto_brightness: bool,
    /// Switch high contrast on bright ambient light
    pub auto_high_contrast: bool,
    /// Ambient light level in lux above which high contrast is wanted
    #[serde(default = "default_high_contrast_threshold")]
    pub high_contrast_threshold: u32,
    /// Brightness percentage applied while dimmed
    #[serde(default = "default_idle_brightness")]
    pub idle_brightness: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector: None,
            auto_brightness: false,
            auto_high_contrast: false,
            high_contrast_threshold: default_high_contrast_threshold(),
            idle_brightness: default_idle_brightness(),
        }
    }
}

fn default_high_contrast_threshold() -> u32 {
    500
}

fn default_idle_brightness() -> u32 {
    30
}

impl Config {
    /// Default configuration file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("lumend")
            .join("config.toml")
    }

    /// Load a configuration file, falling back to defaults when it does
    /// not exist
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };

        let mut config: Config =
            toml::from_str(&text).map_err(|err| AppError::Config(err.to_string()))?;
        config.idle_brightness = config.idle_brightness.min(100);
        Ok(config)
    }

    /// Load the configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::path())
    }

    /// Whether any configured feature needs ambient light readings
    pub fn wants_sensor(&self) -> bool {
        self.auto_brightness || self.auto_high_contrast
    }

    /// High contrast threshold in lux
    pub fn threshold_lux(&self) -> f64 {
        f64::from(self.high_contrast_threshold)
    }

    /// Dimming target as a fraction of the brightness range
    pub fn idle_target(&self) -> f64 {
        f64::from(self.idle_brightness) * 0.01
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.high_contrast_threshold, 500);
        assert_eq!(config.idle_brightness, 30);
        assert!(!config.wants_sensor());
    }

    #[test]
    fn parses_all_keys() {
        let config: Config = toml::from_str(
            r#"
            connector = "DSI-1"
            auto_brightness = true
            auto_high_contrast = true
            high_contrast_threshold = 700
            idle_brightness = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.connector.as_deref(), Some("DSI-1"));
        assert!(config.auto_brightness);
        assert!(config.auto_high_contrast);
        assert_eq!(config.threshold_lux(), 700.0);
        assert_eq!(config.idle_target(), 0.1);
        assert!(config.wants_sensor());
    }

    #[test]
    fn idle_brightness_is_clamped_on_load() {
        let dir = std::env::temp_dir().join("lumend-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "idle_brightness = 250\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.idle_brightness, 100);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/lumend/config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = std::env::temp_dir().join("lumend-config-test-broken");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "idle_brightness = \"plenty\"\n").unwrap();

        assert!(matches!(Config::load(&path), Err(AppError::Config(_))));

        std::fs::remove_file(&path).unwrap();
    }
}
