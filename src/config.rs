use crate::types::StreamKind;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub buffers: BufferConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TrackerConfig {
    pub address: String,
    pub frequency: Option<f32>,
    pub tracking_mode: Option<String>,
}

/// Initial per-stream buffer reservations (records, not bytes).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferConfig {
    pub gaze: usize,
    pub eye_image: usize,
    pub ext_signal: usize,
    pub time_sync: usize,
    pub positioning: usize,
    pub notification: usize,
    pub driver_log: usize,
    /// Whether `stop` clears the stream's buffer when not told otherwise.
    pub stop_clears_buffer: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub collect_driver_log: bool,
    pub log_level: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            address: "tet-tcp://169.254.0.1".to_string(),
            frequency: None,
            tracking_mode: None,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            gaze: 2 << 19, // about half an hour at 600Hz
            eye_image: 2 << 11,
            ext_signal: 2 << 9,
            time_sync: 2 << 9,
            positioning: 2 << 11,
            notification: 2 << 6,
            driver_log: 2 << 8,
            stop_clears_buffer: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            collect_driver_log: true,
            log_level: "info".to_string(),
        }
    }
}

impl BufferConfig {
    /// Default reservation for one stream's buffer. Inlet buffers use the
    /// same defaults as their local counterparts.
    pub fn reservation(&self, stream: StreamKind) -> usize {
        match stream.buffer_kind() {
            StreamKind::Gaze => self.gaze,
            StreamKind::EyeImage => self.eye_image,
            StreamKind::ExtSignal => self.ext_signal,
            StreamKind::TimeSync => self.time_sync,
            StreamKind::Positioning => self.positioning,
            StreamKind::Notification => self.notification,
            StreamKind::EyeOpenness => unreachable!("openness maps to the gaze buffer"),
        }
    }
}

/// Load configuration from file with layered fallbacks
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else if Path::new("gazelink.toml").exists() {
        builder = builder.add_source(File::with_name("gazelink.toml"));
    }

    // Add environment variable overrides with prefix "GAZELINK_"
    builder = builder.add_source(
        Environment::with_prefix("GAZELINK")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize::<AppConfig>()
}

/// Load configuration with better error handling and defaults
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    match load_config(config_path) {
        Ok(config) => {
            log::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stream_reservations() {
        let buffers = BufferConfig::default();
        assert_eq!(buffers.reservation(StreamKind::Gaze), 2 << 19);
        assert_eq!(buffers.reservation(StreamKind::EyeOpenness), 2 << 19);
        assert_eq!(buffers.reservation(StreamKind::Notification), 2 << 6);
        assert!(!buffers.stop_clears_buffer);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/gazelink.toml"))).is_err());
    }
}
