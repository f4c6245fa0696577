use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{EngineConfig, StretchQuality, TransportConfig};

/// Returns the path to the settings file: `~/.config/looper-rs/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("looper-rs");
    path.push("settings.json");
    path
}

/// Persisted player settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Playback
    pub volume_db: f32,
    pub time_ratio: f64,
    pub pitch_scale: f64,
    pub backwards: bool,
    pub playlist_mode: bool,

    // Transport
    pub loop_fade_frames: usize,
    pub transport_fade_frames: usize,
    pub pause_rewind_frames: usize,
    pub stretch_quality: StretchQuality,

    // Audio output
    pub output_device: Option<String>,

    /// Named playlist restored on startup
    pub last_playlist: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            volume_db: 0.0,
            time_ratio: 1.0,
            pitch_scale: 1.0,
            backwards: false,
            playlist_mode: false,

            loop_fade_frames: transport.loop_fade_frames,
            transport_fade_frames: transport.transport_fade_frames,
            pause_rewind_frames: transport.pause_rewind_frames,
            stretch_quality: StretchQuality::default(),

            output_device: None,
            last_playlist: None,
        }
    }
}

impl AppSettings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        self.save_to(&settings_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write settings: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            loop_fade_frames: self.loop_fade_frames,
            transport_fade_frames: self.transport_fade_frames,
            pause_rewind_frames: self.pause_rewind_frames,
        }
    }

    /// Engine configuration for an output running at `sample_rate`
    pub fn engine_config(&self, sample_rate: u32) -> EngineConfig {
        EngineConfig {
            sample_rate,
            transport: self.transport_config(),
            stretch_quality: self.stretch_quality,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{ "volume_db": -3.0 }"#).unwrap();
        assert_eq!(settings.volume_db, -3.0);
        assert_eq!(settings.loop_fade_frames, 256);
        assert_eq!(settings.transport_fade_frames, 2048);
        assert_eq!(settings.stretch_quality, StretchQuality::Standard);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper-rs").join("settings.json");

        let settings = AppSettings {
            time_ratio: 0.75,
            backwards: true,
            stretch_quality: StretchQuality::Tape,
            output_device: Some("Speakers".to_string()),
            ..AppSettings::default()
        };
        settings.save_to(&path);

        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_unreadable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ broken").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn test_engine_config_carries_fades() {
        let settings = AppSettings {
            pause_rewind_frames: 4800,
            ..AppSettings::default()
        };
        let config = settings.engine_config(44100);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.transport.pause_rewind_frames, 4800);
    }
}
