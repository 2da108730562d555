// Engine configuration - Defaults for new edits and clips
// Stored as RON, every field optional

use crate::sequencer::timeline::{MidiChannel, Tempo, TimeSignature};
use crate::store::undo::DEFAULT_MAX_HISTORY;
use ron::{from_str as ron_from_str, to_string as ron_to_string};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Undo steps kept by an edit
    pub undo_history_limit: usize,
    pub default_tempo_bpm: f64,
    pub default_time_signature: TimeSignature,
    pub default_note_velocity: u8,
    pub default_midi_channel: u8,
    /// Whether new clips precompute their playback stream
    pub use_proxy_by_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            undo_history_limit: DEFAULT_MAX_HISTORY,
            default_tempo_bpm: 120.0,
            default_time_signature: TimeSignature::four_four(),
            default_note_velocity: 100,
            default_midi_channel: 1,
            use_proxy_by_default: true,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a RON config
    pub fn from_ron_str(ron_data: &str) -> Result<Self, ConfigError> {
        let config: Self = ron_from_str(ron_data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ron_data = std::fs::read_to_string(path)?;
        Self::from_ron_str(&ron_data)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron_to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.undo_history_limit == 0 {
            return Err(ConfigError::Invalid("undo history limit must be > 0".to_string()));
        }
        if !(Tempo::MIN_BPM..=Tempo::MAX_BPM).contains(&self.default_tempo_bpm) {
            return Err(ConfigError::Invalid(format!(
                "default tempo {} BPM is outside {}-{}",
                self.default_tempo_bpm,
                Tempo::MIN_BPM,
                Tempo::MAX_BPM
            )));
        }
        if !(1..=127).contains(&self.default_note_velocity) {
            return Err(ConfigError::Invalid(format!(
                "default velocity {} is outside 1-127",
                self.default_note_velocity
            )));
        }
        if MidiChannel::try_new(self.default_midi_channel as i64).is_none() {
            return Err(ConfigError::Invalid(format!(
                "default MIDI channel {} is outside 1-16",
                self.default_midi_channel
            )));
        }
        Ok(())
    }

    pub fn default_tempo(&self) -> Tempo {
        Tempo::clamped(self.default_tempo_bpm)
    }

    pub fn default_channel(&self) -> MidiChannel {
        MidiChannel::try_new(self.default_midi_channel as i64).unwrap_or_default()
    }
}
