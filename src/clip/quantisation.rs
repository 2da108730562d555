// Quantisation - Snapping beat positions to a grid

use crate::sequencer::timeline::{BeatDuration, BeatPosition};
use serde::{Deserialize, Serialize};

/// Named grid sizes, in beats. A size of 0 disables quantisation.
const QUANTISE_TYPES: &[(&str, f64)] = &[
    ("(none)", 0.0),
    ("1/64 beat", 1.0 / 64.0),
    ("1/32 beat", 1.0 / 32.0),
    ("1/24 beat", 1.0 / 24.0),
    ("1/16 beat", 1.0 / 16.0),
    ("1/12 beat", 1.0 / 12.0),
    ("1/9 beat", 1.0 / 9.0),
    ("1/8 beat", 1.0 / 8.0),
    ("1/6 beat", 1.0 / 6.0),
    ("1/4 beat", 1.0 / 4.0),
    ("1/3 beat", 1.0 / 3.0),
    ("1/2 beat", 1.0 / 2.0),
    ("1 beat", 1.0),
    ("2 beats", 2.0),
    ("1 bar", 4.0),
];

/// Quantisation policy applied to note positions on playback
///
/// Serialized with the type name, unknown names fail to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuantisationSettings", into = "QuantisationSettings")]
pub struct QuantisationType {
    type_index: usize,

    /// How far events move towards the grid (0.0-1.0)
    proportion: f64,

    quantise_note_offs: bool,
}

impl QuantisationType {
    /// No quantisation, full strength when enabled
    pub fn new() -> Self {
        Self {
            type_index: 0,
            proportion: 1.0,
            quantise_note_offs: false,
        }
    }

    /// Looks up a named type, e.g. "1/16 beat"
    pub fn from_name(name: &str) -> Option<Self> {
        let type_index = QUANTISE_TYPES.iter().position(|(n, _)| *n == name)?;
        Some(Self {
            type_index,
            ..Self::new()
        })
    }

    pub fn type_names() -> impl Iterator<Item = &'static str> {
        QUANTISE_TYPES.iter().map(|(name, _)| *name)
    }

    pub fn type_name(&self) -> &'static str {
        QUANTISE_TYPES[self.type_index].0
    }

    /// Returns false for unknown names
    pub fn set_type_name(&mut self, name: &str) -> bool {
        match QUANTISE_TYPES.iter().position(|(n, _)| *n == name) {
            Some(index) => {
                self.type_index = index;
                true
            }
            None => false,
        }
    }

    pub fn grid_size(&self) -> BeatDuration {
        BeatDuration::from_beats(QUANTISE_TYPES[self.type_index].1)
    }

    pub fn proportion(&self) -> f64 {
        self.proportion
    }

    pub fn set_proportion(&mut self, proportion: f64) {
        self.proportion = if proportion.is_nan() {
            1.0
        } else {
            proportion.clamp(0.0, 1.0)
        };
    }

    pub fn is_quantising_note_offs(&self) -> bool {
        self.quantise_note_offs
    }

    pub fn set_quantising_note_offs(&mut self, quantise: bool) {
        self.quantise_note_offs = quantise;
    }

    pub fn is_enabled(&self) -> bool {
        self.grid_size().in_beats() > 0.0 && self.proportion > 0.0
    }

    /// Moves `beat` towards the nearest grid line by the proportion
    pub fn round_beat_to_nearest(&self, beat: BeatPosition) -> BeatPosition {
        if !self.is_enabled() {
            return beat;
        }

        let grid = self.grid_size().in_beats();
        let b = beat.in_beats();
        let snapped = (b / grid).round() * grid;
        if self.proportion >= 1.0 {
            return BeatPosition::from_beats(snapped);
        }
        BeatPosition::from_beats(b + (snapped - b) * self.proportion)
    }

    /// Quantised note start and end. Without note-off quantisation the
    /// length is kept.
    pub fn quantise_note(&self, start: BeatPosition, end: BeatPosition) -> (BeatPosition, BeatPosition) {
        let new_start = self.round_beat_to_nearest(start);
        let new_end = if self.quantise_note_offs {
            self.round_beat_to_nearest(end)
        } else {
            new_start + (end - start)
        };
        (new_start, new_end)
    }
}

impl Default for QuantisationType {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
struct QuantisationSettings {
    type_name: String,
    proportion: f64,
    quantise_note_offs: bool,
}

impl TryFrom<QuantisationSettings> for QuantisationType {
    type Error = String;

    fn try_from(settings: QuantisationSettings) -> Result<Self, Self::Error> {
        let mut quantisation = Self::from_name(&settings.type_name)
            .ok_or_else(|| format!("unknown quantisation type '{}'", settings.type_name))?;
        quantisation.set_proportion(settings.proportion);
        quantisation.set_quantising_note_offs(settings.quantise_note_offs);
        Ok(quantisation)
    }
}

impl From<QuantisationType> for QuantisationSettings {
    fn from(quantisation: QuantisationType) -> Self {
        Self {
            type_name: quantisation.type_name().to_string(),
            proportion: quantisation.proportion,
            quantise_note_offs: quantisation.quantise_note_offs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats(b: f64) -> BeatPosition {
        BeatPosition::from_beats(b)
    }

    #[test]
    fn test_default_is_disabled() {
        let q = QuantisationType::new();
        assert!(!q.is_enabled());
        assert_eq!(q.type_name(), "(none)");
        assert_eq!(q.round_beat_to_nearest(beats(1.13)), beats(1.13));
    }

    #[test]
    fn test_quantize_to_sixteenths() {
        let q = QuantisationType::from_name("1/4 beat").unwrap();
        assert_eq!(q.round_beat_to_nearest(beats(1.1)).in_beats(), 1.0);
        assert_eq!(q.round_beat_to_nearest(beats(1.2)).in_beats(), 1.25);
        assert_eq!(q.round_beat_to_nearest(beats(-0.2)).in_beats(), -0.25);
    }

    #[test]
    fn test_partial_proportion() {
        let mut q = QuantisationType::from_name("1 beat").unwrap();
        q.set_proportion(0.5);
        assert_eq!(q.round_beat_to_nearest(beats(1.5 - 0.25)).in_beats(), 1.125);

        q.set_proportion(4.0);
        assert_eq!(q.proportion(), 1.0);
    }

    #[test]
    fn test_quantise_note_keeps_length() {
        let mut q = QuantisationType::from_name("1/2 beat").unwrap();
        let (s, e) = q.quantise_note(beats(0.9), beats(1.6));
        assert_eq!(s.in_beats(), 1.0);
        assert!((e.in_beats() - 1.7).abs() < 1e-9);

        q.set_quantising_note_offs(true);
        let (s, e) = q.quantise_note(beats(0.9), beats(1.6));
        assert_eq!((s.in_beats(), e.in_beats()), (1.0, 1.5));
    }

    #[test]
    fn test_names() {
        let mut q = QuantisationType::new();
        assert!(q.set_type_name("1 bar"));
        assert_eq!(q.grid_size().in_beats(), 4.0);
        assert!(!q.set_type_name("1/5 beat"));
        assert_eq!(QuantisationType::type_names().count(), QUANTISE_TYPES.len());
    }

    #[test]
    fn test_serialized_by_name() {
        let mut q = QuantisationType::from_name("1/8 beat").unwrap();
        q.set_proportion(0.25);
        q.set_quantising_note_offs(true);

        let text = ron::to_string(&q).unwrap();
        assert!(text.contains("1/8 beat"));
        let restored: QuantisationType = ron::from_str(&text).unwrap();
        assert_eq!(restored, q);

        let unknown = r#"(type_name: "1/5 beat", proportion: 1.0, quantise_note_offs: false)"#;
        assert!(ron::from_str::<QuantisationType>(unknown).is_err());
    }
}
