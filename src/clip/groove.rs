// Groove - Repeating per-subdivision timing offsets

use crate::sequencer::timeline::BeatPosition;
use serde::{Deserialize, Serialize};

/// Largest lateness of one subdivision, keeps the mapping monotonic.
const MAX_LATENESS: f32 = 0.49;

/// Timing template applied to beat positions on playback.
///
/// `latenesses[i]` shifts the i-th subdivision of the pattern by that
/// fraction of a subdivision (negative = rush, positive = drag). Positions
/// between subdivisions are interpolated linearly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrooveTemplate {
    name: String,
    notes_per_beat: u32,
    latenesses: Vec<f32>,
    /// Whether the clip's groove strength scales the offsets
    parameterized: bool,
}

impl GrooveTemplate {
    pub fn new(name: &str, notes_per_beat: u32, latenesses: Vec<f32>, parameterized: bool) -> Self {
        assert!(notes_per_beat > 0, "Groove notes per beat must be > 0");

        let latenesses = if latenesses.is_empty() {
            vec![0.0]
        } else {
            latenesses
                .into_iter()
                .map(|l| l.clamp(-MAX_LATENESS, MAX_LATENESS))
                .collect()
        };

        Self {
            name: name.to_string(),
            notes_per_beat,
            latenesses,
            parameterized,
        }
    }

    /// Swing template delaying every second subdivision.
    pub fn swing(name: &str, notes_per_beat: u32, amount: f32) -> Self {
        Self::new(name, notes_per_beat, vec![0.0, amount], true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn notes_per_beat(&self) -> u32 {
        self.notes_per_beat
    }

    pub fn latenesses(&self) -> &[f32] {
        &self.latenesses
    }

    pub fn is_parameterized(&self) -> bool {
        self.parameterized
    }

    pub fn is_empty(&self) -> bool {
        self.latenesses.iter().all(|l| *l == 0.0)
    }

    /// Maps `beat` through the template. Strength (0.0-1.0) only applies to
    /// parameterized templates.
    pub fn beats_with_groove(&self, beat: BeatPosition, strength: f32) -> BeatPosition {
        if self.is_empty() {
            return beat;
        }

        let strength = if self.parameterized {
            strength.clamp(0.0, 1.0) as f64
        } else {
            1.0
        };
        if strength == 0.0 {
            return beat;
        }

        let subdivision = 1.0 / self.notes_per_beat as f64;
        let position = beat.in_beats() / subdivision;
        let index = position.floor();
        let fraction = position - index;

        let count = self.latenesses.len() as i64;
        let lateness = |i: i64| self.latenesses[i.rem_euclid(count) as usize] as f64 * strength;

        let i = index as i64;
        let from = (index + lateness(i)) * subdivision;
        let to = (index + 1.0 + lateness(i + 1)) * subdivision;
        BeatPosition::from_beats(from + (to - from) * fraction)
    }
}

/// Registry of groove templates available to clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrooveTemplateManager {
    templates: Vec<GrooveTemplate>,
}

impl GrooveTemplateManager {
    /// Manager holding the built-in swing templates.
    pub fn new() -> Self {
        Self {
            templates: vec![
                GrooveTemplate::swing("Basic 8th Swing", 2, 0.33),
                GrooveTemplate::swing("Basic 16th Swing", 4, 0.33),
                GrooveTemplate::swing("Light 8th Swing", 2, 0.15),
                GrooveTemplate::new("Laid Back", 4, vec![0.1, 0.1, 0.1, 0.1], true),
            ],
        }
    }

    pub fn num_templates(&self) -> usize {
        self.templates.len()
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.iter().map(GrooveTemplate::name).collect()
    }

    pub fn template_by_name(&self, name: &str) -> Option<&GrooveTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Adds a template, replacing one with the same name.
    pub fn add_template(&mut self, template: GrooveTemplate) {
        match self.templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => self.templates.push(template),
        }
    }

    pub fn remove_template(&mut self, name: &str) {
        self.templates.retain(|t| t.name != name);
    }
}

impl Default for GrooveTemplateManager {
    fn default() -> Self {
        Self::new()
    }
}
