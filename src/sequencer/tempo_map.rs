// Tempo map - Beat/time conversion
// Piecewise-constant tempo sequence used to convert between beats and seconds

use crate::sequencer::timeline::{BeatPosition, Tempo, TimePosition, TimeSignature};
use serde::{Deserialize, Serialize};

/// Conversion contract between musical and real time
pub trait TempoMap {
    fn beats_to_time(&self, beat: BeatPosition) -> TimePosition;
    fn time_to_beats(&self, time: TimePosition) -> BeatPosition;
    fn tempo_at(&self, beat: BeatPosition) -> Tempo;
    fn time_signature_at(&self, beat: BeatPosition) -> TimeSignature;

    fn is_click_enabled(&self) -> bool {
        false
    }

    fn is_transport_enabled(&self) -> bool {
        true
    }
}

/// A tempo and time signature taking effect at a beat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoChange {
    pub beat: BeatPosition,
    pub tempo: Tempo,
    pub time_signature: TimeSignature,
}

/// Ordered list of tempo changes, the first one always at beat 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoSequence {
    changes: Vec<TempoChange>,
    click_enabled: bool,
    transport_enabled: bool,
}

impl TempoSequence {
    pub fn new(tempo: Tempo, time_signature: TimeSignature) -> Self {
        Self {
            changes: vec![TempoChange {
                beat: BeatPosition::zero(),
                tempo,
                time_signature,
            }],
            click_enabled: false,
            transport_enabled: true,
        }
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn num_changes(&self) -> usize {
        self.changes.len()
    }

    /// Inserts a change, replacing any existing change at the same beat.
    /// Changes before beat 0 are moved to beat 0.
    pub fn insert_change(&mut self, beat: BeatPosition, tempo: Tempo, time_signature: TimeSignature) {
        let beat = beat.max(BeatPosition::zero());
        let change = TempoChange {
            beat,
            tempo,
            time_signature,
        };

        match self
            .changes
            .binary_search_by(|c| c.beat.total_cmp(&beat))
        {
            Ok(index) => self.changes[index] = change,
            Err(index) => self.changes.insert(index, change),
        }
    }

    /// Inserts a tempo change keeping the time signature in effect
    pub fn insert_tempo(&mut self, beat: BeatPosition, tempo: Tempo) {
        let time_signature = self.time_signature_at(beat);
        self.insert_change(beat, tempo, time_signature);
    }

    /// Removes every change after the first
    pub fn clear_changes(&mut self) {
        self.changes.truncate(1);
    }

    pub fn set_click_enabled(&mut self, enabled: bool) {
        self.click_enabled = enabled;
    }

    pub fn set_transport_enabled(&mut self, enabled: bool) {
        self.transport_enabled = enabled;
    }

    fn change_index_at(&self, beat: BeatPosition) -> usize {
        self.changes
            .iter()
            .rposition(|c| c.beat <= beat)
            .unwrap_or(0)
    }
}

impl Default for TempoSequence {
    fn default() -> Self {
        Self::new(Tempo::default(), TimeSignature::default())
    }
}

impl TempoMap for TempoSequence {
    fn beats_to_time(&self, beat: BeatPosition) -> TimePosition {
        let beats = beat.in_beats();
        let first = &self.changes[0];

        if beats <= 0.0 {
            return TimePosition::from_seconds(beats * first.tempo.beat_duration_seconds());
        }

        let mut seconds = 0.0;
        for (i, change) in self.changes.iter().enumerate() {
            let segment_start = change.beat.in_beats();
            let segment_end = self
                .changes
                .get(i + 1)
                .map_or(f64::INFINITY, |next| next.beat.in_beats());

            if beats < segment_end {
                seconds += (beats - segment_start) * change.tempo.beat_duration_seconds();
                break;
            }

            seconds += (segment_end - segment_start) * change.tempo.beat_duration_seconds();
        }

        TimePosition::from_seconds(seconds)
    }

    fn time_to_beats(&self, time: TimePosition) -> BeatPosition {
        let seconds = time.in_seconds();
        let first = &self.changes[0];

        if seconds <= 0.0 {
            return BeatPosition::from_beats(seconds / first.tempo.beat_duration_seconds());
        }

        let mut elapsed = 0.0;
        for (i, change) in self.changes.iter().enumerate() {
            let beat_duration = change.tempo.beat_duration_seconds();
            let segment_start = change.beat.in_beats();

            let Some(next) = self.changes.get(i + 1) else {
                return BeatPosition::from_beats(segment_start + (seconds - elapsed) / beat_duration);
            };

            let segment_seconds = (next.beat.in_beats() - segment_start) * beat_duration;
            if seconds < elapsed + segment_seconds {
                return BeatPosition::from_beats(segment_start + (seconds - elapsed) / beat_duration);
            }

            elapsed += segment_seconds;
        }

        BeatPosition::zero()
    }

    fn tempo_at(&self, beat: BeatPosition) -> Tempo {
        self.changes[self.change_index_at(beat)].tempo
    }

    fn time_signature_at(&self, beat: BeatPosition) -> TimeSignature {
        self.changes[self.change_index_at(beat)].time_signature
    }

    fn is_click_enabled(&self) -> bool {
        self.click_enabled
    }

    fn is_transport_enabled(&self) -> bool {
        self.transport_enabled
    }
}
