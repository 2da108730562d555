// Looping - Repeating a loop window across a clip
// Maps list beats of each repetition into the looped list

use crate::sequence::MidiList;
use crate::sequencer::timeline::{BeatDuration, BeatPosition, BeatRange};
use crate::store::ids;
use serde::{Deserialize, Serialize};

/// Upper bound on repetitions built for one clip
const MAX_REPETITIONS: usize = 10_000;

/// What the first repetition of a looped clip plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopedSequenceType {
    /// Every repetition, the first included, plays the loop window
    #[default]
    LoopRangeDefinesAllRepetitions,
    /// The original sequence plays once, then the loop window repeats
    LoopRangeDefinesSubsequentRepetitions,
}

impl LoopedSequenceType {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::LoopRangeDefinesAllRepetitions => 0,
            Self::LoopRangeDefinesSubsequentRepetitions => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::LoopRangeDefinesSubsequentRepetitions,
            _ => Self::LoopRangeDefinesAllRepetitions,
        }
    }
}

/// One copy of part of the source list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Repetition {
    /// Source beats copied by this repetition
    pub source: BeatRange,
    /// Added to source beats to place them in the looped list
    pub shift: BeatDuration,
}

impl Repetition {
    /// Looped position of an event at `beat`, if this repetition copies it
    pub fn map_beat(&self, beat: BeatPosition) -> Option<BeatPosition> {
        self.source.contains(beat).then(|| beat + self.shift)
    }

    /// Looped start and length of a note, truncated at the end of the source range
    pub fn map_note(&self, start: BeatPosition, length: BeatDuration) -> Option<(BeatPosition, BeatDuration)> {
        if !self.source.contains(start) {
            return None;
        }

        let length = if start + length > self.source.end {
            self.source.end - start
        } else {
            length
        };
        Some((start + self.shift, length))
    }
}

/// Loop settings of a clip, in beats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopGeometry {
    pub loop_start: BeatPosition,
    /// Zero or less disables looping
    pub loop_length: BeatDuration,
    /// Length of the content before looping was enabled
    pub original_length: BeatDuration,
    /// How far into the content the clip starts
    pub offset: BeatDuration,
    /// Clip length on the timeline
    pub length: BeatDuration,
    pub sequence_type: LoopedSequenceType,
}

impl LoopGeometry {
    pub fn not_looping(offset: BeatDuration, length: BeatDuration) -> Self {
        Self {
            loop_start: BeatPosition::zero(),
            loop_length: BeatDuration::zero(),
            original_length: length,
            offset,
            length,
            sequence_type: LoopedSequenceType::default(),
        }
    }

    pub fn is_looping(&self) -> bool {
        self.loop_length.in_beats() > 0.0
    }

    pub fn loop_range(&self) -> BeatRange {
        BeatRange::with_length(self.loop_start, self.loop_length)
    }

    /// Repetitions needed to fill the clip, in playing order
    pub fn repetitions(&self) -> Vec<Repetition> {
        if !self.is_looping() {
            return vec![Repetition {
                source: BeatRange::new(
                    BeatPosition::from_beats(f64::NEG_INFINITY),
                    BeatPosition::from_beats(f64::INFINITY),
                ),
                shift: BeatDuration::zero(),
            }];
        }

        let window = self.loop_range();
        let span = (self.offset + self.length).in_beats();
        let loop_length = self.loop_length.in_beats();
        let mut repetitions = Vec::new();

        // Looped-list beat where the render span ends
        let span_end = match self.sequence_type {
            LoopedSequenceType::LoopRangeDefinesAllRepetitions => self.loop_start.in_beats() + span,
            LoopedSequenceType::LoopRangeDefinesSubsequentRepetitions => span,
        };
        let clamped = |source: BeatRange, shift: f64| Repetition {
            source: BeatRange::new(
                source.start,
                BeatPosition::from_beats(source.end.in_beats().min(span_end - shift).max(source.start.in_beats())),
            ),
            shift: BeatDuration::from_beats(shift),
        };

        let first_loop_start = match self.sequence_type {
            LoopedSequenceType::LoopRangeDefinesAllRepetitions => 0.0,
            LoopedSequenceType::LoopRangeDefinesSubsequentRepetitions => {
                let original = BeatRange::new(BeatPosition::zero(), BeatPosition::zero() + self.original_length);
                repetitions.push(clamped(original, 0.0));
                self.original_length.in_beats()
            }
        };

        // Positions relative to the looped list origin
        let mut index = 0;
        loop {
            let rep_start = first_loop_start + index as f64 * loop_length;
            if rep_start >= span {
                break;
            }
            if repetitions.len() >= MAX_REPETITIONS {
                log::warn!("clip loop truncated after {} repetitions", MAX_REPETITIONS);
                break;
            }

            let shift = match self.sequence_type {
                LoopedSequenceType::LoopRangeDefinesAllRepetitions => rep_start,
                LoopedSequenceType::LoopRangeDefinesSubsequentRepetitions => {
                    rep_start - self.loop_start.in_beats()
                }
            };
            repetitions.push(clamped(window, shift));
            index += 1;
        }

        repetitions
    }

    /// Added to looped-list beats to get edit beats for a clip starting at `clip_start`
    pub fn content_offset(&self, clip_start: BeatPosition) -> BeatDuration {
        let origin = match (self.is_looping(), self.sequence_type) {
            (true, LoopedSequenceType::LoopRangeDefinesAllRepetitions) => self.loop_start.in_beats(),
            _ => 0.0,
        };
        BeatDuration::from_beats(clip_start.in_beats() - origin - self.offset.in_beats())
    }
}

/// Builds the looped version of `source` in a standalone store
///
/// Without looping the result is a plain copy. Notes crossing the end of a
/// repetition, or the end of the clip, are cut there.
pub fn create_sequence_looped(source: &MidiList, geometry: &LoopGeometry) -> MidiList {
    let looped = MidiList::new();
    looped.set_midi_channel(source.midi_channel(), None);
    looped.set_comp_list(source.is_comp_list(), None);

    if !geometry.is_looping() {
        looped.add_from(source, None);
        return looped;
    }

    let repetitions = geometry.repetitions();
    let store = looped.store();

    let notes = source.notes();
    for repetition in &repetitions {
        for note in notes.iter() {
            if let Some((start, length)) = repetition.map_note(note.start_beat(), note.length_beats()) {
                let id = looped.add_note(note.note_number(), start, length, note.velocity(), note.colour(), None);
                if note.is_muted() {
                    store.set_property(id, ids::NOTE_MUTE, true, None);
                }
            }
        }
    }

    let controllers = source.controller_events();
    for repetition in &repetitions {
        for event in controllers.iter() {
            if let Some(beat) = repetition.map_beat(event.beat_position()) {
                looped.add_controller_event(event.controller_type(), beat, event.controller_value(), event.metadata(), None);
            }
        }
    }

    let sysexes = source.sysex_events();
    for repetition in &repetitions {
        for event in sysexes.iter() {
            if let Some(beat) = repetition.map_beat(event.beat_position()) {
                looped.add_sysex_event(event.data(), beat, None);
            }
        }
    }

    log::debug!(
        "built looped sequence: {} repetitions, {} notes",
        repetitions.len(),
        looped.num_notes()
    );
    looped
}
