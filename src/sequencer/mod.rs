// Sequencer module
// Musical time representation and tempo mapping

pub mod tempo_map;
pub mod timeline;

pub use tempo_map::{TempoChange, TempoMap, TempoSequence};
pub use timeline::{
    BeatDuration, BeatPosition, BeatRange, MidiChannel, Tempo, TimeDuration, TimePosition,
    TimeRange, TimeSignature,
};
