// MyMusic MIDI engine - MIDI lists, clips and playback streams

pub mod clip;
pub mod config;
pub mod edit;
pub mod midi;
pub mod sequence;
pub mod sequencer;
pub mod store;

// Re-export commonly used types for convenience
pub use clip::{
    CompRegion, GrooveTemplate, GrooveTemplateManager, LoopedSequenceType, MidiClip, PlaybackSource,
    QuantisationType,
};
pub use config::{ConfigError, EngineConfig};
pub use edit::Edit;
pub use midi::{MidiFileError, MidiMessage, MidiMessageSequence, TimedMidiMessage};
pub use sequence::{
    MidiControllerEvent, MidiList, MidiNote, MidiSysexEvent, NoteAutomationType, PlaybackParams, TimeBase,
};
pub use sequencer::{
    BeatDuration, BeatPosition, BeatRange, MidiChannel, Tempo, TempoMap, TempoSequence, TimeDuration,
    TimePosition, TimeRange, TimeSignature,
};
pub use store::{NodeId, Store, UndoManager};
