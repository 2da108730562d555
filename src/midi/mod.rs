// MIDI module - Messages, timed message streams and MIDI files

pub mod event;
pub mod file;
pub mod sequence;

pub use event::MidiMessage;
pub use file::{MidiFileContents, MidiFileError};
pub use sequence::{MidiMessageSequence, NotePairTracker, TimedMidiMessage};
