// Note representation
// A note is one NOTE node holding pitch, start beat, length, velocity, colour and mute

use crate::sequence::event_list::MidiEventType;
use crate::sequencer::timeline::{BeatDuration, BeatPosition, BeatRange};
use crate::store::{ids, NodeId, NodeView, Store, UndoManager};
use crate::store::undo::in_transaction;

/// Number of colour tags a note can carry
pub const NUM_COLOURS: u8 = 8;

/// A note read from the store
///
/// This is a snapshot: edits go through the store and show up the next time
/// the owning list is read.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiNote {
    id: NodeId,

    /// MIDI note number (0-127, where 60 = C4)
    pitch: u8,

    /// MIDI velocity (0-127, where 127 = maximum)
    velocity: u8,

    start: BeatPosition,
    length: BeatDuration,
    colour: u8,
    muted: bool,
}

impl MidiNote {
    /// Creates the detached node for a new note
    pub fn create_state(
        store: &Store,
        pitch: u8,
        start: BeatPosition,
        length: BeatDuration,
        velocity: u8,
        colour: u8,
    ) -> NodeId {
        let node = store.create_node(ids::NOTE);
        store.set_property(node, ids::NOTE_PITCH, pitch.min(127), None);
        store.set_property(node, ids::NOTE_BEAT, start.in_beats(), None);
        store.set_property(node, ids::NOTE_LENGTH, length.in_beats().max(0.0), None);
        store.set_property(node, ids::NOTE_VELOCITY, velocity.min(127), None);
        store.set_property(node, ids::NOTE_COLOUR, colour % NUM_COLOURS, None);
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn note_number(&self) -> u8 {
        self.pitch
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn start_beat(&self) -> BeatPosition {
        self.start
    }

    pub fn length_beats(&self) -> BeatDuration {
        self.length
    }

    pub fn end_beat(&self) -> BeatPosition {
        self.start + self.length
    }

    pub fn range(&self) -> BeatRange {
        BeatRange::new(self.start, self.end_beat())
    }

    pub fn colour(&self) -> u8 {
        self.colour
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Get the note name (e.g., "C4", "A#5")
    pub fn note_name(&self) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        let octave = (self.pitch / 12) as i32 - 1;
        let note_index = (self.pitch % 12) as usize;

        format!("{}{}", NOTE_NAMES[note_index], octave)
    }

    pub fn set_start_and_length(
        &self,
        store: &Store,
        start: BeatPosition,
        length: BeatDuration,
        um: Option<&mut UndoManager>,
    ) {
        in_transaction(um, "Move note", |mut um| {
            store.set_property(self.id, ids::NOTE_BEAT, start.in_beats(), um.as_deref_mut());
            store.set_property(
                self.id,
                ids::NOTE_LENGTH,
                length.in_beats().max(0.0),
                um.as_deref_mut(),
            );
        });
    }

    pub fn set_note_number(&self, store: &Store, pitch: u8, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::NOTE_PITCH, pitch.min(127), um);
    }

    pub fn set_velocity(&self, store: &Store, velocity: u8, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::NOTE_VELOCITY, velocity.min(127), um);
    }

    pub fn set_colour(&self, store: &Store, colour: u8, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::NOTE_COLOUR, colour % NUM_COLOURS, um);
    }

    pub fn set_mute(&self, store: &Store, muted: bool, um: Option<&mut UndoManager>) {
        if muted {
            store.set_property(self.id, ids::NOTE_MUTE, true, um);
        } else {
            store.remove_property(self.id, ids::NOTE_MUTE, um);
        }
    }
}

impl MidiEventType for MidiNote {
    const NODE_TYPE: &'static str = ids::NOTE;

    fn from_node(view: &NodeView<'_>) -> Option<Self> {
        let pitch = view.get_i64(ids::NOTE_PITCH)?;
        let start = view.get_f64(ids::NOTE_BEAT)?;

        Some(Self {
            id: view.id(),
            pitch: pitch.clamp(0, 127) as u8,
            velocity: view.get_i64(ids::NOTE_VELOCITY).unwrap_or(100).clamp(0, 127) as u8,
            start: BeatPosition::from_beats(start),
            length: BeatDuration::from_beats(view.get_f64(ids::NOTE_LENGTH).unwrap_or(0.0).max(0.0)),
            colour: view.get_i64(ids::NOTE_COLOUR).unwrap_or(0).clamp(0, 255) as u8,
            muted: view.get_bool(ids::NOTE_MUTE).unwrap_or(false),
        })
    }

    fn beat_position(&self) -> BeatPosition {
        self.start
    }
}

/// Sorts notes by pitch, then start beat
pub fn sort_midi_events_by_note_number(notes: &mut [MidiNote]) {
    notes.sort_by(|a, b| {
        a.pitch
            .cmp(&b.pitch)
            .then(a.start.total_cmp(&b.start))
    });
}
