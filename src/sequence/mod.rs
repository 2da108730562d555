// Sequence module - MIDI event sequences
// A MidiList is a SEQUENCE node with note, controller and sysex children

pub mod controller;
pub mod event_list;
pub mod export;
pub mod import;
pub mod mpe;
pub mod note;
pub mod sysex;

pub use controller::MidiControllerEvent;
pub use event_list::{EventList, MidiEventType, SortedEventReader, sort_midi_events_by_time};
pub use export::{PlaybackParams, TimeBase};
pub use note::{MidiNote, sort_midi_events_by_note_number};
pub use sysex::MidiSysexEvent;

use crate::sequencer::timeline::{BeatDuration, BeatPosition, BeatRange, MidiChannel};
use crate::store::persistence::copy_node;
use crate::store::undo::in_transaction;
use crate::store::{ids, NodeId, Store, UndoManager};
use std::rc::Rc;
use std::sync::Arc;

/// How note expression is handled when importing into a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteAutomationType {
    /// Plain channel messages
    #[default]
    None,
    /// Per-note channels are collapsed into note-expression controllers
    Expression,
}

/// An event sequence backed by a SEQUENCE node
///
/// Cloning yields another view of the same node and shares its caches.
#[derive(Clone)]
pub struct MidiList {
    store: Store,
    state: NodeId,
    notes: Rc<EventList<MidiNote>>,
    controllers: Rc<EventList<MidiControllerEvent>>,
    sysex: Rc<EventList<MidiSysexEvent>>,
}

impl std::fmt::Debug for MidiList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiList")
            .field("state", &self.state)
            .field("notes", &self.num_notes())
            .field("controllers", &self.num_controller_events())
            .field("sysex", &self.num_sysex_events())
            .finish()
    }
}

impl MidiList {
    /// Creates an empty standalone list with its own store
    pub fn new() -> Self {
        let store = Store::new();
        let state = Self::create_state(&store);
        Self::from_state(&store, state)
    }

    /// Creates a detached, empty SEQUENCE node
    pub fn create_state(store: &Store) -> NodeId {
        let state = store.create_node(ids::SEQUENCE);
        store.set_property(state, ids::CHANNEL, 1, None);
        state
    }

    pub fn from_state(store: &Store, state: NodeId) -> Self {
        Self {
            store: store.clone(),
            state,
            notes: EventList::attach(store, state),
            controllers: EventList::attach(store, state),
            sysex: EventList::attach(store, state),
        }
    }

    pub fn state(&self) -> NodeId {
        self.state
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Replaces the contents with a copy of `other`
    pub fn copy_from(&self, other: &MidiList, um: Option<&mut UndoManager>) {
        in_transaction(um, "Copy sequence", |mut um| {
            self.clear(um.as_deref_mut());
            self.set_midi_channel(other.midi_channel(), um.as_deref_mut());
            self.set_comp_list(other.is_comp_list(), um.as_deref_mut());
            self.add_from(other, um.as_deref_mut());
        });
    }

    /// Appends copies of every event in `other`
    pub fn add_from(&self, other: &MidiList, um: Option<&mut UndoManager>) {
        in_transaction(um, "Add events", |mut um| {
            for child in other.store.children(other.state) {
                let is_event = [ids::NOTE, ids::CONTROL, ids::SYSEX]
                    .iter()
                    .any(|t| other.store.has_type(child, t));

                if is_event {
                    if let Some(copy) = copy_node(&other.store, child, &self.store) {
                        self.store.add_child(self.state, copy, None, um.as_deref_mut());
                    }
                }
            }
        });
    }

    pub fn clear(&self, um: Option<&mut UndoManager>) {
        in_transaction(um, "Clear sequence", |mut um| {
            self.remove_all_notes(um.as_deref_mut());
            self.remove_all_controllers(um.as_deref_mut());
            self.remove_all_sysexes(um.as_deref_mut());
        });
    }

    pub fn is_empty(&self) -> bool {
        self.num_notes() == 0 && self.num_controller_events() == 0 && self.num_sysex_events() == 0
    }

    pub fn is_attached_to_clip(&self) -> bool {
        self.store
            .parent(self.state)
            .is_some_and(|p| self.store.has_type(p, ids::MIDICLIP))
    }

    pub fn midi_channel(&self) -> MidiChannel {
        self.store
            .get_i64(self.state, ids::CHANNEL)
            .and_then(MidiChannel::try_new)
            .unwrap_or_default()
    }

    pub fn set_midi_channel(&self, channel: MidiChannel, um: Option<&mut UndoManager>) {
        self.store.set_property(self.state, ids::CHANNEL, channel.number(), um);
    }

    pub fn is_comp_list(&self) -> bool {
        self.store.get_bool(self.state, ids::COMP).unwrap_or(false)
    }

    pub fn set_comp_list(&self, is_comp: bool, um: Option<&mut UndoManager>) {
        self.store.set_property(self.state, ids::COMP, is_comp, um);
    }

    pub fn imported_midi_track_name(&self) -> String {
        self.store
            .get_string(self.state, ids::IMPORTED_TRACK_NAME)
            .unwrap_or_default()
    }

    pub fn set_imported_midi_track_name(&self, name: &str, um: Option<&mut UndoManager>) {
        self.store.set_property(self.state, ids::IMPORTED_TRACK_NAME, name, um);
    }

    pub fn imported_file_name(&self) -> String {
        self.store
            .get_string(self.state, ids::IMPORTED_FILE_NAME)
            .unwrap_or_default()
    }

    pub fn set_imported_file_name(&self, name: &str, um: Option<&mut UndoManager>) {
        self.store.set_property(self.state, ids::IMPORTED_FILE_NAME, name, um);
    }

    // Notes

    /// Notes in beat order
    pub fn notes(&self) -> Arc<[MidiNote]> {
        self.notes.sorted_list(&self.store)
    }

    /// Notes ordered by pitch, not cached
    pub fn notes_by_pitch(&self) -> Vec<MidiNote> {
        let mut notes = self.notes().to_vec();
        sort_midi_events_by_note_number(&mut notes);
        notes
    }

    pub fn num_notes(&self) -> usize {
        self.notes().len()
    }

    pub fn note(&self, index: usize) -> Option<MidiNote> {
        self.notes().get(index).cloned()
    }

    pub fn note_unchecked(&self, index: usize) -> MidiNote {
        let notes = self.notes();
        assert!(index < notes.len(), "Note index {} out of range", index);
        notes[index].clone()
    }

    pub fn note_for(&self, id: NodeId) -> Option<MidiNote> {
        self.notes().iter().find(|n| n.id() == id).cloned()
    }

    pub fn note_reader(&self) -> SortedEventReader<MidiNote> {
        self.notes.reader()
    }

    pub fn add_note(
        &self,
        pitch: u8,
        start: BeatPosition,
        length: BeatDuration,
        velocity: u8,
        colour: u8,
        um: Option<&mut UndoManager>,
    ) -> NodeId {
        let node = MidiNote::create_state(&self.store, pitch, start, length, velocity, colour);
        self.store.add_child(self.state, node, None, um);
        node
    }

    /// Adds a copy of a note, possibly from another list
    pub fn add_note_copy(&self, note: &MidiNote, um: Option<&mut UndoManager>) -> NodeId {
        in_transaction(um, "Add note", |mut um| {
            let node = self.add_note(
                note.note_number(),
                note.start_beat(),
                note.length_beats(),
                note.velocity(),
                note.colour(),
                um.as_deref_mut(),
            );
            if note.is_muted() {
                self.store.set_property(node, ids::NOTE_MUTE, true, um.as_deref_mut());
            }
            node
        })
    }

    pub fn remove_note(&self, note: &MidiNote, um: Option<&mut UndoManager>) {
        self.store.remove_child(self.state, note.id(), um);
    }

    pub fn remove_all_notes(&self, um: Option<&mut UndoManager>) {
        self.store.remove_children_of_type(self.state, ids::NOTE, um);
    }

    /// Lowest and highest note numbers
    pub fn note_number_range(&self) -> Option<(u8, u8)> {
        let notes = self.notes();
        let lowest = notes.iter().map(MidiNote::note_number).min()?;
        let highest = notes.iter().map(MidiNote::note_number).max()?;
        Some((lowest, highest))
    }

    // Controllers

    pub fn controller_events(&self) -> Arc<[MidiControllerEvent]> {
        self.controllers.sorted_list(&self.store)
    }

    pub fn num_controller_events(&self) -> usize {
        self.controller_events().len()
    }

    pub fn controller_event(&self, index: usize) -> Option<MidiControllerEvent> {
        self.controller_events().get(index).cloned()
    }

    pub fn controller_event_unchecked(&self, index: usize) -> MidiControllerEvent {
        let events = self.controller_events();
        assert!(index < events.len(), "Controller index {} out of range", index);
        events[index].clone()
    }

    pub fn controller_reader(&self) -> SortedEventReader<MidiControllerEvent> {
        self.controllers.reader()
    }

    pub fn add_controller_event(
        &self,
        controller_type: i32,
        beat: BeatPosition,
        value: i32,
        metadata: i32,
        um: Option<&mut UndoManager>,
    ) -> NodeId {
        let node = MidiControllerEvent::create_state(&self.store, controller_type, beat, value, metadata);
        self.store.add_child(self.state, node, None, um);
        node
    }

    pub fn remove_controller_event(&self, event: &MidiControllerEvent, um: Option<&mut UndoManager>) {
        self.store.remove_child(self.state, event.id(), um);
    }

    pub fn remove_all_controllers(&self, um: Option<&mut UndoManager>) {
        self.store.remove_children_of_type(self.state, ids::CONTROL, um);
    }

    /// Last event of `controller_type` at or before `beat`
    pub fn controller_event_at(&self, beat: BeatPosition, controller_type: i32) -> Option<MidiControllerEvent> {
        self.controller_events()
            .iter()
            .filter(|e| e.controller_type() == controller_type && e.beat_position() <= beat)
            .last()
            .cloned()
    }

    pub fn contains_controller(&self, controller_type: i32) -> bool {
        self.controller_events()
            .iter()
            .any(|e| e.controller_type() == controller_type)
    }

    /// True if any event carries per-note expression
    pub fn contains_note_expression(&self) -> bool {
        self.controller_events().iter().any(|e| e.is_note_expression())
    }

    /// Removes events of a type in [start, end)
    pub fn remove_controllers_between(
        &self,
        controller_type: i32,
        start: BeatPosition,
        end: BeatPosition,
        um: Option<&mut UndoManager>,
    ) {
        let range = BeatRange::new(start, end);
        let doomed: Vec<_> = self
            .controller_events()
            .iter()
            .filter(|e| e.controller_type() == controller_type && range.contains(e.beat_position()))
            .map(|e| e.id())
            .collect();

        in_transaction(um, "Remove controllers", |mut um| {
            for id in doomed {
                self.store.remove_child(self.state, id, um.as_deref_mut());
            }
        });
    }

    /// Updates the event of `controller_type` at exactly `beat`, or adds one
    pub fn set_controller_value_at(
        &self,
        controller_type: i32,
        beat: BeatPosition,
        value: i32,
        um: Option<&mut UndoManager>,
    ) {
        let existing = self
            .controller_events()
            .iter()
            .find(|e| e.controller_type() == controller_type && e.beat_position() == beat)
            .cloned();

        match existing {
            Some(event) => event.set_controller_value(&self.store, value, um),
            None => {
                self.add_controller_event(controller_type, beat, value, 0, um);
            }
        }
    }

    /// Replaces events of a type in `range` with a linear ramp from
    /// `start_value` to `end_value`, one point every `interval` plus the end point
    pub fn insert_repeated_controller_value(
        &self,
        controller_type: i32,
        start_value: i32,
        end_value: i32,
        range: BeatRange,
        interval: BeatDuration,
        um: Option<&mut UndoManager>,
    ) {
        if interval.in_beats() <= 0.0 {
            log::warn!("ignoring controller ramp with non-positive interval {}", interval);
            return;
        }

        // Both end points are replaced by the ramp
        let doomed: Vec<_> = self
            .controller_events()
            .iter()
            .filter(|e| {
                e.controller_type() == controller_type
                    && e.beat_position() >= range.start
                    && e.beat_position() <= range.end
            })
            .map(|e| e.id())
            .collect();

        in_transaction(um, "Insert controller ramp", |mut um| {
            for id in doomed {
                self.store.remove_child(self.state, id, um.as_deref_mut());
            }

            let length = range.length().in_beats();
            if length <= 0.0 {
                self.add_controller_event(controller_type, range.start, start_value, 0, um.as_deref_mut());
                return;
            }

            let value_at = |beat: f64| {
                let proportion = (beat - range.start.in_beats()) / length;
                (start_value as f64 + (end_value - start_value) as f64 * proportion).round() as i32
            };

            let mut step = 0;
            loop {
                let beat = range.start.in_beats() + step as f64 * interval.in_beats();
                if beat >= range.end.in_beats() {
                    break;
                }
                self.add_controller_event(
                    controller_type,
                    BeatPosition::from_beats(beat),
                    value_at(beat),
                    0,
                    um.as_deref_mut(),
                );
                step += 1;
            }

            self.add_controller_event(controller_type, range.end, end_value, 0, um.as_deref_mut());
        });
    }

    // Sysex

    pub fn sysex_events(&self) -> Arc<[MidiSysexEvent]> {
        self.sysex.sorted_list(&self.store)
    }

    pub fn num_sysex_events(&self) -> usize {
        self.sysex_events().len()
    }

    pub fn sysex_event(&self, index: usize) -> Option<MidiSysexEvent> {
        self.sysex_events().get(index).cloned()
    }

    pub fn sysex_event_unchecked(&self, index: usize) -> MidiSysexEvent {
        let events = self.sysex_events();
        assert!(index < events.len(), "Sysex index {} out of range", index);
        events[index].clone()
    }

    pub fn sysex_event_for(&self, id: NodeId) -> Option<MidiSysexEvent> {
        self.sysex_events().iter().find(|e| e.id() == id).cloned()
    }

    pub fn sysex_reader(&self) -> SortedEventReader<MidiSysexEvent> {
        self.sysex.reader()
    }

    pub fn add_sysex_event(&self, data: &[u8], beat: BeatPosition, um: Option<&mut UndoManager>) -> NodeId {
        let node = MidiSysexEvent::create_state(&self.store, data, beat);
        self.store.add_child(self.state, node, None, um);
        node
    }

    pub fn remove_sysex_event(&self, event: &MidiSysexEvent, um: Option<&mut UndoManager>) {
        self.store.remove_child(self.state, event.id(), um);
    }

    pub fn remove_all_sysexes(&self, um: Option<&mut UndoManager>) {
        self.store.remove_children_of_type(self.state, ids::SYSEX, um);
    }

    // Whole-list operations

    /// Earliest event position, 0 when empty
    pub fn first_beat_number(&self) -> BeatPosition {
        let note = self.notes().first().map(MidiNote::start_beat);
        let controller = self.controller_events().first().map(|e| e.beat_position());
        let sysex = self.sysex_events().first().map(|e| e.beat_position());

        [note, controller, sysex]
            .into_iter()
            .flatten()
            .reduce(BeatPosition::min)
            .unwrap_or_default()
    }

    /// Latest note end or event position, 0 when empty
    pub fn last_beat_number(&self) -> BeatPosition {
        let note = self.notes().iter().map(MidiNote::end_beat).reduce(BeatPosition::max);
        let controller = self.controller_events().last().map(|e| e.beat_position());
        let sysex = self.sysex_events().last().map(|e| e.beat_position());

        [note, controller, sysex]
            .into_iter()
            .flatten()
            .reduce(BeatPosition::max)
            .unwrap_or_default()
    }

    /// Removes events outside [first, last]. Notes must lie entirely inside
    /// the window to survive, partially overlapping notes are removed.
    pub fn trim_outside(&self, first: BeatPosition, last: BeatPosition, um: Option<&mut UndoManager>) {
        let outside = |beat: BeatPosition| beat < first || beat > last;

        let mut doomed: Vec<NodeId> = self
            .notes()
            .iter()
            .filter(|n| n.start_beat() < first || n.end_beat() > last)
            .map(MidiNote::id)
            .collect();
        doomed.extend(
            self.controller_events()
                .iter()
                .filter(|e| outside(e.beat_position()))
                .map(|e| e.id()),
        );
        doomed.extend(
            self.sysex_events()
                .iter()
                .filter(|e| outside(e.beat_position()))
                .map(|e| e.id()),
        );

        in_transaction(um, "Trim events", |mut um| {
            for id in doomed {
                self.store.remove_child(self.state, id, um.as_deref_mut());
            }
        });
    }

    /// Shifts every event by `delta`
    pub fn move_all_beat_positions(&self, delta: BeatDuration, um: Option<&mut UndoManager>) {
        if delta.in_beats() == 0.0 {
            return;
        }

        in_transaction(um, "Move events", |mut um| {
            for note in self.notes().iter() {
                self.store
                    .set_property(note.id(), ids::NOTE_BEAT, (note.start_beat() + delta).in_beats(), um.as_deref_mut());
            }
            for event in self.controller_events().iter() {
                event.set_beat_position(&self.store, event.beat_position() + delta, um.as_deref_mut());
            }
            for event in self.sysex_events().iter() {
                event.set_beat_position(&self.store, event.beat_position() + delta, um.as_deref_mut());
            }
        });
    }

    /// Multiplies every position (and note length) by `factor`
    pub fn rescale(&self, factor: f64, um: Option<&mut UndoManager>) {
        if factor <= 0.0 || factor == 1.0 {
            return;
        }

        let scale = |beat: BeatPosition| BeatPosition::from_beats(beat.in_beats() * factor);

        in_transaction(um, "Rescale events", |mut um| {
            for note in self.notes().iter() {
                note.set_start_and_length(
                    &self.store,
                    scale(note.start_beat()),
                    note.length_beats() * factor,
                    um.as_deref_mut(),
                );
            }
            for event in self.controller_events().iter() {
                event.set_beat_position(&self.store, scale(event.beat_position()), um.as_deref_mut());
            }
            for event in self.sysex_events().iter() {
                event.set_beat_position(&self.store, scale(event.beat_position()), um.as_deref_mut());
            }
        });
    }
}

impl Default for MidiList {
    fn default() -> Self {
        Self::new()
    }
}
