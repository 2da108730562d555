// Realtime sequence - Per-block playback without a proxy
// Loop mapping, quantisation and groove are applied as each block is pulled

use crate::clip::looping::{LoopGeometry, Repetition};
use crate::midi::sequence::{sort_for_playback, MidiMessageSequence, NotePairTracker, TimedMidiMessage};
use crate::sequence::export::{EventRenderer, PlaybackParams};
use crate::sequence::{MidiControllerEvent, MidiList, MidiNote, MidiSysexEvent, SortedEventReader};
use crate::sequencer::timeline::{BeatPosition, BeatRange, MidiChannel};
use std::sync::Arc;

/// Renders a clip's raw take block by block, timestamps in edit beats
///
/// Holds only cross-thread snapshot readers, so it can be moved to the
/// render thread. Edits show up once the control thread has re-read the list.
pub struct RealtimeSequence {
    notes: SortedEventReader<MidiNote>,
    controllers: SortedEventReader<MidiControllerEvent>,
    sysex: SortedEventReader<MidiSysexEvent>,
    channel: MidiChannel,
    repetitions: Vec<Repetition>,
    params: PlaybackParams,
    tracker: NotePairTracker,
    last_block_end: Option<BeatPosition>,
}

impl RealtimeSequence {
    pub fn new(list: &MidiList, geometry: &LoopGeometry, params: PlaybackParams) -> Self {
        // Publish fresh snapshots for the readers
        list.notes();
        list.controller_events();
        list.sysex_events();

        Self {
            notes: list.note_reader(),
            controllers: list.controller_reader(),
            sysex: list.sysex_reader(),
            channel: list.midi_channel(),
            repetitions: geometry.repetitions(),
            params,
            tracker: NotePairTracker::new(),
            last_block_end: None,
        }
    }

    /// Appends the events in `range`. A block that does not follow the
    /// previous one resets the note state.
    pub fn render_block(&mut self, range: BeatRange, out: &mut Vec<TimedMidiMessage>) {
        if self.last_block_end.is_some_and(|end| end != range.start) {
            self.tracker = NotePairTracker::new();
        }
        self.last_block_end = Some(range.end);

        let renderer = EventRenderer::in_beats(&self.params);
        let mut events = Vec::new();

        let notes = self.notes.snapshot();
        for repetition in &self.repetitions {
            for note in notes.iter().filter(|n| !n.is_muted()) {
                if let Some((start, length)) = repetition.map_note(note.start_beat(), note.length_beats()) {
                    renderer.render_note(note.note_number(), note.velocity(), start, length, self.channel, &mut events);
                }
            }
        }

        let controllers = self.controllers.snapshot();
        for repetition in &self.repetitions {
            for event in controllers.iter() {
                if let (Some(beat), Some(message)) = (
                    repetition.map_beat(event.beat_position()),
                    event.to_midi_message(self.channel),
                ) {
                    renderer.render_message(beat, message, &mut events);
                }
            }
        }

        let sysexes = self.sysex.snapshot();
        for repetition in &self.repetitions {
            for event in sysexes.iter() {
                if let Some(beat) = repetition.map_beat(event.beat_position()) {
                    renderer.render_message(beat, event.to_midi_message(), &mut events);
                }
            }
        }

        events.retain(|e| range.contains(BeatPosition::from_beats(e.timestamp)));
        sort_for_playback(&mut events);
        self.tracker.process(events, out);
    }

    /// Note-offs for everything still sounding
    pub fn stop(&mut self, beat: BeatPosition, out: &mut Vec<TimedMidiMessage>) {
        self.tracker.close_sounding_notes(beat.in_beats(), out);
        self.last_block_end = None;
    }
}

/// What the playback graph pulls a clip's events from
pub enum PlaybackSource {
    /// Precomputed stream in edit beats
    Proxy(Arc<MidiMessageSequence>),
    Realtime(RealtimeSequence),
}

impl PlaybackSource {
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    pub fn render_block(&mut self, range: BeatRange, out: &mut Vec<TimedMidiMessage>) {
        match self {
            Self::Proxy(sequence) => out.extend(
                sequence
                    .events_in_range(range.start.in_beats(), range.end.in_beats())
                    .cloned(),
            ),
            Self::Realtime(sequence) => sequence.render_block(range, out),
        }
    }
}
