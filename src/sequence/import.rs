// Import - Timed message streams into a MidiList
// Pairs note-ons with note-offs and converts timestamps to beats

use crate::midi::event::MidiMessage;
use crate::midi::sequence::MidiMessageSequence;
use crate::sequence::controller::{MidiControllerEvent, TIMBRE_CC};
use crate::sequence::mpe::{DEFAULT_PITCH_BEND, DEFAULT_PRESSURE, DEFAULT_TIMBRE};
use crate::sequence::{MidiList, NoteAutomationType};
use crate::sequencer::tempo_map::TempoMap;
use crate::sequencer::timeline::{BeatPosition, MidiChannel, TimeDuration, TimePosition};
use crate::store::undo::in_transaction;
use crate::store::UndoManager;
use std::collections::{HashMap, VecDeque};

struct PendingNote {
    pitch: u8,
    velocity: u8,
    start: BeatPosition,
    end: Option<BeatPosition>,
    /// Note-expression controllers as (type, beat, value), written once the note is matched
    expression: Vec<(i32, BeatPosition, i32)>,
}

/// Per-channel expression state seen before and during notes
#[derive(Debug, Default, Clone, Copy)]
struct ChannelExpression {
    pitch_bend: Option<i32>,
    pressure: Option<i32>,
    timbre: Option<i32>,
}

/// Converts message timestamps to beats relative to `origin`. Without a tempo
/// map the timestamps are already beats and `origin` is ignored.
fn to_beats<'a>(
    sequence: &'a MidiMessageSequence,
    tempo: Option<&dyn TempoMap>,
    origin: TimePosition,
) -> Vec<(BeatPosition, &'a MidiMessage)> {
    match tempo {
        Some(tempo) => {
            let origin_beat = tempo.time_to_beats(origin);
            sequence
                .iter()
                .map(|e| {
                    let time = origin + TimeDuration::from_seconds(e.timestamp);
                    let beat = tempo.time_to_beats(time) - origin_beat;
                    (BeatPosition::from_beats(beat.in_beats()), &e.message)
                })
                .collect()
        }
        None => sequence
            .iter()
            .map(|e| (BeatPosition::from_beats(e.timestamp), &e.message))
            .collect(),
    }
}

/// Matches note-ons to note-offs by (channel, pitch), first unmatched on wins
#[derive(Default)]
struct NotePairer {
    pending: Vec<PendingNote>,
    open: HashMap<(MidiChannel, u8), VecDeque<usize>>,
}

impl NotePairer {
    fn note_on(&mut self, channel: MidiChannel, pitch: u8, velocity: u8, beat: BeatPosition) {
        self.open
            .entry((channel, pitch))
            .or_default()
            .push_back(self.pending.len());
        self.pending.push(PendingNote {
            pitch,
            velocity,
            start: beat,
            end: None,
            expression: Vec::new(),
        });
    }

    /// Returns false for a note-off with no matching note-on
    fn note_off(&mut self, channel: MidiChannel, pitch: u8, beat: BeatPosition) -> bool {
        let Some(index) = self
            .open
            .get_mut(&(channel, pitch))
            .and_then(VecDeque::pop_front)
        else {
            return false;
        };

        self.pending[index].end = Some(beat);
        true
    }

    fn is_sounding(&self, channel: MidiChannel, pitch: u8) -> bool {
        self.open.get(&(channel, pitch)).is_some_and(|q| !q.is_empty())
    }

    fn is_sounding_on(&self, channel: MidiChannel) -> bool {
        self.open.iter().any(|((c, _), q)| *c == channel && !q.is_empty())
    }

    /// Records an expression value on the open notes of one key, or of every key when `pitch` is None
    fn add_expression(&mut self, channel: MidiChannel, pitch: Option<u8>, ty: i32, beat: BeatPosition, value: i32) {
        let mut indices: Vec<usize> = self
            .open
            .iter()
            .filter(|((c, p), _)| *c == channel && pitch.is_none_or(|pitch| pitch == *p))
            .flat_map(|(_, q)| q.iter().copied())
            .collect();
        indices.sort_unstable();
        for index in indices {
            self.pending[index].expression.push((ty, beat, value));
        }
    }

    /// Completed notes in note-on order
    fn finish(self) -> impl Iterator<Item = PendingNote> {
        let dropped = self.pending.iter().filter(|n| n.end.is_none()).count();
        if dropped > 0 {
            log::debug!("dropping {} note-ons with no matching note-off", dropped);
        }
        self.pending.into_iter().filter(|n| n.end.is_some())
    }
}

impl MidiList {
    /// Imports a stream of channel messages, notes are paired by channel and pitch
    ///
    /// With a tempo map timestamps are seconds after `origin`; without one they
    /// are beats.
    pub fn import_midi_sequence(
        &self,
        sequence: &MidiMessageSequence,
        tempo: Option<&dyn TempoMap>,
        origin: TimePosition,
        um: Option<&mut UndoManager>,
    ) {
        let events = to_beats(sequence, tempo, origin);

        in_transaction(um, "Import MIDI", |mut um| {
            let mut pairer = NotePairer::default();
            let mut first_channel = None;

            for (beat, message) in events {
                if first_channel.is_none() {
                    first_channel = message.channel();
                }

                match *message {
                    MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    } => pairer.note_on(channel, note, velocity, beat),
                    MidiMessage::NoteOff { channel, note, .. } => {
                        if !pairer.note_off(channel, note, beat) {
                            log::warn!("ignoring unmatched note-off {} on {} at {}", note, channel, beat);
                        }
                    }
                    MidiMessage::SysEx(ref data) => {
                        self.add_sysex_event(data, beat, um.as_deref_mut());
                    }
                    ref other => {
                        if let Some((ty, value, metadata)) = MidiControllerEvent::from_midi_message(other) {
                            self.add_controller_event(ty, beat, value, metadata, um.as_deref_mut());
                        }
                    }
                }
            }

            for note in pairer.finish() {
                let end = note.end.unwrap_or(note.start);
                self.add_note(note.pitch, note.start, end - note.start, note.velocity, 0, um.as_deref_mut());
            }

            if let Some(channel) = first_channel {
                self.set_midi_channel(channel, um.as_deref_mut());
            }
        });
    }

    /// Imports a stream that may use one channel per note
    ///
    /// Pitch bend, channel pressure and CC74 on a note's channel become
    /// note-expression controllers tagged with the note number. Every note
    /// gets initial pitch-bend, pressure and timbre values, taken from the
    /// channel state at note-on or from the defaults.
    pub fn import_from_edit_time_sequence_with_note_expression(
        &self,
        sequence: &MidiMessageSequence,
        tempo: Option<&dyn TempoMap>,
        origin: TimePosition,
        um: Option<&mut UndoManager>,
    ) {
        let events = to_beats(sequence, tempo, origin);

        in_transaction(um, "Import MIDI", |mut um| {
            let mut pairer = NotePairer::default();
            let mut expression: HashMap<MidiChannel, ChannelExpression> = HashMap::new();
            let mut lowest_channel: Option<MidiChannel> = None;

            for (beat, message) in events {
                if let Some(channel) = message.channel() {
                    lowest_channel = Some(lowest_channel.map_or(channel, |c| c.min(channel)));
                }

                match *message {
                    MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    } => {
                        let state = expression.get(&channel).copied().unwrap_or_default();
                        pairer.note_on(channel, note, velocity, beat);
                        let initial = [
                            (
                                MidiControllerEvent::NOTE_PITCH_BEND_TYPE,
                                state.pitch_bend.unwrap_or(DEFAULT_PITCH_BEND),
                            ),
                            (
                                MidiControllerEvent::NOTE_PRESSURE_TYPE,
                                state.pressure.unwrap_or(DEFAULT_PRESSURE),
                            ),
                            (
                                MidiControllerEvent::NOTE_TIMBRE_TYPE,
                                state.timbre.unwrap_or(DEFAULT_TIMBRE),
                            ),
                        ];
                        if let Some(pending) = pairer.pending.last_mut() {
                            pending.expression.extend(initial.map(|(ty, value)| (ty, beat, value)));
                        }
                    }
                    MidiMessage::NoteOff { channel, note, .. } => {
                        if !pairer.note_off(channel, note, beat) {
                            log::warn!("ignoring unmatched note-off {} on {} at {}", note, channel, beat);
                        } else if !pairer.is_sounding_on(channel) {
                            expression.remove(&channel);
                        }
                    }
                    MidiMessage::PitchBend { channel, value } => {
                        expression.entry(channel).or_default().pitch_bend = Some(value as i32);
                        pairer.add_expression(channel, None, MidiControllerEvent::NOTE_PITCH_BEND_TYPE, beat, value as i32);
                    }
                    MidiMessage::ChannelPressure { channel, pressure } => {
                        let value = (pressure as i32) << 7;
                        expression.entry(channel).or_default().pressure = Some(value);
                        pairer.add_expression(channel, None, MidiControllerEvent::NOTE_PRESSURE_TYPE, beat, value);
                    }
                    MidiMessage::ControlChange {
                        channel,
                        controller: TIMBRE_CC,
                        value,
                    } => {
                        let value = (value as i32) << 7;
                        expression.entry(channel).or_default().timbre = Some(value);
                        pairer.add_expression(channel, None, MidiControllerEvent::NOTE_TIMBRE_TYPE, beat, value);
                    }
                    MidiMessage::Aftertouch {
                        channel,
                        note,
                        pressure,
                    } if pairer.is_sounding(channel, note) => {
                        pairer.add_expression(
                            channel,
                            Some(note),
                            MidiControllerEvent::NOTE_PRESSURE_TYPE,
                            beat,
                            (pressure as i32) << 7,
                        );
                    }
                    MidiMessage::SysEx(ref data) => {
                        self.add_sysex_event(data, beat, um.as_deref_mut());
                    }
                    ref other => {
                        if let Some((ty, value, metadata)) = MidiControllerEvent::from_midi_message(other) {
                            self.add_controller_event(ty, beat, value, metadata, um.as_deref_mut());
                        }
                    }
                }
            }

            for note in pairer.finish() {
                let end = note.end.unwrap_or(note.start);
                self.add_note(note.pitch, note.start, end - note.start, note.velocity, 0, um.as_deref_mut());
                for (ty, beat, value) in note.expression {
                    self.add_controller_event(ty, beat, value, note.pitch as i32, um.as_deref_mut());
                }
            }

            self.set_midi_channel(lowest_channel.unwrap_or_default(), um.as_deref_mut());
        });
    }

    /// Imports using the strategy selected by `automation`
    pub fn import_with_automation(
        &self,
        sequence: &MidiMessageSequence,
        automation: NoteAutomationType,
        tempo: Option<&dyn TempoMap>,
        origin: TimePosition,
        um: Option<&mut UndoManager>,
    ) {
        match automation {
            NoteAutomationType::None => self.import_midi_sequence(sequence, tempo, origin, um),
            NoteAutomationType::Expression => {
                self.import_from_edit_time_sequence_with_note_expression(sequence, tempo, origin, um)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::tempo_map::TempoSequence;
    use crate::sequencer::timeline::{Tempo, TimeSignature};

    fn ch(n: u8) -> MidiChannel {
        MidiChannel::new(n)
    }

    fn on(channel: u8, note: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: ch(channel),
            note,
            velocity,
        }
    }

    fn off(channel: u8, note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: ch(channel),
            note,
            velocity: 0,
        }
    }

    #[test]
    fn test_import_pairs_notes() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(1, 60, 100));
        seq.push(0.5, on(1, 60, 90));
        seq.push(1.0, off(1, 60));
        seq.push(2.0, off(1, 60));

        let list = MidiList::new();
        list.import_midi_sequence(&seq, None, TimePosition::zero(), None);

        let notes = list.notes();
        assert_eq!(notes.len(), 2);
        // First unmatched note-on takes the first note-off
        assert_eq!(notes[0].length_beats().in_beats(), 1.0);
        assert_eq!(notes[0].velocity(), 100);
        assert_eq!(notes[1].start_beat().in_beats(), 0.5);
        assert_eq!(notes[1].length_beats().in_beats(), 1.5);
    }

    #[test]
    fn test_import_drops_unmatched_events() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, off(1, 64));
        seq.push(1.0, on(1, 62, 100));
        seq.push(2.0, on(1, 67, 100));
        seq.push(3.0, off(1, 62));

        let list = MidiList::new();
        list.import_midi_sequence(&seq, None, TimePosition::zero(), None);

        assert_eq!(list.num_notes(), 1);
        assert_eq!(list.note_unchecked(0).note_number(), 62);
    }

    #[test]
    fn test_import_uses_tempo_map() {
        let mut tempo = TempoSequence::new(Tempo::new(120.0), TimeSignature::four_four());
        tempo.insert_tempo(BeatPosition::from_beats(2.0), Tempo::new(60.0));

        let mut seq = MidiMessageSequence::new();
        seq.push(0.5, on(1, 60, 100)); // beat 1
        seq.push(2.0, off(1, 60)); // beat 3 (1s for beats 0-2, then 1s per beat)

        let list = MidiList::new();
        list.import_midi_sequence(&seq, Some(&tempo), TimePosition::zero(), None);

        let note = list.note_unchecked(0);
        assert!((note.start_beat().in_beats() - 1.0).abs() < 1e-9);
        assert!((note.end_beat().in_beats() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_import_relative_to_origin() {
        let tempo = TempoSequence::default();
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(1, 60, 100));
        seq.push(1.0, off(1, 60));

        let list = MidiList::new();
        list.import_midi_sequence(&seq, Some(&tempo), TimePosition::from_seconds(10.0), None);
        let note = list.note_unchecked(0);
        assert!(note.start_beat().in_beats().abs() < 1e-9);
        assert!((note.length_beats().in_beats() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_import_controllers_sysex_and_channel() {
        let mut seq = MidiMessageSequence::new();
        seq.push(
            0.0,
            MidiMessage::ControlChange {
                channel: ch(5),
                controller: 7,
                value: 100,
            },
        );
        seq.push(1.0, MidiMessage::SysEx(vec![0xF0, 0x01, 0xF7]));
        seq.push(2.0, MidiMessage::PitchBend { channel: ch(5), value: 0 });

        let list = MidiList::new();
        list.import_midi_sequence(&seq, None, TimePosition::zero(), None);

        assert_eq!(list.midi_channel(), ch(5));
        assert_eq!(list.num_controller_events(), 2);
        assert_eq!(list.controller_event_unchecked(0).controller_value(), 100 << 7);
        assert_eq!(list.num_sysex_events(), 1);
    }

    #[test]
    fn test_import_is_one_undo_step() {
        let mut seq = MidiMessageSequence::new();
        for i in 0..4 {
            seq.push(i as f64, on(1, 60 + i as u8, 100));
            seq.push(i as f64 + 0.5, off(1, 60 + i as u8));
        }

        let list = MidiList::new();
        let mut um = UndoManager::new();
        list.import_midi_sequence(&seq, None, TimePosition::zero(), Some(&mut um));
        assert_eq!(um.undo_count(), 1);

        um.undo(list.store()).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_mpe_import_initial_expression() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, MidiMessage::PitchBend { channel: ch(2), value: 10000 });
        seq.push(0.0, on(2, 60, 100));
        seq.push(0.0, on(3, 64, 100));
        seq.push(1.0, off(2, 60));
        seq.push(1.0, off(3, 64));

        let list = MidiList::new();
        list.import_from_edit_time_sequence_with_note_expression(&seq, None, TimePosition::zero(), None);

        assert_eq!(list.num_notes(), 2);
        assert_eq!(list.midi_channel(), ch(2));

        let expression: Vec<_> = list
            .controller_events()
            .iter()
            .map(|e| (e.controller_type(), e.controller_value(), e.metadata()))
            .collect();
        assert_eq!(
            expression,
            vec![
                (MidiControllerEvent::NOTE_PITCH_BEND_TYPE, 10000, 60),
                (MidiControllerEvent::NOTE_PRESSURE_TYPE, 0, 60),
                (MidiControllerEvent::NOTE_TIMBRE_TYPE, 8192, 60),
                (MidiControllerEvent::NOTE_PITCH_BEND_TYPE, 8192, 64),
                (MidiControllerEvent::NOTE_PRESSURE_TYPE, 0, 64),
                (MidiControllerEvent::NOTE_TIMBRE_TYPE, 8192, 64),
            ]
        );
    }

    #[test]
    fn test_mpe_import_drops_expression_of_unmatched_notes() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(2, 60, 100));
        seq.push(0.5, MidiMessage::PitchBend { channel: ch(2), value: 12000 });
        seq.push(0.5, on(3, 64, 100));
        seq.push(1.0, off(3, 64));

        let list = MidiList::new();
        list.import_from_edit_time_sequence_with_note_expression(&seq, None, TimePosition::zero(), None);

        assert_eq!(list.num_notes(), 1);
        let events = list.controller_events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.metadata() == 64));

        let lonely = MidiList::new();
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(2, 60, 100));
        lonely.import_from_edit_time_sequence_with_note_expression(&seq, None, TimePosition::zero(), None);
        assert!(lonely.is_empty());
        assert_eq!(lonely.num_controller_events(), 0);
    }

    #[test]
    fn test_mpe_import_expression_follows_note() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(4, 62, 100));
        seq.push(0.5, MidiMessage::ChannelPressure { channel: ch(4), pressure: 64 });
        seq.push(
            0.75,
            MidiMessage::ControlChange {
                channel: ch(4),
                controller: TIMBRE_CC,
                value: 127,
            },
        );
        seq.push(
            0.8,
            MidiMessage::ControlChange {
                channel: ch(4),
                controller: 1,
                value: 10,
            },
        );
        seq.push(1.0, off(4, 62));

        let list = MidiList::new();
        list.import_from_edit_time_sequence_with_note_expression(&seq, None, TimePosition::zero(), None);

        let events = list.controller_events();
        assert_eq!(events.len(), 6);
        assert_eq!(events[3].controller_type(), MidiControllerEvent::NOTE_PRESSURE_TYPE);
        assert_eq!(events[3].controller_value(), 64 << 7);
        assert_eq!(events[3].metadata(), 62);
        assert_eq!(events[4].controller_type(), MidiControllerEvent::NOTE_TIMBRE_TYPE);
        assert_eq!(events[5].controller_type(), 1);
    }
}
