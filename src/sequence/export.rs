// Export - Flattening a MidiList into a playback message stream
// Applies clip offset, clip bounds, quantisation, groove and MPE channel packing

use crate::clip::groove::GrooveTemplate;
use crate::clip::quantisation::QuantisationType;
use crate::midi::event::MidiMessage;
use crate::midi::sequence::{sort_for_playback, MidiMessageSequence, NotePairTracker, TimedMidiMessage};
use crate::sequence::controller::{controller_message, MidiControllerEvent};
use crate::sequence::mpe::{MpeChannelAssigner, DEFAULT_PITCH_BEND, DEFAULT_PRESSURE, DEFAULT_TIMBRE};
use crate::sequence::{MidiList, MidiNote};
use crate::sequencer::tempo_map::TempoMap;
use crate::sequencer::timeline::{BeatDuration, BeatPosition, BeatRange, MidiChannel};
use std::collections::HashSet;

/// Unit of exported timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBase {
    /// Edit time in seconds, through the tempo map
    Seconds,
    /// Edit beats after quantisation and groove
    Beats,
    /// Edit beats, no timing adjustment
    BeatsRaw,
}

/// How a list is placed on the timeline when exported
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackParams {
    /// Edit beats outside which nothing sounds
    pub clip_range: BeatRange,

    /// Added to list beats to get edit beats
    pub content_offset: BeatDuration,

    pub quantisation: QuantisationType,
    pub groove: Option<GrooveTemplate>,
    pub groove_strength: f32,
}

impl PlaybackParams {
    /// No bounds, no offset, no timing adjustment
    pub fn unclipped() -> Self {
        Self {
            clip_range: BeatRange::new(
                BeatPosition::from_beats(f64::NEG_INFINITY),
                BeatPosition::from_beats(f64::INFINITY),
            ),
            content_offset: BeatDuration::zero(),
            quantisation: QuantisationType::new(),
            groove: None,
            groove_strength: 1.0,
        }
    }
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self::unclipped()
    }
}

enum Clock<'a> {
    Beats,
    Seconds(&'a dyn TempoMap),
}

/// Turns list events into timed messages. Shared by the proxy export and the
/// realtime source so both place events identically.
pub(crate) struct EventRenderer<'a> {
    params: &'a PlaybackParams,
    adjust_timing: bool,
    clock: Clock<'a>,
}

impl<'a> EventRenderer<'a> {
    pub(crate) fn new(params: &'a PlaybackParams, time_base: TimeBase, tempo: &'a dyn TempoMap) -> Self {
        Self {
            params,
            adjust_timing: time_base != TimeBase::BeatsRaw,
            clock: match time_base {
                TimeBase::Seconds => Clock::Seconds(tempo),
                TimeBase::Beats | TimeBase::BeatsRaw => Clock::Beats,
            },
        }
    }

    /// Adjusted beats, used by the realtime source
    pub(crate) fn in_beats(params: &'a PlaybackParams) -> Self {
        Self {
            params,
            adjust_timing: true,
            clock: Clock::Beats,
        }
    }

    pub(crate) fn timestamp(&self, beat: BeatPosition) -> f64 {
        match self.clock {
            Clock::Beats => beat.in_beats(),
            Clock::Seconds(tempo) => tempo.beats_to_time(beat).in_seconds(),
        }
    }

    fn apply_groove(&self, beat: BeatPosition) -> BeatPosition {
        match &self.params.groove {
            Some(groove) => groove.beats_with_groove(beat, self.params.groove_strength),
            None => beat,
        }
    }

    /// Edit-beat span of a note after timing adjustment and clip bounds
    pub(crate) fn note_span(&self, start: BeatPosition, length: BeatDuration) -> Option<(BeatPosition, BeatPosition)> {
        if length.in_beats() <= 0.0 {
            return None;
        }

        let mut start = start + self.params.content_offset;
        let mut end = start + length;

        if self.adjust_timing {
            (start, end) = self.params.quantisation.quantise_note(start, end);
            start = self.apply_groove(start);
            end = self.apply_groove(end);
        }

        let range = self.params.clip_range;
        let start = start.max(range.start);
        let end = end.min(range.end);
        (end > start).then_some((start, end))
    }

    pub(crate) fn push_note(
        &self,
        pitch: u8,
        velocity: u8,
        (start, end): (BeatPosition, BeatPosition),
        channel: MidiChannel,
        out: &mut Vec<TimedMidiMessage>,
    ) {
        out.push(TimedMidiMessage::new(
            self.timestamp(start),
            MidiMessage::NoteOn {
                channel,
                note: pitch,
                velocity: velocity.max(1),
            },
        ));
        out.push(TimedMidiMessage::new(
            self.timestamp(end),
            MidiMessage::NoteOff {
                channel,
                note: pitch,
                velocity: 0,
            },
        ));
    }

    pub(crate) fn render_note(
        &self,
        pitch: u8,
        velocity: u8,
        start: BeatPosition,
        length: BeatDuration,
        channel: MidiChannel,
        out: &mut Vec<TimedMidiMessage>,
    ) {
        if let Some(span) = self.note_span(start, length) {
            self.push_note(pitch, velocity, span, channel, out);
        }
    }

    /// Controller and sysex events keep their position, clipped to the bounds
    pub(crate) fn render_message(&self, beat: BeatPosition, message: MidiMessage, out: &mut Vec<TimedMidiMessage>) {
        let beat = beat + self.params.content_offset;
        if self.params.clip_range.contains(beat) {
            out.push(TimedMidiMessage::new(self.timestamp(beat), message));
        }
    }
}

/// Sorts a raw event stream and repairs its note pairs
pub(crate) fn finish_stream(mut events: Vec<TimedMidiMessage>) -> MidiMessageSequence {
    sort_for_playback(&mut events);

    let mut tracker = NotePairTracker::new();
    let mut out = Vec::with_capacity(events.len());
    tracker.process(events, &mut out);
    let end = out.last().map_or(0.0, |e| e.timestamp);
    tracker.close_sounding_notes(end, &mut out);

    MidiMessageSequence::from_events(out)
}

/// A note that sounds in an MPE export
struct Voice {
    pitch: u8,
    source: BeatRange,
    start: BeatPosition,
    end: BeatPosition,
    channel: MidiChannel,
}

impl MidiList {
    /// Flattens the list into one timestamp-ordered stream
    ///
    /// Every note-on in the result has exactly one later note-off. With
    /// `generate_mpe` each note gets its own member channel and its
    /// note-expression events follow it there; otherwise note expression is
    /// sent on the list's channel.
    pub fn export_to_playback_midi_sequence(
        &self,
        params: &PlaybackParams,
        time_base: TimeBase,
        generate_mpe: bool,
        tempo: &dyn TempoMap,
    ) -> MidiMessageSequence {
        let renderer = EventRenderer::new(params, time_base, tempo);
        let channel = self.midi_channel();
        let notes = self.notes();
        let controllers = self.controller_events();
        let mut events = Vec::with_capacity(notes.len() * 2 + controllers.len());

        if generate_mpe {
            render_mpe(&renderer, &notes, &controllers, channel, &mut events);
        } else {
            for note in notes.iter().filter(|n| !n.is_muted()) {
                renderer.render_note(
                    note.note_number(),
                    note.velocity(),
                    note.start_beat(),
                    note.length_beats(),
                    channel,
                    &mut events,
                );
            }
            for event in controllers.iter() {
                if let Some(message) = event.to_midi_message(channel) {
                    renderer.render_message(event.beat_position(), message, &mut events);
                }
            }
        }

        for sysex in self.sysex_events().iter() {
            renderer.render_message(sysex.beat_position(), sysex.to_midi_message(), &mut events);
        }

        finish_stream(events)
    }
}

fn render_mpe(
    renderer: &EventRenderer<'_>,
    notes: &[MidiNote],
    controllers: &[MidiControllerEvent],
    master: MidiChannel,
    out: &mut Vec<TimedMidiMessage>,
) {
    // Expression types already set at a note's own start, by (type, pitch, beat)
    let set_at_start: HashSet<(i32, i32, u64)> = controllers
        .iter()
        .filter(|e| e.is_note_expression())
        .map(|e| (e.controller_type(), e.metadata(), e.beat_position().in_beats().to_bits()))
        .collect();
    let mut assigner = MpeChannelAssigner::new();
    let mut voices = Vec::new();

    for note in notes.iter().filter(|n| !n.is_muted()) {
        let Some((start, end)) = renderer.note_span(note.start_beat(), note.length_beats()) else {
            continue;
        };

        let pitch = note.note_number();
        let channel = assigner.assign(pitch, start, end);
        renderer.push_note(pitch, note.velocity(), (start, end), channel, out);

        // Reset the member channel so it does not keep the previous note's expression
        let initial = [
            (MidiControllerEvent::NOTE_PITCH_BEND_TYPE, DEFAULT_PITCH_BEND),
            (MidiControllerEvent::NOTE_PRESSURE_TYPE, DEFAULT_PRESSURE),
            (MidiControllerEvent::NOTE_TIMBRE_TYPE, DEFAULT_TIMBRE),
        ];
        let start_bits = note.start_beat().in_beats().to_bits();
        for (ty, value) in initial {
            if set_at_start.contains(&(ty, pitch as i32, start_bits)) {
                continue;
            }
            if let Some(message) = controller_message(ty, value, pitch as i32, channel) {
                out.push(TimedMidiMessage::new(renderer.timestamp(start), message));
            }
        }

        voices.push(Voice {
            pitch,
            source: note.range(),
            start,
            end,
            channel,
        });
    }

    for event in controllers {
        if !event.is_note_expression() {
            if let Some(message) = event.to_midi_message(master) {
                renderer.render_message(event.beat_position(), message, out);
            }
            continue;
        }

        let beat = event.beat_position();
        let Some(voice) = voices
            .iter()
            .rev()
            .find(|v| v.pitch as i32 == event.metadata() && v.source.contains(beat))
        else {
            continue;
        };

        // Move with the note when its start was adjusted
        let note_delta = voice.start - (voice.source.start + renderer.params.content_offset);
        let edit_beat = (beat + renderer.params.content_offset + note_delta).max(voice.start);
        if edit_beat >= voice.end {
            continue;
        }

        if let Some(message) = event.to_midi_message(voice.channel) {
            out.push(TimedMidiMessage::new(renderer.timestamp(edit_beat), message));
        }
    }
}
