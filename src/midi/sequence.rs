// MIDI message sequence - Time-stamped message streams
// Timestamps are in seconds or beats depending on the producer

use crate::midi::event::MidiMessage;
use crate::sequencer::timeline::MidiChannel;
use std::collections::HashSet;

/// A message with its timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMidiMessage {
    pub timestamp: f64,
    pub message: MidiMessage,
}

impl TimedMidiMessage {
    pub fn new(timestamp: f64, message: MidiMessage) -> Self {
        Self { timestamp, message }
    }

    /// Ordering rank at equal timestamps: note-offs first, note-ons last
    fn priority(&self) -> u8 {
        match self.message {
            MidiMessage::NoteOff { .. } => 0,
            MidiMessage::NoteOn { .. } => 2,
            _ => 1,
        }
    }
}

/// Ordered stream of timed messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiMessageSequence {
    events: Vec<TimedMidiMessage>,
}

impl MidiMessageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<TimedMidiMessage>) -> Self {
        Self { events }
    }

    pub fn push(&mut self, timestamp: f64, message: MidiMessage) {
        self.events.push(TimedMidiMessage::new(timestamp, message));
    }

    pub fn extend(&mut self, other: &MidiMessageSequence) {
        self.events.extend(other.events.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TimedMidiMessage] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimedMidiMessage> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<TimedMidiMessage> {
        self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Adds `delta` to every timestamp
    pub fn shift(&mut self, delta: f64) {
        for event in &mut self.events {
            event.timestamp += delta;
        }
    }

    /// Timestamp of the last event, 0 when empty
    pub fn end_time(&self) -> f64 {
        self.events.last().map_or(0.0, |e| e.timestamp)
    }

    /// Stable sort by timestamp, then note-off, other, note-on
    pub fn sort(&mut self) {
        sort_for_playback(&mut self.events);
    }

    /// Drops note-offs with no sounding note and inserts a note-off before a
    /// retriggered note. Expects a sorted sequence.
    pub fn fix_note_pairs(&mut self) {
        let mut tracker = NotePairTracker::new();
        let mut fixed = Vec::with_capacity(self.events.len());
        tracker.process(std::mem::take(&mut self.events), &mut fixed);
        let end = fixed.last().map_or(0.0, |e| e.timestamp);
        tracker.close_sounding_notes(end, &mut fixed);
        self.events = fixed;
    }

    /// Events with timestamps in [start, end)
    pub fn events_in_range(&self, start: f64, end: f64) -> impl Iterator<Item = &TimedMidiMessage> {
        self.events
            .iter()
            .filter(move |e| e.timestamp >= start && e.timestamp < end)
    }

    /// Number of note-on messages
    pub fn num_note_ons(&self) -> usize {
        self.events.iter().filter(|e| e.message.is_note_on()).count()
    }
}

impl<'a> IntoIterator for &'a MidiMessageSequence {
    type Item = &'a TimedMidiMessage;
    type IntoIter = std::slice::Iter<'a, TimedMidiMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Stable sort by (timestamp, note-off < other < note-on)
pub fn sort_for_playback(events: &mut [TimedMidiMessage]) {
    events.sort_by(|a, b| {
        a.timestamp
            .total_cmp(&b.timestamp)
            .then(a.priority().cmp(&b.priority()))
    });
}

/// Tracks sounding notes across consecutive chunks of a sorted stream
#[derive(Debug, Default, Clone)]
pub struct NotePairTracker {
    sounding: HashSet<(MidiChannel, u8)>,
}

impl NotePairTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `events` into `out`, repairing unmatched pairs
    pub fn process(&mut self, events: Vec<TimedMidiMessage>, out: &mut Vec<TimedMidiMessage>) {
        for event in events {
            match event.message {
                MidiMessage::NoteOn { channel, note, .. } => {
                    if !self.sounding.insert((channel, note)) {
                        out.push(TimedMidiMessage::new(
                            event.timestamp,
                            MidiMessage::NoteOff {
                                channel,
                                note,
                                velocity: 0,
                            },
                        ));
                    }
                    out.push(event);
                }
                MidiMessage::NoteOff { channel, note, .. } => {
                    if self.sounding.remove(&(channel, note)) {
                        out.push(event);
                    }
                }
                _ => out.push(event),
            }
        }
    }

    /// Emits note-offs for every note still sounding
    pub fn close_sounding_notes(&mut self, timestamp: f64, out: &mut Vec<TimedMidiMessage>) {
        let mut sounding: Vec<_> = self.sounding.drain().collect();
        sounding.sort();
        for (channel, note) in sounding {
            out.push(TimedMidiMessage::new(
                timestamp,
                MidiMessage::NoteOff {
                    channel,
                    note,
                    velocity: 0,
                },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: MidiChannel::default(),
            note,
            velocity: 100,
        }
    }

    fn off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: MidiChannel::default(),
            note,
            velocity: 0,
        }
    }

    #[test]
    fn test_sort_orders_note_off_first() {
        let mut seq = MidiMessageSequence::new();
        seq.push(1.0, on(62));
        seq.push(0.0, on(60));
        seq.push(1.0, off(60));

        seq.sort();
        assert_eq!(seq.events()[0].message, on(60));
        assert_eq!(seq.events()[1].message, off(60));
        assert_eq!(seq.events()[2].message, on(62));
    }

    #[test]
    fn test_fix_drops_dangling_note_off() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, off(60));
        seq.push(1.0, on(60));
        seq.push(2.0, off(60));

        seq.fix_note_pairs();
        assert_eq!(seq.len(), 2);
        assert!(seq.events()[0].message.is_note_on());
    }

    #[test]
    fn test_fix_inserts_note_off_on_retrigger() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(1.0, on(60));
        seq.push(2.0, off(60));

        seq.fix_note_pairs();
        let kinds: Vec<_> = seq.iter().map(|e| (e.timestamp, e.message.is_note_on())).collect();
        assert_eq!(kinds, vec![(0.0, true), (1.0, false), (1.0, true), (2.0, false)]);
    }

    #[test]
    fn test_fix_closes_sounding_notes() {
        let mut seq = MidiMessageSequence::new();
        seq.push(0.0, on(60));
        seq.push(3.0, on(64));
        seq.push(4.0, off(64));

        seq.fix_note_pairs();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.events()[3].message, off(60));
        assert_eq!(seq.events()[3].timestamp, 4.0);
    }

    #[test]
    fn test_events_in_range() {
        let mut seq = MidiMessageSequence::new();
        for i in 0..8 {
            seq.push(i as f64, on(60 + i as u8));
        }
        assert_eq!(seq.events_in_range(2.0, 5.0).count(), 3);
        seq.shift(10.0);
        assert_eq!(seq.end_time(), 17.0);
    }
}
