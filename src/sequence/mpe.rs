// MPE helpers
// Member channel allocation and note-expression defaults

use crate::sequencer::timeline::{BeatPosition, MidiChannel};
use std::ops::RangeInclusive;

/// Member channels of a lower-zone MPE layout, channel 1 is the master
pub const MEMBER_CHANNELS: RangeInclusive<u8> = 2..=16;

/// 14-bit values used when a note has no explicit initial expression
pub const DEFAULT_PITCH_BEND: i32 = 8192;
pub const DEFAULT_PRESSURE: i32 = 0;
pub const DEFAULT_TIMBRE: i32 = 8192;

pub fn is_member_channel(channel: MidiChannel) -> bool {
    MEMBER_CHANNELS.contains(&channel.number())
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    note: u8,
    end: BeatPosition,
}

/// Round-robin allocation of notes to MPE member channels
///
/// Notes must be assigned in start order. When every channel is busy the
/// voice that ends first is stolen.
#[derive(Debug, Clone)]
pub struct MpeChannelAssigner {
    voices: Vec<Option<Voice>>,
    next: usize,
}

impl MpeChannelAssigner {
    pub fn new() -> Self {
        Self {
            voices: vec![None; MEMBER_CHANNELS.count()],
            next: 0,
        }
    }

    pub fn assign(&mut self, note: u8, start: BeatPosition, end: BeatPosition) -> MidiChannel {
        for voice in &mut self.voices {
            if voice.is_some_and(|v| v.end <= start) {
                *voice = None;
            }
        }

        let count = self.voices.len();
        let free = (0..count)
            .map(|i| (self.next + i) % count)
            .find(|&i| self.voices[i].is_none());

        let index = match free {
            Some(index) => index,
            None => {
                let (index, stolen) = self
                    .voices
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| v.map(|v| (i, v)))
                    .min_by(|a, b| a.1.end.total_cmp(&b.1.end))
                    .unwrap_or((self.next, Voice { note, end }));
                log::debug!(
                    "all MPE channels busy, stealing note {} on channel {}",
                    stolen.note,
                    index + *MEMBER_CHANNELS.start() as usize
                );
                index
            }
        };

        self.voices[index] = Some(Voice { note, end });
        self.next = (index + 1) % count;
        Self::channel_for(index)
    }

    fn channel_for(index: usize) -> MidiChannel {
        MidiChannel::new(*MEMBER_CHANNELS.start() + index as u8)
    }
}

impl Default for MpeChannelAssigner {
    fn default() -> Self {
        Self::new()
    }
}
