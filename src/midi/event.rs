// MIDI message types

use crate::sequencer::timeline::MidiChannel;

/// Centre value of a 14-bit pitch bend
pub const PITCH_BEND_CENTRE: u16 = 8192;

/// Channel voice message or system exclusive payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: MidiChannel, note: u8, velocity: u8 },
    NoteOff { channel: MidiChannel, note: u8, velocity: u8 },
    Aftertouch { channel: MidiChannel, note: u8, pressure: u8 },
    ControlChange { channel: MidiChannel, controller: u8, value: u8 },
    ProgramChange { channel: MidiChannel, program: u8 },
    ChannelPressure { channel: MidiChannel, pressure: u8 },
    /// 14-bit value, 8192 = centre
    PitchBend { channel: MidiChannel, value: u16 },
    /// Complete message including the F0 and F7 framing bytes
    SysEx(Vec<u8>),
}

impl MidiMessage {
    /// Parse a raw MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;

        if status == 0xF0 {
            return Some(MidiMessage::SysEx(bytes.to_vec()));
        }

        let channel = MidiChannel::from_status(status);
        let data1 = data.first().map(|b| b & 0x7F);
        let data2 = data.get(1).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x90 => {
                let (note, velocity) = (data1?, data2?);
                // Velocity 0 = Note Off
                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data1?,
                velocity: data2?,
            }),
            0xA0 => Some(MidiMessage::Aftertouch {
                channel,
                note: data1?,
                pressure: data2?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: data1?,
                value: data2?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data1?,
            }),
            0xD0 => Some(MidiMessage::ChannelPressure {
                channel,
                pressure: data1?,
            }),
            0xE0 => {
                let lsb = data1? as u16;
                let msb = data2? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Encode as status + data bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | channel.index(), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | channel.index(), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::Aftertouch { channel, note, pressure } => {
                vec![0xA0 | channel.index(), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![0xB0 | channel.index(), controller & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | channel.index(), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | channel.index(), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let value = (*value).min(0x3FFF);
                vec![
                    0xE0 | channel.index(),
                    (value & 0x7F) as u8,
                    (value >> 7) as u8,
                ]
            }
            MidiMessage::SysEx(data) => data.clone(),
        }
    }

    /// Channel of a voice message, None for sysex
    pub fn channel(&self) -> Option<MidiChannel> {
        match self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::Aftertouch { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(*channel),
            MidiMessage::SysEx(_) => None,
        }
    }

    /// Same message moved to another channel
    pub fn with_channel(&self, new_channel: MidiChannel) -> Self {
        let mut message = self.clone();
        match &mut message {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::Aftertouch { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => *channel = new_channel,
            MidiMessage::SysEx(_) => {}
        }
        message
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }

    /// Note number for note on/off and polyphonic aftertouch
    pub fn note_number(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { note, .. }
            | MidiMessage::NoteOff { note, .. }
            | MidiMessage::Aftertouch { note, .. } => Some(*note),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u8) -> MidiChannel {
        MidiChannel::new(n)
    }

    #[test]
    fn test_note_on() {
        let bytes = [0x90, 60, 100]; // Note On, note 60 (C4), velocity 100
        let event = MidiMessage::from_bytes(&bytes).unwrap();

        match event {
            MidiMessage::NoteOn { channel, note, velocity } => {
                assert_eq!(channel, ch(1));
                assert_eq!(note, 60);
                assert_eq!(velocity, 100);
            }
            _ => panic!("Expected NoteOn event"),
        }
    }

    #[test]
    fn test_note_off_velocity_zero() {
        // Note On with velocity 0 = Note Off
        let bytes = [0x93, 64, 0];
        let event = MidiMessage::from_bytes(&bytes).unwrap();

        match event {
            MidiMessage::NoteOff { channel, note, .. } => {
                assert_eq!(channel, ch(4));
                assert_eq!(note, 64);
            }
            _ => panic!("Expected NoteOff event (velocity 0)"),
        }
    }

    #[test]
    fn test_pitch_bend() {
        let bytes = [0xE0, 0x00, 0x40];
        let event = MidiMessage::from_bytes(&bytes).unwrap();
        assert_eq!(
            event,
            MidiMessage::PitchBend {
                channel: ch(1),
                value: PITCH_BEND_CENTRE
            }
        );
        assert_eq!(event.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_encode_messages() {
        let cc = MidiMessage::ControlChange {
            channel: ch(16),
            controller: 7,
            value: 127,
        };
        assert_eq!(cc.to_bytes(), vec![0xBF, 7, 127]);

        let pressure = MidiMessage::ChannelPressure {
            channel: ch(2),
            pressure: 90,
        };
        assert_eq!(pressure.to_bytes(), vec![0xD1, 90]);
        assert_eq!(MidiMessage::from_bytes(&pressure.to_bytes()), Some(pressure));
    }

    #[test]
    fn test_sysex() {
        let bytes = [0xF0, 0x7E, 0x01, 0xF7];
        let event = MidiMessage::from_bytes(&bytes).unwrap();
        assert_eq!(event, MidiMessage::SysEx(bytes.to_vec()));
        assert_eq!(event.channel(), None);
    }

    #[test]
    fn test_truncated_messages() {
        assert!(MidiMessage::from_bytes(&[]).is_none());
        assert!(MidiMessage::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiMessage::from_bytes(&[0xE0]).is_none());
        assert!(MidiMessage::from_bytes(&[0xF8]).is_none());
    }

    #[test]
    fn test_with_channel() {
        let on = MidiMessage::NoteOn {
            channel: ch(1),
            note: 60,
            velocity: 80,
        };
        let moved = on.with_channel(ch(5));
        assert_eq!(moved.channel(), Some(ch(5)));
        assert_eq!(moved.note_number(), Some(60));
        assert!(moved.is_note_on());
    }
}
