// Controller events
// CC, pitch wheel, program, pressure and MPE note-expression values at a beat

use crate::midi::event::MidiMessage;
use crate::sequence::event_list::MidiEventType;
use crate::sequencer::timeline::{BeatPosition, MidiChannel};
use crate::store::{ids, NodeId, NodeView, Store, UndoManager};

/// Controller number used for MPE timbre
pub const TIMBRE_CC: u8 = 74;

/// Largest stored controller value (14-bit)
pub const MAX_VALUE: i32 = 0x3FFF;

/// A controller value at a beat
///
/// Values are stored 14-bit. Channel messages with 7-bit values (CC,
/// program, pressure) are shifted left by 7.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiControllerEvent {
    id: NodeId,
    controller_type: i32,
    value: i32,
    beat: BeatPosition,
    metadata: i32,
}

impl MidiControllerEvent {
    // Controller types beyond the 0-127 CC numbers
    pub const PROGRAM_CHANGE_TYPE: i32 = 0x1001;
    pub const AFTERTOUCH_TYPE: i32 = 0x1002;
    pub const PITCH_WHEEL_TYPE: i32 = 0x1003;
    pub const CHANNEL_PRESSURE_TYPE: i32 = 0x1004;

    // MPE dimensions, metadata holds the note number
    pub const NOTE_PITCH_BEND_TYPE: i32 = 0x1005;
    pub const NOTE_PRESSURE_TYPE: i32 = 0x1006;
    pub const NOTE_TIMBRE_TYPE: i32 = 0x1007;

    /// Creates the detached node for a new controller event
    pub fn create_state(
        store: &Store,
        controller_type: i32,
        beat: BeatPosition,
        value: i32,
        metadata: i32,
    ) -> NodeId {
        let node = store.create_node(ids::CONTROL);
        store.set_property(node, ids::CONTROL_BEAT, beat.in_beats(), None);
        store.set_property(node, ids::CONTROL_TYPE, controller_type, None);
        store.set_property(node, ids::CONTROL_VALUE, value.clamp(0, MAX_VALUE), None);
        if metadata != 0 {
            store.set_property(node, ids::CONTROL_METADATA, metadata, None);
        }
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn controller_type(&self) -> i32 {
        self.controller_type
    }

    pub fn controller_value(&self) -> i32 {
        self.value
    }

    pub fn beat_position(&self) -> BeatPosition {
        self.beat
    }

    pub fn metadata(&self) -> i32 {
        self.metadata
    }

    pub fn set_controller_value(&self, store: &Store, value: i32, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::CONTROL_VALUE, value.clamp(0, MAX_VALUE), um);
    }

    pub fn set_beat_position(&self, store: &Store, beat: BeatPosition, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::CONTROL_BEAT, beat.in_beats(), um);
    }

    pub fn set_metadata(&self, store: &Store, metadata: i32, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::CONTROL_METADATA, metadata, um);
    }

    pub fn set_type(&self, store: &Store, controller_type: i32, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::CONTROL_TYPE, controller_type, um);
    }

    pub fn is_note_expression_type(controller_type: i32) -> bool {
        matches!(
            controller_type,
            Self::NOTE_PITCH_BEND_TYPE | Self::NOTE_PRESSURE_TYPE | Self::NOTE_TIMBRE_TYPE
        )
    }

    pub fn is_note_expression(&self) -> bool {
        Self::is_note_expression_type(self.controller_type)
    }

    /// Display name of a controller type
    pub fn controller_type_name(controller_type: i32) -> String {
        match controller_type {
            Self::PROGRAM_CHANGE_TYPE => "Program Change".to_string(),
            Self::AFTERTOUCH_TYPE => "Aftertouch".to_string(),
            Self::PITCH_WHEEL_TYPE => "Pitch Wheel".to_string(),
            Self::CHANNEL_PRESSURE_TYPE => "Channel Pressure".to_string(),
            Self::NOTE_PITCH_BEND_TYPE => "Note Pitch Bend".to_string(),
            Self::NOTE_PRESSURE_TYPE => "Note Pressure".to_string(),
            Self::NOTE_TIMBRE_TYPE => "Note Timbre".to_string(),
            0..=127 => match controller_type {
                1 => "CC 1 Modulation".to_string(),
                7 => "CC 7 Volume".to_string(),
                10 => "CC 10 Pan".to_string(),
                11 => "CC 11 Expression".to_string(),
                64 => "CC 64 Sustain".to_string(),
                74 => "CC 74 Brightness".to_string(),
                n => format!("CC {}", n),
            },
            other => format!("Unknown ({:#x})", other),
        }
    }

    /// Converts a channel message to (type, 14-bit value, metadata)
    pub fn from_midi_message(message: &MidiMessage) -> Option<(i32, i32, i32)> {
        match *message {
            MidiMessage::ControlChange {
                controller, value, ..
            } => Some((controller as i32, (value as i32) << 7, 0)),
            MidiMessage::ProgramChange { program, .. } => {
                Some((Self::PROGRAM_CHANGE_TYPE, (program as i32) << 7, 0))
            }
            MidiMessage::Aftertouch { note, pressure, .. } => {
                Some((Self::AFTERTOUCH_TYPE, (pressure as i32) << 7, note as i32))
            }
            MidiMessage::ChannelPressure { pressure, .. } => {
                Some((Self::CHANNEL_PRESSURE_TYPE, (pressure as i32) << 7, 0))
            }
            MidiMessage::PitchBend { value, .. } => Some((Self::PITCH_WHEEL_TYPE, value as i32, 0)),
            _ => None,
        }
    }

    /// Channel message for this event. Note-expression events need a channel
    /// assigned by the exporter and map to their per-channel equivalent.
    pub fn to_midi_message(&self, channel: MidiChannel) -> Option<MidiMessage> {
        controller_message(self.controller_type, self.value, self.metadata, channel)
    }
}

/// Builds the channel message for a controller type and 14-bit value
pub fn controller_message(
    controller_type: i32,
    value: i32,
    metadata: i32,
    channel: MidiChannel,
) -> Option<MidiMessage> {
    let value = value.clamp(0, MAX_VALUE);
    let seven_bit = (value >> 7) as u8;

    match controller_type {
        0..=127 => Some(MidiMessage::ControlChange {
            channel,
            controller: controller_type as u8,
            value: seven_bit,
        }),
        MidiControllerEvent::PROGRAM_CHANGE_TYPE => Some(MidiMessage::ProgramChange {
            channel,
            program: seven_bit,
        }),
        MidiControllerEvent::AFTERTOUCH_TYPE => Some(MidiMessage::Aftertouch {
            channel,
            note: metadata.clamp(0, 127) as u8,
            pressure: seven_bit,
        }),
        MidiControllerEvent::PITCH_WHEEL_TYPE | MidiControllerEvent::NOTE_PITCH_BEND_TYPE => {
            Some(MidiMessage::PitchBend {
                channel,
                value: value as u16,
            })
        }
        MidiControllerEvent::CHANNEL_PRESSURE_TYPE | MidiControllerEvent::NOTE_PRESSURE_TYPE => {
            Some(MidiMessage::ChannelPressure {
                channel,
                pressure: seven_bit,
            })
        }
        MidiControllerEvent::NOTE_TIMBRE_TYPE => Some(MidiMessage::ControlChange {
            channel,
            controller: TIMBRE_CC,
            value: seven_bit,
        }),
        _ => None,
    }
}

impl MidiEventType for MidiControllerEvent {
    const NODE_TYPE: &'static str = ids::CONTROL;

    fn from_node(view: &NodeView<'_>) -> Option<Self> {
        Some(Self {
            id: view.id(),
            controller_type: view.get_i64(ids::CONTROL_TYPE)? as i32,
            value: view.get_i64(ids::CONTROL_VALUE).unwrap_or(0).clamp(0, MAX_VALUE as i64) as i32,
            beat: BeatPosition::from_beats(view.get_f64(ids::CONTROL_BEAT)?),
            metadata: view.get_i64(ids::CONTROL_METADATA).unwrap_or(0) as i32,
        })
    }

    fn beat_position(&self) -> BeatPosition {
        self.beat
    }
}
