// System exclusive events

use crate::midi::event::MidiMessage;
use crate::sequence::event_list::MidiEventType;
use crate::sequencer::timeline::BeatPosition;
use crate::store::{ids, NodeId, NodeView, Store, UndoManager};

/// Raw sysex payload at a beat, including the F0/F7 framing
#[derive(Debug, Clone, PartialEq)]
pub struct MidiSysexEvent {
    id: NodeId,
    data: Vec<u8>,
    beat: BeatPosition,
}

impl MidiSysexEvent {
    /// Creates the detached node, adding missing F0/F7 framing bytes
    pub fn create_state(store: &Store, data: &[u8], beat: BeatPosition) -> NodeId {
        let node = store.create_node(ids::SYSEX);
        store.set_property(node, ids::SYSEX_DATA, framed(data), None);
        store.set_property(node, ids::SYSEX_BEAT, beat.in_beats(), None);
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn beat_position(&self) -> BeatPosition {
        self.beat
    }

    pub fn set_data(&self, store: &Store, data: &[u8], um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::SYSEX_DATA, framed(data), um);
    }

    pub fn set_beat_position(&self, store: &Store, beat: BeatPosition, um: Option<&mut UndoManager>) {
        store.set_property(self.id, ids::SYSEX_BEAT, beat.in_beats(), um);
    }

    pub fn to_midi_message(&self) -> MidiMessage {
        MidiMessage::SysEx(self.data.clone())
    }
}

fn framed(data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(data.len() + 2);
    if data.first() != Some(&0xF0) {
        bytes.push(0xF0);
    }
    bytes.extend_from_slice(data);
    if bytes.len() < 2 || bytes.last() != Some(&0xF7) {
        bytes.push(0xF7);
    }
    bytes
}

impl MidiEventType for MidiSysexEvent {
    const NODE_TYPE: &'static str = ids::SYSEX;

    fn from_node(view: &NodeView<'_>) -> Option<Self> {
        let data = view.get_bytes(ids::SYSEX_DATA)?;
        if data.is_empty() {
            return None;
        }

        Some(Self {
            id: view.id(),
            data: data.to_vec(),
            beat: BeatPosition::from_beats(view.get_f64(ids::SYSEX_BEAT)?),
        })
    }

    fn beat_position(&self) -> BeatPosition {
        self.beat
    }
}
