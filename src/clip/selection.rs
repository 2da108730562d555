// Selection - Selected events of a clip and a scoped override

use crate::sequence::{MidiControllerEvent, MidiList, MidiNote, MidiSysexEvent};
use crate::store::NodeId;
use std::cell::RefCell;

/// Event nodes selected for editing, in selection order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedMidiEvents {
    events: Vec<NodeId>,
}

impl SelectedMidiEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut selection = Self::new();
        for id in ids {
            selection.select(id);
        }
        selection
    }

    pub fn select(&mut self, id: NodeId) {
        if !self.events.contains(&id) {
            self.events.push(id);
        }
    }

    pub fn deselect(&mut self, id: NodeId) {
        self.events.retain(|e| *e != id);
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.events.contains(&id)
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Selected notes of `list`, in beat order
    pub fn selected_notes(&self, list: &MidiList) -> Vec<MidiNote> {
        list.notes()
            .iter()
            .filter(|n| self.is_selected(n.id()))
            .cloned()
            .collect()
    }

    pub fn selected_controller_events(&self, list: &MidiList) -> Vec<MidiControllerEvent> {
        list.controller_events()
            .iter()
            .filter(|e| self.is_selected(e.id()))
            .cloned()
            .collect()
    }

    pub fn selected_sysex_events(&self, list: &MidiList) -> Vec<MidiSysexEvent> {
        list.sysex_events()
            .iter()
            .filter(|e| self.is_selected(e.id()))
            .cloned()
            .collect()
    }
}

/// Replaces a selection for as long as the guard lives
///
/// The previous selection comes back when the guard drops, also on early
/// return or unwinding.
pub struct ScopedEventsList<'a> {
    slot: &'a RefCell<Option<SelectedMidiEvents>>,
    previous: Option<SelectedMidiEvents>,
}

impl<'a> ScopedEventsList<'a> {
    pub fn new(slot: &'a RefCell<Option<SelectedMidiEvents>>, events: SelectedMidiEvents) -> Self {
        let previous = slot.replace(Some(events));
        Self { slot, previous }
    }
}

impl Drop for ScopedEventsList<'_> {
    fn drop(&mut self) {
        self.slot.replace(self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::timeline::{BeatDuration, BeatPosition};

    #[test]
    fn test_selection() {
        let list = MidiList::new();
        let a = list.add_note(60, BeatPosition::from_beats(1.0), BeatDuration::from_beats(1.0), 100, 0, None);
        let b = list.add_note(62, BeatPosition::from_beats(0.0), BeatDuration::from_beats(1.0), 100, 0, None);
        list.add_note(64, BeatPosition::from_beats(2.0), BeatDuration::from_beats(1.0), 100, 0, None);

        let mut selection = SelectedMidiEvents::from_ids([a, b, a]);
        assert_eq!(selection.len(), 2);

        let pitches: Vec<_> = selection.selected_notes(&list).iter().map(|n| n.note_number()).collect();
        assert_eq!(pitches, vec![62, 60]);

        selection.deselect(a);
        assert!(!selection.is_selected(a));
        assert!(selection.selected_controller_events(&list).is_empty());
    }

    #[test]
    fn test_scoped_list_restores_previous() {
        let list = MidiList::new();
        let id = list.add_note(60, BeatPosition::zero(), BeatDuration::from_beats(1.0), 100, 0, None);
        let slot = RefCell::new(None);

        {
            let _scope = ScopedEventsList::new(&slot, SelectedMidiEvents::from_ids([id]));
            assert_eq!(slot.borrow().as_ref().map(SelectedMidiEvents::len), Some(1));

            {
                let _inner = ScopedEventsList::new(&slot, SelectedMidiEvents::new());
                assert!(slot.borrow().as_ref().is_some_and(SelectedMidiEvents::is_empty));
            }
            assert!(slot.borrow().as_ref().is_some_and(|s| s.is_selected(id)));
        }
        assert!(slot.borrow().is_none());
    }

    #[test]
    fn test_scoped_list_restores_on_early_return() {
        fn edit(slot: &RefCell<Option<SelectedMidiEvents>>, fail: bool) -> Result<(), ()> {
            let _scope = ScopedEventsList::new(slot, SelectedMidiEvents::new());
            if fail {
                return Err(());
            }
            Ok(())
        }

        let slot = RefCell::new(Some(SelectedMidiEvents::new()));
        assert!(edit(&slot, true).is_err());
        assert!(slot.borrow().is_some());
    }
}
