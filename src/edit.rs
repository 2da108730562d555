// Edit - The context clips live in
// Owns the store, the undo history, the tempo sequence and the groove templates

use crate::clip::MidiClip;
use crate::clip::groove::GrooveTemplateManager;
use crate::config::EngineConfig;
use crate::sequencer::tempo_map::TempoSequence;
use crate::store::persistence::{NodeSnapshot, PersistenceError};
use crate::store::undo::UndoError;
use crate::store::{ids, NodeId, Store, UndoManager};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

pub struct Edit {
    store: Store,
    state: NodeId,
    undo_manager: RefCell<UndoManager>,
    tempo_sequence: RefCell<TempoSequence>,
    tempo_generation: Cell<u64>,
    groove_templates: RefCell<GrooveTemplateManager>,
    config: EngineConfig,
}

impl Edit {
    pub fn new(config: EngineConfig) -> Rc<Self> {
        let store = Store::new();
        let state = store.create_node(ids::EDIT);
        Self::with_state(store, state, config)
    }

    fn with_state(store: Store, state: NodeId, config: EngineConfig) -> Rc<Self> {
        let tempo = TempoSequence::new(config.default_tempo(), config.default_time_signature);
        Rc::new(Self {
            store,
            state,
            undo_manager: RefCell::new(UndoManager::with_capacity(config.undo_history_limit)),
            tempo_sequence: RefCell::new(tempo),
            tempo_generation: Cell::new(0),
            groove_templates: RefCell::new(GrooveTemplateManager::new()),
            config,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> NodeId {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The edit's undo history. Drop the guard before calling `undo`/`redo`.
    pub fn undo_manager(&self) -> RefMut<'_, UndoManager> {
        self.undo_manager.borrow_mut()
    }

    pub fn undo(&self) -> Result<String, UndoError> {
        self.undo_manager.borrow_mut().undo(&self.store)
    }

    pub fn redo(&self) -> Result<String, UndoError> {
        self.undo_manager.borrow_mut().redo(&self.store)
    }

    pub fn tempo_sequence(&self) -> Ref<'_, TempoSequence> {
        self.tempo_sequence.borrow()
    }

    /// Changes the tempo sequence. Clips rebuild their looped sequences afterwards.
    pub fn modify_tempo_sequence(&self, f: impl FnOnce(&mut TempoSequence)) {
        f(&mut self.tempo_sequence.borrow_mut());
        self.tempo_generation.set(self.tempo_generation.get() + 1);
    }

    /// Bumped on every tempo sequence change
    pub fn tempo_generation(&self) -> u64 {
        self.tempo_generation.get()
    }

    pub fn groove_templates(&self) -> Ref<'_, GrooveTemplateManager> {
        self.groove_templates.borrow()
    }

    pub fn groove_templates_mut(&self) -> RefMut<'_, GrooveTemplateManager> {
        self.groove_templates.borrow_mut()
    }

    pub fn create_track(&self, name: &str, um: Option<&mut UndoManager>) -> NodeId {
        let track = self.store.create_node(ids::TRACK);
        self.store.set_property(track, ids::NAME, name, None);
        self.store.add_child(self.state, track, None, um);
        track
    }

    pub fn tracks(&self) -> Vec<NodeId> {
        self.store.children_of_type(self.state, ids::TRACK)
    }

    /// Track a clip lives on
    pub fn track_of(&self, clip: NodeId) -> Option<NodeId> {
        self.store.parent(clip).filter(|t| self.store.has_type(*t, ids::TRACK))
    }

    /// Every clip, in track order
    pub fn clips(self: &Rc<Self>) -> Vec<MidiClip> {
        self.tracks()
            .into_iter()
            .flat_map(|track| self.clips_on_track(track))
            .collect()
    }

    pub fn clips_on_track(self: &Rc<Self>, track: NodeId) -> Vec<MidiClip> {
        self.store
            .children_of_type(track, ids::MIDICLIP)
            .into_iter()
            .map(|state| MidiClip::from_state(self, state))
            .collect()
    }

    pub fn to_ron(&self) -> Result<String, PersistenceError> {
        NodeSnapshot::capture(&self.store, self.state)
            .ok_or(PersistenceError::MissingNode(self.state))?
            .to_ron()
    }

    /// Rebuilds an edit tree written by `to_ron`
    pub fn from_ron(config: EngineConfig, ron_data: &str) -> Result<Rc<Self>, PersistenceError> {
        let snapshot = NodeSnapshot::from_ron(ron_data)?;
        if snapshot.node_type != ids::EDIT {
            return Err(PersistenceError::WrongNodeType {
                expected: ids::EDIT.to_string(),
                found: snapshot.node_type,
            });
        }

        let store = Store::new();
        let state = snapshot.instantiate(&store);
        Ok(Self::with_state(store, state, config))
    }
}

impl std::fmt::Debug for Edit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edit")
            .field("state", &self.state)
            .field("tracks", &self.tracks().len())
            .finish()
    }
}
