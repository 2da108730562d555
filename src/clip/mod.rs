// MIDI clip - Takes, loop geometry, quantisation and playback of one clip
// The clip node holds its takes as SEQUENCE children and its settings as properties

pub mod comp;
pub mod groove;
pub mod level;
pub mod looping;
pub mod quantisation;
pub mod realtime;
pub mod selection;

pub use comp::{build_comp, CompError, CompRegion};
pub use groove::{GrooveTemplate, GrooveTemplateManager};
pub use level::{ClipLevel, LaunchHandle, LiveClipLevel, PlayState};
pub use looping::{create_sequence_looped, LoopGeometry, LoopedSequenceType};
pub use quantisation::QuantisationType;
pub use realtime::{PlaybackSource, RealtimeSequence};
pub use selection::{ScopedEventsList, SelectedMidiEvents};

use crate::edit::Edit;
use crate::midi::sequence::MidiMessageSequence;
use crate::sequence::{MidiList, MidiNote, NoteAutomationType, PlaybackParams, TimeBase};
use crate::sequencer::tempo_map::TempoMap;
use crate::sequencer::timeline::{
    BeatDuration, BeatPosition, BeatRange, MidiChannel, TimeDuration, TimeRange,
};
use crate::store::undo::in_transaction;
use crate::store::{ids, NodeId, Store, StoreChange, StoreListener, UndoManager, Value};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

/// Channel General MIDI reserves for drums
const RHYTHM_CHANNEL: u8 = 10;

/// Clip properties copied by `clone_from` and `unpack_takes`
const CLIP_SETTINGS: &[&str] = &[
    ids::OFFSET,
    ids::LOOP_START_BEATS,
    ids::LOOP_LENGTH_BEATS,
    ids::ORIGINAL_LENGTH,
    ids::LOOPED_SEQUENCE_TYPE,
    ids::PROXY_ALLOWED,
    ids::GROOVE_TEMPLATE,
    ids::GROOVE_STRENGTH,
    ids::MPE_MODE,
    ids::QUANTISATION_TYPE,
    ids::QUANTISATION_PROPORTION,
    ids::QUANTISE_NOTE_OFFS,
    ids::VOLUME_DB,
    ids::MUTE,
];

/// Clip state that store notifications update
struct ClipShared {
    state: NodeId,
    level: Arc<ClipLevel>,
    looped: RefCell<Option<MidiList>>,
    looped_tempo_generation: Cell<u64>,
    takes: RefCell<Vec<MidiList>>,
    takes_dirty: Cell<bool>,
}

impl ClipShared {
    fn clear_looped(&self) {
        if self.looped.replace(None).is_some() {
            log::debug!("cleared looped sequence of clip {}", self.state);
        }
    }
}

impl StoreListener for ClipShared {
    fn store_changed(&self, store: &Store, change: &StoreChange) {
        match change {
            StoreChange::ChildAdded { parent, child_type, .. }
            | StoreChange::ChildRemoved { parent, child_type, .. }
                if *parent == self.state && child_type == ids::SEQUENCE =>
            {
                self.takes_dirty.set(true);
            }
            StoreChange::ChildOrderChanged { parent, .. } if *parent == self.state => {
                self.takes_dirty.set(true);
            }
            StoreChange::PropertyChanged { node, property, .. } if *node == self.state => {
                match property.as_str() {
                    ids::VOLUME_DB => {
                        let db = store.get_f64(self.state, ids::VOLUME_DB).unwrap_or(0.0);
                        self.level.set_db(db as f32);
                        return;
                    }
                    ids::MUTE => {
                        self.level.set_mute(store.get_bool(self.state, ids::MUTE).unwrap_or(false));
                        return;
                    }
                    ids::NAME => return,
                    _ => {}
                }
            }
            _ => {}
        }

        // Takes, loop, quantisation, groove or event edits
        self.clear_looped();
    }
}

/// A MIDI clip on a track
pub struct MidiClip {
    edit: Rc<Edit>,
    state: NodeId,
    shared: Rc<ClipShared>,
    launch_handle: Arc<LaunchHandle>,
    selected_events: RefCell<Option<SelectedMidiEvents>>,
}

impl std::fmt::Debug for MidiClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiClip")
            .field("state", &self.state)
            .field("name", &self.name())
            .field("start", &self.start())
            .field("length", &self.length())
            .finish()
    }
}

impl MidiClip {
    /// Creates a clip with one empty take on `track`
    pub fn create(
        edit: &Rc<Edit>,
        track: NodeId,
        name: &str,
        start: BeatPosition,
        length: BeatDuration,
        um: Option<&mut UndoManager>,
    ) -> MidiClip {
        let store = edit.store();
        let state = store.create_node(ids::MIDICLIP);
        store.set_property(state, ids::NAME, name, None);
        store.set_property(state, ids::ITEM_ID, uuid::Uuid::new_v4().to_string(), None);
        store.set_property(state, ids::START, start.in_beats(), None);
        store.set_property(state, ids::LENGTH, length.in_beats().max(0.0), None);
        store.set_property(state, ids::PROXY_ALLOWED, edit.config().use_proxy_by_default, None);
        store.set_property(state, ids::CURRENT_TAKE, 0, None);

        let take = MidiList::create_state(store);
        store.set_property(take, ids::CHANNEL, edit.config().default_channel().number(), None);
        store.add_child(state, take, None, None);

        store.add_child(track, state, None, um);
        Self::from_state(edit, state)
    }

    /// Wraps an existing MIDICLIP node
    pub fn from_state(edit: &Rc<Edit>, state: NodeId) -> MidiClip {
        let store = edit.store();
        assert!(store.has_type(state, ids::MIDICLIP), "Node {} is not a MIDI clip", state);

        if store.first_child_of_type(state, ids::SEQUENCE).is_none() {
            let take = MidiList::create_state(store);
            store.add_child(state, take, None, None);
        }

        let level = Arc::new(ClipLevel::new(
            store.get_f64(state, ids::VOLUME_DB).unwrap_or(0.0) as f32,
            store.get_bool(state, ids::MUTE).unwrap_or(false),
        ));

        let shared = Rc::new(ClipShared {
            state,
            level,
            looped: RefCell::new(None),
            looped_tempo_generation: Cell::new(edit.tempo_generation()),
            takes: RefCell::new(Vec::new()),
            takes_dirty: Cell::new(true),
        });
        let weak: Weak<dyn StoreListener> = Rc::downgrade(&shared) as Weak<dyn StoreListener>;
        store.add_listener(state, weak);

        MidiClip {
            edit: Rc::clone(edit),
            state,
            shared,
            launch_handle: Arc::new(LaunchHandle::new()),
            selected_events: RefCell::new(None),
        }
    }

    pub fn state(&self) -> NodeId {
        self.state
    }

    pub fn edit(&self) -> &Rc<Edit> {
        &self.edit
    }

    fn store(&self) -> &Store {
        self.edit.store()
    }

    fn get_f64(&self, name: &str) -> Option<f64> {
        self.store().get_f64(self.state, name)
    }

    fn set(&self, name: &str, value: impl Into<Value>, um: Option<&mut UndoManager>) {
        self.store().set_property(self.state, name, value, um);
    }

    pub fn item_id(&self) -> String {
        self.store().get_string(self.state, ids::ITEM_ID).unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.store().get_string(self.state, ids::NAME).unwrap_or_default()
    }

    pub fn set_name(&self, name: &str, um: Option<&mut UndoManager>) {
        self.set(ids::NAME, name, um);
    }

    // Position

    pub fn start(&self) -> BeatPosition {
        BeatPosition::from_beats(self.get_f64(ids::START).unwrap_or(0.0))
    }

    pub fn set_start(&self, start: BeatPosition, um: Option<&mut UndoManager>) {
        self.set(ids::START, start.in_beats(), um);
    }

    pub fn length(&self) -> BeatDuration {
        BeatDuration::from_beats(self.get_f64(ids::LENGTH).unwrap_or(0.0))
    }

    pub fn set_length(&self, length: BeatDuration, um: Option<&mut UndoManager>) {
        self.set(ids::LENGTH, length.in_beats().max(0.0), um);
    }

    /// How far into the content the clip starts
    pub fn offset(&self) -> BeatDuration {
        BeatDuration::from_beats(self.get_f64(ids::OFFSET).unwrap_or(0.0))
    }

    pub fn set_offset(&self, offset: BeatDuration, um: Option<&mut UndoManager>) {
        self.set(ids::OFFSET, offset.in_beats().max(0.0), um);
    }

    pub fn end(&self) -> BeatPosition {
        self.start() + self.length()
    }

    pub fn clip_range(&self) -> BeatRange {
        BeatRange::with_length(self.start(), self.length())
    }

    // Takes

    /// Takes in store order, comp takes included
    pub fn takes(&self) -> Vec<MidiList> {
        if self.shared.takes_dirty.get() {
            let store = self.store();
            let nodes = store.children_of_type(self.state, ids::SEQUENCE);
            let mut takes = self.shared.takes.borrow_mut();
            let previous = std::mem::take(&mut *takes);
            *takes = nodes
                .into_iter()
                .map(|node| {
                    previous
                        .iter()
                        .find(|t| t.state() == node)
                        .cloned()
                        .unwrap_or_else(|| MidiList::from_state(store, node))
                })
                .collect();
            self.shared.takes_dirty.set(false);
            log::debug!("clip {} has {} takes", self.state, takes.len());
        }
        self.shared.takes.borrow().clone()
    }

    pub fn num_takes(&self, include_comps: bool) -> usize {
        self.takes()
            .iter()
            .filter(|t| include_comps || !t.is_comp_list())
            .count()
    }

    /// True when there is more than one take to choose from
    pub fn has_any_takes(&self) -> bool {
        self.num_takes(true) > 1
    }

    /// "Take n" or "Comp n" for each take, in order
    pub fn take_descriptions(&self) -> Vec<String> {
        let mut take_number = 0;
        let mut comp_number = 0;
        self.takes()
            .iter()
            .map(|take| {
                if take.is_comp_list() {
                    comp_number += 1;
                    format!("Comp {}", comp_number)
                } else {
                    take_number += 1;
                    format!("Take {}", take_number)
                }
            })
            .collect()
    }

    pub fn take_sequence(&self, index: usize) -> Option<MidiList> {
        self.takes().get(index).cloned()
    }

    pub fn current_take_index(&self) -> usize {
        let num_takes = self.takes().len();
        let index = self.store().get_i64(self.state, ids::CURRENT_TAKE).unwrap_or(0);
        (index.max(0) as usize).min(num_takes.saturating_sub(1))
    }

    pub fn set_current_take(&self, index: usize, um: Option<&mut UndoManager>) {
        let num_takes = self.takes().len();
        assert!(index < num_takes, "Take index {} out of range ({} takes)", index, num_takes);
        self.set(ids::CURRENT_TAKE, index, um);
    }

    pub fn is_current_take_comp(&self) -> bool {
        self.sequence().is_comp_list()
    }

    /// The current take
    pub fn sequence(&self) -> MidiList {
        let takes = self.takes();
        match takes.get(self.current_take_index()) {
            Some(take) => take.clone(),
            None => {
                let store = self.store();
                let node = MidiList::create_state(store);
                store.add_child(self.state, node, None, None);
                MidiList::from_state(store, node)
            }
        }
    }

    fn insert_take(&self, source: &MidiList, select: bool, um: Option<&mut UndoManager>) -> usize {
        let store = self.store();
        let node = MidiList::create_state(store);
        MidiList::from_state(store, node).copy_from(source, None);

        in_transaction(um, "Add take", |mut um| {
            store.add_child(self.state, node, None, um.as_deref_mut());
            let index = self
                .takes()
                .iter()
                .position(|t| t.state() == node)
                .unwrap_or_default();
            if select {
                self.set_current_take(index, um.as_deref_mut());
            }
            index
        })
    }

    /// Appends a copy of `source` as a new take, returning its index
    pub fn add_take(&self, source: &MidiList, select: bool, um: Option<&mut UndoManager>) -> usize {
        self.insert_take(source, select, um)
    }

    /// Appends a take recorded as a beat-stamped stream
    pub fn add_take_from_sequence(
        &self,
        sequence: &MidiMessageSequence,
        automation: NoteAutomationType,
        select: bool,
        um: Option<&mut UndoManager>,
    ) -> usize {
        let list = MidiList::new();
        list.set_midi_channel(self.midi_channel(), None);
        list.import_with_automation(sequence, automation, None, Default::default(), None);
        self.insert_take(&list, select, um)
    }

    /// Adds the events of a beat-stamped stream to the current take
    pub fn merge_in_midi_sequence(
        &self,
        sequence: &MidiMessageSequence,
        automation: NoteAutomationType,
        um: Option<&mut UndoManager>,
    ) {
        let incoming = MidiList::new();
        incoming.import_with_automation(sequence, automation, None, Default::default(), None);
        self.sequence().add_from(&incoming, um);
    }

    /// Removes every take except the current one
    pub fn clear_takes(&self, um: Option<&mut UndoManager>) {
        let current = self.sequence();
        in_transaction(um, "Clear takes", |mut um| {
            for take in self.takes() {
                if take.state() != current.state() {
                    self.store().remove_child(self.state, take.state(), um.as_deref_mut());
                }
            }
            self.set(ids::CURRENT_TAKE, 0, um.as_deref_mut());
        });
    }

    /// Moves every take but the current one into a clip of its own, on this
    /// track or on a new track per take
    pub fn unpack_takes(&self, to_new_tracks: bool, um: Option<&mut UndoManager>) -> Vec<MidiClip> {
        let takes = self.takes();
        let current = self.current_take_index();
        let track = self.edit.track_of(self.state);
        let descriptions = self.take_descriptions();

        in_transaction(um, "Unpack takes", |mut um| {
            let mut clips = Vec::new();
            for (index, take) in takes.iter().enumerate() {
                if index == current {
                    continue;
                }

                let name = format!("{} {}", self.name(), descriptions[index]);
                let target = match track {
                    Some(track) if !to_new_tracks => track,
                    _ => self.edit.create_track(&name, um.as_deref_mut()),
                };

                let clip = MidiClip::create(&self.edit, target, &name, self.start(), self.length(), um.as_deref_mut());
                clip.copy_settings_from(self, um.as_deref_mut());
                clip.sequence().copy_from(take, um.as_deref_mut());
                clips.push(clip);
            }
            self.clear_takes(um.as_deref_mut());
            clips
        })
    }

    /// Builds a comp take from regions of the existing takes and selects it
    pub fn create_comp_take(&self, regions: &[CompRegion], um: Option<&mut UndoManager>) -> Result<usize, CompError> {
        let comp = build_comp(&self.takes(), regions)?;
        Ok(self.insert_take(&comp, true, um))
    }

    // Looping

    pub fn can_loop(&self) -> bool {
        true
    }

    /// Loops are defined in beats, so they follow tempo changes
    pub fn beat_based_looping(&self) -> bool {
        true
    }

    pub fn is_looping(&self) -> bool {
        self.loop_length_beats().in_beats() > 0.0
    }

    pub fn loop_start_beats(&self) -> BeatPosition {
        BeatPosition::from_beats(self.get_f64(ids::LOOP_START_BEATS).unwrap_or(0.0))
    }

    pub fn loop_length_beats(&self) -> BeatDuration {
        BeatDuration::from_beats(self.get_f64(ids::LOOP_LENGTH_BEATS).unwrap_or(0.0))
    }

    /// Content length before looping was enabled
    pub fn original_length(&self) -> BeatDuration {
        self.get_f64(ids::ORIGINAL_LENGTH)
            .map(BeatDuration::from_beats)
            .unwrap_or_else(|| self.length())
    }

    pub fn set_loop_range_beats(&self, range: BeatRange, um: Option<&mut UndoManager>) {
        let start = range.start.in_beats().max(0.0);
        let length = range.length().in_beats().max(0.0);

        in_transaction(um, "Set loop range", |mut um| {
            if !self.is_looping() && length > 0.0 {
                self.set(ids::ORIGINAL_LENGTH, self.length().in_beats(), um.as_deref_mut());
            }
            self.set(ids::LOOP_START_BEATS, start, um.as_deref_mut());
            self.set(ids::LOOP_LENGTH_BEATS, length, um.as_deref_mut());
        });
    }

    /// Sets the loop from times measured from the clip start
    pub fn set_loop_range(&self, range: TimeRange, um: Option<&mut UndoManager>) {
        let start = self.clip_time_to_beats(TimeDuration::from_seconds(range.start.in_seconds()));
        let end = self.clip_time_to_beats(TimeDuration::from_seconds(range.end.in_seconds()));
        self.set_loop_range_beats(
            BeatRange::new(BeatPosition::zero() + start, BeatPosition::zero() + end),
            um,
        );
    }

    /// Loop start as time from the clip start
    pub fn loop_start(&self) -> TimeDuration {
        self.clip_beats_to_time(self.loop_start_beats() - BeatPosition::zero())
    }

    pub fn loop_length(&self) -> TimeDuration {
        let start = self.loop_start_beats() - BeatPosition::zero();
        let end = self.clip_beats_to_time(start + self.loop_length_beats());
        TimeDuration::from_seconds(end.in_seconds() - self.clip_beats_to_time(start).in_seconds())
    }

    fn clip_time_to_beats(&self, time: TimeDuration) -> BeatDuration {
        let tempo = self.edit.tempo_sequence();
        let origin = tempo.beats_to_time(self.start());
        tempo.time_to_beats(origin + time) - self.start()
    }

    fn clip_beats_to_time(&self, beats: BeatDuration) -> TimeDuration {
        let tempo = self.edit.tempo_sequence();
        tempo.beats_to_time(self.start() + beats) - tempo.beats_to_time(self.start())
    }

    /// Loops the current content `num_loops` times
    pub fn set_number_of_loops(&self, num_loops: u32, um: Option<&mut UndoManager>) {
        if num_loops == 0 {
            return;
        }

        in_transaction(um, "Set number of loops", |mut um| {
            if !self.is_looping() {
                let range = BeatRange::with_length(BeatPosition::zero() + self.offset(), self.length());
                self.set_loop_range_beats(range, um.as_deref_mut());
                self.set_offset(BeatDuration::zero(), um.as_deref_mut());
            }
            self.set_length(self.loop_length_beats() * num_loops as f64, um.as_deref_mut());
        });
    }

    pub fn disable_looping(&self, um: Option<&mut UndoManager>) {
        in_transaction(um, "Disable looping", |mut um| {
            self.set(ids::LOOP_START_BEATS, 0.0, um.as_deref_mut());
            self.set(ids::LOOP_LENGTH_BEATS, 0.0, um.as_deref_mut());
        });
    }

    pub fn looped_sequence_type(&self) -> LoopedSequenceType {
        LoopedSequenceType::from_i64(self.store().get_i64(self.state, ids::LOOPED_SEQUENCE_TYPE).unwrap_or(0))
    }

    pub fn set_looped_sequence_type(&self, sequence_type: LoopedSequenceType, um: Option<&mut UndoManager>) {
        self.set(ids::LOOPED_SEQUENCE_TYPE, sequence_type.to_i64(), um);
    }

    pub fn loop_geometry(&self) -> LoopGeometry {
        LoopGeometry {
            loop_start: self.loop_start_beats(),
            loop_length: self.loop_length_beats(),
            original_length: self.original_length(),
            offset: self.offset(),
            length: self.length(),
            sequence_type: self.looped_sequence_type(),
        }
    }

    // Quantisation and groove

    pub fn quantisation(&self) -> QuantisationType {
        let store = self.store();
        let mut quantisation = QuantisationType::new();
        if let Some(name) = store.get_string(self.state, ids::QUANTISATION_TYPE) {
            quantisation.set_type_name(&name);
        }
        if let Some(proportion) = store.get_f64(self.state, ids::QUANTISATION_PROPORTION) {
            quantisation.set_proportion(proportion);
        }
        quantisation.set_quantising_note_offs(store.get_bool(self.state, ids::QUANTISE_NOTE_OFFS).unwrap_or(false));
        quantisation
    }

    pub fn set_quantisation(&self, quantisation: &QuantisationType, um: Option<&mut UndoManager>) {
        in_transaction(um, "Set quantisation", |mut um| {
            self.set(ids::QUANTISATION_TYPE, quantisation.type_name(), um.as_deref_mut());
            self.set(ids::QUANTISATION_PROPORTION, quantisation.proportion(), um.as_deref_mut());
            self.set(ids::QUANTISE_NOTE_OFFS, quantisation.is_quantising_note_offs(), um.as_deref_mut());
        });
    }

    pub fn groove_template_name(&self) -> String {
        self.store().get_string(self.state, ids::GROOVE_TEMPLATE).unwrap_or_default()
    }

    /// An empty name removes the groove
    pub fn set_groove_template(&self, name: &str, um: Option<&mut UndoManager>) {
        if name.is_empty() {
            self.store().remove_property(self.state, ids::GROOVE_TEMPLATE, um);
        } else {
            self.set(ids::GROOVE_TEMPLATE, name, um);
        }
    }

    /// The clip's groove, None when unset or unknown to the edit
    pub fn groove_template(&self) -> Option<GrooveTemplate> {
        let name = self.groove_template_name();
        if name.is_empty() {
            return None;
        }
        self.edit.groove_templates().template_by_name(&name).cloned()
    }

    pub fn groove_strength(&self) -> f32 {
        self.get_f64(ids::GROOVE_STRENGTH).unwrap_or(1.0) as f32
    }

    /// Clamped to [0, 1]
    pub fn set_groove_strength(&self, strength: f32, um: Option<&mut UndoManager>) {
        let strength = if strength.is_nan() { 0.0 } else { strength.clamp(0.0, 1.0) };
        self.set(ids::GROOVE_STRENGTH, strength, um);
    }

    pub fn uses_groove_strength(&self) -> bool {
        self.groove_template().is_some_and(|g| g.is_parameterized())
    }

    // Channel and modes

    pub fn midi_channel(&self) -> MidiChannel {
        self.sequence().midi_channel()
    }

    /// Sets the channel of every take
    pub fn set_midi_channel(&self, channel: MidiChannel, um: Option<&mut UndoManager>) {
        in_transaction(um, "Set MIDI channel", |mut um| {
            for take in self.takes() {
                take.set_midi_channel(channel, um.as_deref_mut());
            }
        });
    }

    pub fn is_rhythm(&self) -> bool {
        self.midi_channel().number() == RHYTHM_CHANNEL
    }

    pub fn mpe_mode(&self) -> bool {
        self.store().get_bool(self.state, ids::MPE_MODE).unwrap_or(false)
    }

    pub fn set_mpe_mode(&self, mpe: bool, um: Option<&mut UndoManager>) {
        self.set(ids::MPE_MODE, mpe, um);
    }

    pub fn is_using_proxy(&self) -> bool {
        self.store()
            .get_bool(self.state, ids::PROXY_ALLOWED)
            .unwrap_or(self.edit.config().use_proxy_by_default)
    }

    pub fn set_uses_proxy(&self, use_proxy: bool, um: Option<&mut UndoManager>) {
        self.set(ids::PROXY_ALLOWED, use_proxy, um);
    }

    // Level

    pub fn volume_db(&self) -> f32 {
        self.shared.level.db()
    }

    /// Clamped to [-100, 0] dB
    pub fn set_volume_db(&self, db: f32, um: Option<&mut UndoManager>) {
        let db = if db.is_nan() {
            level::MAX_VOLUME_DB
        } else {
            db.clamp(level::MIN_VOLUME_DB, level::MAX_VOLUME_DB)
        };
        self.set(ids::VOLUME_DB, db, um);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.level.is_muted()
    }

    pub fn set_muted(&self, mute: bool, um: Option<&mut UndoManager>) {
        self.set(ids::MUTE, mute, um);
    }

    pub fn live_clip_level(&self) -> LiveClipLevel {
        LiveClipLevel::new(Arc::clone(&self.shared.level))
    }

    pub fn launch_handle(&self) -> Arc<LaunchHandle> {
        Arc::clone(&self.launch_handle)
    }

    // Playback

    /// The current take with looping applied, rebuilt after any change
    pub fn sequence_looped(&self) -> MidiList {
        let generation = self.edit.tempo_generation();
        if self.shared.looped_tempo_generation.get() != generation {
            self.shared.clear_looped();
            self.shared.looped_tempo_generation.set(generation);
        }

        if let Some(looped) = self.shared.looped.borrow().as_ref() {
            return looped.clone();
        }

        let looped = create_sequence_looped(&self.sequence(), &self.loop_geometry());
        *self.shared.looped.borrow_mut() = Some(looped.clone());
        looped
    }

    /// Clears the looped sequence after a tempo or pitch change
    pub fn pitch_tempo_track_changed(&self) {
        self.shared.clear_looped();
    }

    pub fn playback_params(&self) -> PlaybackParams {
        PlaybackParams {
            clip_range: self.clip_range(),
            content_offset: self.loop_geometry().content_offset(self.start()),
            quantisation: self.quantisation(),
            groove: self.groove_template(),
            groove_strength: self.groove_strength(),
        }
    }

    /// The clip's events as one stream on the edit timeline
    pub fn export_playback_sequence(&self, time_base: TimeBase) -> MidiMessageSequence {
        let tempo = self.edit.tempo_sequence();
        self.sequence_looped()
            .export_to_playback_midi_sequence(&self.playback_params(), time_base, self.mpe_mode(), &*tempo)
    }

    /// Proxy stream when enabled or needed for MPE, per-block rendering otherwise
    pub fn create_playback_source(&self) -> PlaybackSource {
        if self.is_using_proxy() || self.mpe_mode() {
            PlaybackSource::Proxy(Arc::new(self.export_playback_sequence(TimeBase::Beats)))
        } else {
            PlaybackSource::Realtime(RealtimeSequence::new(
                &self.sequence(),
                &self.loop_geometry(),
                self.playback_params(),
            ))
        }
    }

    // Editing

    /// Scales the clip around `pivot`, contents and loop included
    pub fn rescale(&self, pivot: BeatPosition, factor: f64, um: Option<&mut UndoManager>) {
        if factor <= 0.0 || factor == 1.0 {
            return;
        }

        in_transaction(um, "Rescale clip", |mut um| {
            for take in self.takes() {
                take.rescale(factor, um.as_deref_mut());
            }

            let start = pivot + (self.start() - pivot) * factor;
            self.set_start(start, um.as_deref_mut());
            self.set_length(self.length() * factor, um.as_deref_mut());
            self.set_offset(self.offset() * factor, um.as_deref_mut());

            if self.is_looping() {
                let loop_start = self.loop_start_beats().in_beats() * factor;
                let loop_length = self.loop_length_beats().in_beats() * factor;
                let original = self.original_length().in_beats() * factor;
                self.set(ids::LOOP_START_BEATS, loop_start, um.as_deref_mut());
                self.set(ids::LOOP_LENGTH_BEATS, loop_length, um.as_deref_mut());
                self.set(ids::ORIGINAL_LENGTH, original, um.as_deref_mut());
            }
        });
    }

    /// Moves the clip start, keeping events where they are on the timeline.
    /// Content is shifted when the new start is before the content start.
    pub fn extend_start(&self, new_start: BeatPosition, um: Option<&mut UndoManager>) {
        let delta = self.start() - new_start;
        if delta.in_beats() == 0.0 {
            return;
        }

        in_transaction(um, "Extend clip start", |mut um| {
            let mut offset = self.offset() - delta;
            if offset.in_beats() < 0.0 {
                let shift = -offset;
                for take in self.takes() {
                    take.move_all_beat_positions(shift, um.as_deref_mut());
                }
                if self.is_looping() {
                    let loop_start = self.loop_start_beats() + shift;
                    self.set(ids::LOOP_START_BEATS, loop_start.in_beats(), um.as_deref_mut());
                }
                offset = BeatDuration::zero();
            }

            self.set_start(new_start, um.as_deref_mut());
            self.set_length(self.length() + delta, um.as_deref_mut());
            self.set_offset(offset, um.as_deref_mut());
        });
    }

    /// Removes events before and/or after the part of the content that plays
    pub fn trim_beyond_ends(&self, beyond_start: bool, beyond_end: bool, um: Option<&mut UndoManager>) {
        let window = if self.is_looping() {
            BeatRange::with_length(self.loop_start_beats(), self.loop_length_beats())
        } else {
            BeatRange::with_length(BeatPosition::zero() + self.offset(), self.length())
        };
        let first = if beyond_start {
            window.start
        } else {
            BeatPosition::from_beats(f64::NEG_INFINITY)
        };
        let last = if beyond_end {
            window.end
        } else {
            BeatPosition::from_beats(f64::INFINITY)
        };

        in_transaction(um, "Trim clip", |mut um| {
            for take in self.takes() {
                take.trim_outside(first, last, um.as_deref_mut());
            }
        });
    }

    /// Extends `note` up to the next later start in `notes_to_use`, or to
    /// `max_end_beat`
    pub fn legato_note(
        &self,
        note: &MidiNote,
        notes_to_use: &[MidiNote],
        max_end_beat: BeatPosition,
        um: Option<&mut UndoManager>,
    ) {
        let next_start = notes_to_use
            .iter()
            .map(MidiNote::start_beat)
            .filter(|start| *start > note.start_beat())
            .reduce(BeatPosition::min);
        let end = next_start.map_or(max_end_beat, |next| next.min(max_end_beat));

        if end > note.start_beat() {
            note.set_start_and_length(self.store(), note.start_beat(), end - note.start_beat(), um);
        }
    }

    fn copy_settings_from(&self, other: &MidiClip, mut um: Option<&mut UndoManager>) {
        for name in CLIP_SETTINGS {
            match other.store().property(other.state, name) {
                Some(value) => self.set(name, value, um.as_deref_mut()),
                None => self.store().remove_property(self.state, name, um.as_deref_mut()),
            }
        }
    }

    /// Makes this clip a copy of `other`, takes included, keeping its position
    pub fn clone_from(&self, other: &MidiClip, um: Option<&mut UndoManager>) {
        let source_takes = other.takes();
        let current = other.current_take_index();

        in_transaction(um, "Clone clip", |mut um| {
            self.copy_settings_from(other, um.as_deref_mut());
            self.set_length(other.length(), um.as_deref_mut());

            let old_takes = self.takes();
            for take in &source_takes {
                self.insert_take(take, false, um.as_deref_mut());
            }
            for take in old_takes {
                self.store().remove_child(self.state, take.state(), um.as_deref_mut());
            }
            self.set(ids::CURRENT_TAKE, current, um.as_deref_mut());
        });
    }

    // Selection

    pub fn selected_events(&self) -> Option<SelectedMidiEvents> {
        self.selected_events.borrow().clone()
    }

    pub fn set_selected_events(&self, events: Option<SelectedMidiEvents>) {
        *self.selected_events.borrow_mut() = events;
    }

    /// Uses `events` as the selection until the guard drops
    pub fn scoped_selection(&self, events: SelectedMidiEvents) -> ScopedEventsList<'_> {
        ScopedEventsList::new(&self.selected_events, events)
    }
}

/// Merges a stream stamped in beats from zero into the clip's current take,
/// shifted by `offset`, and lengthens the clip to fit
pub fn merge_in_midi_sequence(
    clip: &MidiClip,
    sequence: &MidiMessageSequence,
    offset: BeatDuration,
    automation: NoteAutomationType,
    um: Option<&mut UndoManager>,
) {
    let mut shifted = sequence.clone();
    shifted.shift(offset.in_beats());

    in_transaction(um, "Merge MIDI", |mut um| {
        clip.merge_in_midi_sequence(&shifted, automation, um.as_deref_mut());

        let needed = clip.sequence().last_beat_number() - (BeatPosition::zero() + clip.offset());
        if needed > clip.length() {
            clip.set_length(needed, um.as_deref_mut());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::midi::event::MidiMessage;
    use crate::sequencer::timeline::TimePosition;

    fn beats(b: f64) -> BeatPosition {
        BeatPosition::from_beats(b)
    }

    fn len(b: f64) -> BeatDuration {
        BeatDuration::from_beats(b)
    }

    fn setup() -> (Rc<Edit>, MidiClip) {
        let edit = Edit::new(EngineConfig::default());
        let track = edit.create_track("Track 1", None);
        let clip = MidiClip::create(&edit, track, "Clip", beats(0.0), len(8.0), None);
        (edit, clip)
    }

    fn note_starts(list: &MidiList) -> Vec<f64> {
        list.notes().iter().map(|n| n.start_beat().in_beats()).collect()
    }

    #[test]
    fn test_new_clip() {
        let (edit, clip) = setup();
        assert_eq!(clip.num_takes(true), 1);
        assert!(!clip.has_any_takes());
        assert!(!clip.item_id().is_empty());
        assert!(clip.is_using_proxy());
        assert_eq!(clip.midi_channel().number(), 1);
        assert!(clip.sequence().is_attached_to_clip());
        assert_eq!(edit.clips().len(), 1);
    }

    #[test]
    fn test_takes() {
        let (edit, clip) = setup();
        clip.sequence().add_note(60, beats(0.0), len(1.0), 100, 0, None);

        let recorded = MidiList::new();
        recorded.add_note(64, beats(1.0), len(1.0), 100, 0, None);

        let index = {
            let mut um = edit.undo_manager();
            clip.add_take(&recorded, true, Some(&mut *um))
        };
        assert_eq!(index, 1);
        assert_eq!(clip.current_take_index(), 1);
        assert_eq!(note_starts(&clip.sequence()), vec![1.0]);
        assert_eq!(clip.take_descriptions(), vec!["Take 1", "Take 2"]);

        edit.undo().unwrap();
        assert_eq!(clip.num_takes(true), 1);
        assert_eq!(clip.current_take_index(), 0);
        assert_eq!(note_starts(&clip.sequence()), vec![0.0]);
    }

    #[test]
    #[should_panic(expected = "Take index 3 out of range")]
    fn test_bad_take_index() {
        let (_edit, clip) = setup();
        clip.set_current_take(3, None);
    }

    #[test]
    fn test_clear_takes_keeps_current() {
        let (_edit, clip) = setup();
        for pitch in [62, 64] {
            let take = MidiList::new();
            take.add_note(pitch, beats(0.0), len(1.0), 100, 0, None);
            clip.add_take(&take, false, None);
        }
        clip.set_current_take(1, None);

        clip.clear_takes(None);
        assert_eq!(clip.num_takes(true), 1);
        assert_eq!(clip.current_take_index(), 0);
        assert_eq!(clip.sequence().note_unchecked(0).note_number(), 62);
    }

    #[test]
    fn test_unpack_takes() {
        let (edit, clip) = setup();
        let take = MidiList::new();
        take.add_note(67, beats(2.0), len(1.0), 100, 0, None);
        clip.add_take(&take, false, None);
        clip.set_quantisation(&QuantisationType::from_name("1/4 beat").unwrap(), None);

        let clips = clip.unpack_takes(false, None);
        assert_eq!(clips.len(), 1);
        assert_eq!(clip.num_takes(true), 1);
        assert_eq!(clips[0].sequence().note_unchecked(0).note_number(), 67);
        assert_eq!(clips[0].quantisation().type_name(), "1/4 beat");
        assert_eq!(edit.clips().len(), 2);
        assert_eq!(edit.tracks().len(), 1);

        let take = MidiList::new();
        clip.add_take(&take, false, None);
        clip.unpack_takes(true, None);
        assert_eq!(edit.tracks().len(), 2);
    }

    #[test]
    fn test_comp_take() {
        let (_edit, clip) = setup();
        clip.sequence().add_note(60, beats(6.0), len(4.0), 100, 0, None);
        let second = MidiList::new();
        second.add_note(72, beats(8.0), len(1.0), 100, 0, None);
        clip.add_take(&second, false, None);

        let index = clip
            .create_comp_take(
                &[
                    CompRegion::new(BeatRange::between(0.0, 8.0), 0),
                    CompRegion::new(BeatRange::between(8.0, 16.0), 1),
                ],
                None,
            )
            .unwrap();

        assert_eq!(index, 2);
        assert!(clip.is_current_take_comp());
        assert_eq!(clip.num_takes(false), 2);
        assert_eq!(clip.take_descriptions(), vec!["Take 1", "Take 2", "Comp 1"]);
        assert_eq!(clip.sequence().note_unchecked(0).end_beat().in_beats(), 8.0);

        assert_eq!(clip.create_comp_take(&[], None), Err(CompError::NoRegions));
    }

    #[test]
    fn test_looped_sequence_cache() {
        let (edit, clip) = setup();
        let take = clip.sequence();
        take.add_note(60, beats(0.0), len(0.5), 100, 0, None);
        take.add_note(62, beats(1.0), len(0.5), 100, 0, None);

        clip.set_length(len(10.0), None);
        {
            let mut um = edit.undo_manager();
            clip.set_loop_range_beats(BeatRange::between(0.0, 4.0), Some(&mut *um));
        }
        assert_eq!(note_starts(&clip.sequence_looped()), vec![0.0, 1.0, 4.0, 5.0, 8.0, 9.0]);

        // Same cached list until something changes
        let first = clip.sequence_looped();
        assert!(first.store().same_as(clip.sequence_looped().store()));

        take.add_note(64, beats(2.0), len(0.5), 100, 0, None);
        // The third pass is cut at the clip end
        assert_eq!(clip.sequence_looped().num_notes(), 8);

        take.remove_all_notes(None);
        edit.undo().unwrap();
        assert!(!clip.is_looping());
        assert_eq!(clip.sequence_looped().num_notes(), 0);
    }

    #[test]
    fn test_tempo_change_clears_cache() {
        let (edit, clip) = setup();
        let first = clip.sequence_looped();
        assert!(first.store().same_as(clip.sequence_looped().store()));

        edit.modify_tempo_sequence(|t| t.set_click_enabled(true));
        assert!(!first.store().same_as(clip.sequence_looped().store()));

        let second = clip.sequence_looped();
        clip.pitch_tempo_track_changed();
        assert!(!second.store().same_as(clip.sequence_looped().store()));
    }

    #[test]
    fn test_export_places_clip_on_timeline() {
        let (_edit, clip) = setup();
        clip.set_start(beats(16.0), None);
        clip.set_offset(len(1.0), None);
        clip.sequence().add_note(60, beats(0.0), len(2.0), 100, 0, None);
        clip.sequence().add_note(62, beats(3.0), len(1.0), 100, 0, None);

        let seq = clip.export_playback_sequence(TimeBase::Beats);
        let ons: Vec<_> = seq.iter().filter(|e| e.message.is_note_on()).map(|e| e.timestamp).collect();
        // The first note starts before the clip and is cut at the clip start
        assert_eq!(ons, vec![16.0, 18.0]);

        let seconds = clip.export_playback_sequence(TimeBase::Seconds);
        assert_eq!(seconds.events()[0].timestamp, 8.0);
    }

    #[test]
    fn test_realtime_source_matches_proxy() {
        let (_edit, clip) = setup();
        clip.set_start(beats(4.0), None);
        let take = clip.sequence();
        take.add_note(60, beats(0.2), len(0.6), 100, 0, None);
        take.add_note(63, beats(1.3), len(2.0), 100, 0, None);
        clip.set_loop_range_beats(BeatRange::between(0.0, 2.0), None);
        clip.set_quantisation(&QuantisationType::from_name("1/4 beat").unwrap(), None);

        let render = |source: &mut PlaybackSource| {
            let mut out = Vec::new();
            for block in 0..64 {
                let start = block as f64 * 0.25;
                source.render_block(BeatRange::between(start, start + 0.25), &mut out);
            }
            out
        };

        let mut proxy = clip.create_playback_source();
        assert!(proxy.is_proxy());

        clip.set_uses_proxy(false, None);
        let mut realtime = clip.create_playback_source();
        assert!(!realtime.is_proxy());

        assert_eq!(render(&mut realtime), render(&mut proxy));

        clip.set_mpe_mode(true, None);
        assert!(clip.create_playback_source().is_proxy());
    }

    #[test]
    fn test_settings_are_clamped_and_undoable() {
        let (edit, clip) = setup();
        clip.set_groove_strength(3.0, None);
        assert_eq!(clip.groove_strength(), 1.0);
        clip.set_groove_strength(-1.0, None);
        assert_eq!(clip.groove_strength(), 0.0);

        {
            let mut um = edit.undo_manager();
            let mut q = QuantisationType::from_name("1/16 beat").unwrap();
            q.set_proportion(0.5);
            clip.set_quantisation(&q, Some(&mut *um));
        }
        assert_eq!(clip.quantisation().proportion(), 0.5);
        edit.undo().unwrap();
        assert!(!clip.quantisation().is_enabled());
    }

    #[test]
    fn test_groove() {
        let (_edit, clip) = setup();
        assert!(clip.groove_template().is_none());
        assert!(!clip.uses_groove_strength());

        clip.set_groove_template("Basic 8th Swing", None);
        assert!(clip.uses_groove_strength());
        clip.sequence().add_note(60, beats(0.5), len(0.5), 100, 0, None);
        let seq = clip.export_playback_sequence(TimeBase::Beats);
        assert!(seq.events()[0].timestamp > 0.5);

        clip.set_groove_template("", None);
        assert!(clip.groove_template().is_none());
    }

    #[test]
    fn test_volume_and_mute_reach_live_level() {
        let (edit, clip) = setup();
        let live = clip.live_clip_level();

        {
            let mut um = edit.undo_manager();
            clip.set_volume_db(-200.0, Some(&mut *um));
        }
        assert_eq!(live.db(), -100.0);
        edit.undo().unwrap();
        assert_eq!(live.db(), 0.0);

        clip.set_muted(true, None);
        assert!(live.is_muted());
        assert_eq!(live.gain(), 0.0);

        clip.launch_handle().play();
        assert_eq!(clip.launch_handle().play_state(), PlayState::Playing);
    }

    #[test]
    fn test_channel_and_rhythm() {
        let (_edit, clip) = setup();
        clip.add_take(&MidiList::new(), false, None);
        clip.set_midi_channel(MidiChannel::new(10), None);
        assert!(clip.is_rhythm());
        assert!(clip.takes().iter().all(|t| t.midi_channel().number() == 10));
    }

    #[test]
    fn test_number_of_loops() {
        let (_edit, clip) = setup();
        clip.set_length(len(3.0), None);
        clip.set_number_of_loops(4, None);
        assert!(clip.is_looping());
        assert_eq!(clip.loop_length_beats().in_beats(), 3.0);
        assert_eq!(clip.length().in_beats(), 12.0);
        assert_eq!(clip.original_length().in_beats(), 3.0);

        clip.disable_looping(None);
        assert!(!clip.is_looping());
    }

    #[test]
    fn test_loop_range_in_time() {
        let (_edit, clip) = setup();
        // 120 BPM: one beat is half a second
        clip.set_loop_range(
            TimeRange::new(TimePosition::from_seconds(0.5), TimePosition::from_seconds(2.5)),
            None,
        );
        assert!((clip.loop_start_beats().in_beats() - 1.0).abs() < 1e-9);
        assert!((clip.loop_length_beats().in_beats() - 4.0).abs() < 1e-9);
        assert!((clip.loop_start().in_seconds() - 0.5).abs() < 1e-9);
        assert!((clip.loop_length().in_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rescale_and_extend_start() {
        let (_edit, clip) = setup();
        clip.set_start(beats(4.0), None);
        clip.sequence().add_note(60, beats(1.0), len(1.0), 100, 0, None);

        clip.rescale(beats(0.0), 2.0, None);
        assert_eq!(clip.start().in_beats(), 8.0);
        assert_eq!(clip.length().in_beats(), 16.0);
        assert_eq!(note_starts(&clip.sequence()), vec![2.0]);

        clip.extend_start(beats(6.0), None);
        assert_eq!(clip.start().in_beats(), 6.0);
        assert_eq!(clip.length().in_beats(), 18.0);
        assert_eq!(clip.offset().in_beats(), 0.0);
        // The note stays at edit beat 10
        assert_eq!(note_starts(&clip.sequence()), vec![4.0]);
    }

    #[test]
    fn test_trim_beyond_ends() {
        let (_edit, clip) = setup();
        clip.set_length(len(4.0), None);
        clip.set_offset(len(2.0), None);
        let take = clip.sequence();
        take.add_note(60, beats(0.0), len(1.0), 100, 0, None);
        take.add_note(62, beats(3.0), len(1.0), 100, 0, None);
        take.add_note(64, beats(5.5), len(1.0), 100, 0, None);

        clip.trim_beyond_ends(true, false, None);
        assert_eq!(note_starts(&take), vec![3.0, 5.5]);
        clip.trim_beyond_ends(true, true, None);
        assert_eq!(note_starts(&take), vec![3.0]);
    }

    #[test]
    fn test_legato_note() {
        let (_edit, clip) = setup();
        let take = clip.sequence();
        take.add_note(60, beats(0.0), len(0.25), 100, 0, None);
        take.add_note(62, beats(2.0), len(0.25), 100, 0, None);

        let notes = take.notes();
        clip.legato_note(&notes[0], &notes, beats(8.0), None);
        clip.legato_note(&notes[1], &notes, beats(3.0), None);

        let lengths: Vec<_> = take.notes().iter().map(|n| n.length_beats().in_beats()).collect();
        assert_eq!(lengths, vec![2.0, 1.0]);
    }

    #[test]
    fn test_clone_from() {
        let (edit, clip) = setup();
        clip.sequence().add_note(60, beats(0.0), len(1.0), 100, 0, None);
        clip.set_mpe_mode(true, None);
        clip.add_take(&MidiList::new(), true, None);

        let track = edit.create_track("Other", None);
        let copy = MidiClip::create(&edit, track, "Copy", beats(32.0), len(2.0), None);
        copy.clone_from(&clip, None);

        assert_eq!(copy.num_takes(true), 2);
        assert_eq!(copy.current_take_index(), 1);
        assert!(copy.mpe_mode());
        assert_eq!(copy.length().in_beats(), 8.0);
        assert_eq!(copy.start().in_beats(), 32.0);
        assert_eq!(copy.take_sequence(0).unwrap().num_notes(), 1);
    }

    #[test]
    fn test_merge_in_midi_sequence_extends_clip() {
        let (_edit, clip) = setup();
        clip.sequence().add_note(48, beats(0.0), len(1.0), 100, 0, None);

        let mut recorded = MidiMessageSequence::new();
        let channel = MidiChannel::new(1);
        recorded.push(0.0, MidiMessage::NoteOn { channel, note: 60, velocity: 90 });
        recorded.push(2.0, MidiMessage::NoteOff { channel, note: 60, velocity: 0 });

        merge_in_midi_sequence(&clip, &recorded, len(9.0), NoteAutomationType::None, None);
        assert_eq!(note_starts(&clip.sequence()), vec![0.0, 9.0]);
        assert_eq!(clip.length().in_beats(), 11.0);
    }

    #[test]
    fn test_scoped_selection() {
        let (_edit, clip) = setup();
        let id = clip.sequence().add_note(60, beats(0.0), len(1.0), 100, 0, None);
        assert!(clip.selected_events().is_none());
        {
            let _scope = clip.scoped_selection(SelectedMidiEvents::from_ids([id]));
            let selected = clip.selected_events().unwrap();
            assert_eq!(selected.selected_notes(&clip.sequence()).len(), 1);
        }
        assert!(clip.selected_events().is_none());
    }
}
